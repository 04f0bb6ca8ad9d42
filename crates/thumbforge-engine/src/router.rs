use serde_json::{json, Map, Value};
use thumbforge_contracts::backends::{BackendRegistry, RoutingDecision};
use thumbforge_contracts::events::{EventPayload, EventWriter};
use thumbforge_contracts::request::{GenerationRequest, Priority, QualityTier};
use thumbforge_contracts::tables::EngineTables;

use crate::backends::{error_chain_text, BackendSet, SynthesisRequest, SynthesizedImage};
use crate::error::{EngineError, EngineResult};

const GUIDANCE_SCALE: f64 = 3.5;

#[derive(Debug, Clone, Copy)]
pub struct RoutingInput<'a> {
    pub style: Option<&'a str>,
    pub niche: Option<&'a str>,
    pub has_face: bool,
    pub priority: Priority,
    pub tier: QualityTier,
}

impl<'a> RoutingInput<'a> {
    pub fn from_request(request: &'a GenerationRequest) -> Self {
        Self {
            style: request.creator_style.as_deref(),
            niche: request.niche.as_deref(),
            has_face: request.has_face(),
            priority: request.priority,
            tier: request.quality_tier,
        }
    }
}

pub struct BackendRouter<'a> {
    tables: &'a EngineTables,
}

impl<'a> BackendRouter<'a> {
    pub fn new(tables: &'a EngineTables) -> Self {
        Self { tables }
    }

    pub fn route(&self, input: &RoutingInput<'_>) -> EngineResult<RoutingDecision> {
        let registry = &self.tables.backends;
        let style = self.tables.style(input.style);
        let mut reason: Vec<String> = Vec::new();

        let mut chosen = style.preferred_backend.clone();
        reason.push(format!("Style '{}' prefers {chosen}.", style.id));

        let face_rule_active = input.has_face && input.priority != Priority::Speed;
        if face_rule_active {
            if let Some(face) = registry.face_preserving() {
                if face.id != chosen {
                    reason.push(format!(
                        "Reference face supplied; using face-preserving {}.",
                        face.id
                    ));
                    chosen = face.id.clone();
                }
            }
        }

        if !usable(registry, &chosen, input.has_face) {
            let creative = creative_id(registry)?;
            reason.push(format!(
                "{chosen} cannot run without a reference face; moving to {creative}."
            ));
            chosen = creative;
        }

        if let Some(niche) = self.tables.niche(input.niche) {
            if let Some(hint) = niche.backend_hint.as_deref() {
                let hint_is_face = registry
                    .get(hint)
                    .map(|spec| spec.requires_face())
                    .unwrap_or(false);
                let chosen_is_face = registry
                    .get(&chosen)
                    .map(|spec| spec.requires_face())
                    .unwrap_or(false);
                if hint == chosen {
                    reason.push(format!("Niche '{}' agrees.", niche.id));
                } else if registry.get(hint).is_none() {
                    reason.push(format!("Niche hint '{hint}' is not a known backend."));
                } else if hint_is_face && !input.has_face {
                    reason.push(format!(
                        "Niche '{}' hint {hint} ignored: no reference face.",
                        niche.id
                    ));
                } else if face_rule_active && chosen_is_face && !hint_is_face {
                    reason.push(format!(
                        "Niche '{}' hint {hint} ignored: face preservation wins.",
                        niche.id
                    ));
                } else {
                    reason.push(format!("Niche '{}' hints {hint}.", niche.id));
                    chosen = hint.to_string();
                }
            }
        }

        match input.priority {
            Priority::Speed => {
                if let Some(fastest) = registry.fastest(input.has_face) {
                    reason.push(format!("Speed priority forces fastest backend {}.", fastest.id));
                    chosen = fastest.id.clone();
                }
            }
            Priority::Cost => {
                if let Some(cheapest) = registry.cheapest(input.has_face) {
                    reason.push(format!(
                        "Cost priority forces cheapest backend {}.",
                        cheapest.id
                    ));
                    chosen = cheapest.id.clone();
                }
            }
            Priority::Quality => {}
        }

        let fallback = self.fallback_for(&chosen, input.has_face)?;
        let mut decision = RoutingDecision {
            backend: chosen,
            fallback,
            reason: String::new(),
            params: model_params(input.tier),
        };
        for part in reason {
            decision.append_reason(&part);
        }
        Ok(decision)
    }

    fn fallback_for(&self, chosen: &str, has_face: bool) -> EngineResult<String> {
        let registry = &self.tables.backends;
        let creative = creative_id(registry)?;
        let named = registry
            .get(chosen)
            .and_then(|spec| spec.fallback.clone())
            .filter(|id| id != chosen)
            .unwrap_or_else(|| creative.clone());
        if usable(registry, &named, has_face) {
            return Ok(named);
        }
        Ok(creative)
    }
}

fn usable(registry: &BackendRegistry, id: &str, has_face: bool) -> bool {
    registry
        .get(id)
        .map(|spec| has_face || !spec.requires_face())
        .unwrap_or(false)
}

fn creative_id(registry: &BackendRegistry) -> EngineResult<String> {
    registry
        .creative()
        .or_else(|| registry.usable(false).next())
        .map(|spec| spec.id.clone())
        .ok_or_else(|| EngineError::BackendUnavailable {
            backend: "creative".to_string(),
            reason: "no backend can run without a reference face".to_string(),
        })
}

pub fn model_params(tier: QualityTier) -> Map<String, Value> {
    let steps = match tier {
        QualityTier::Basic => 20,
        QualityTier::Pro => 28,
        QualityTier::Premium => 40,
    };
    let mut params = Map::new();
    params.insert("steps".to_string(), json!(steps));
    params.insert("guidance".to_string(), json!(GUIDANCE_SCALE));
    params.insert("quality_tier".to_string(), json!(tier.as_str()));
    params
}

/// Runs a routing decision against concrete backends: primary first, then
/// the fallback.
pub struct BackendExecutor<'a> {
    backends: &'a BackendSet,
    registry: &'a BackendRegistry,
    events: Option<&'a EventWriter>,
}

impl<'a> BackendExecutor<'a> {
    pub fn new(backends: &'a BackendSet, registry: &'a BackendRegistry) -> Self {
        Self {
            backends,
            registry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: &'a EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    fn runnable(&self, id: &str, has_face: bool) -> Result<(), String> {
        let Some(spec) = self.registry.get(id) else {
            return Err("not registered".to_string());
        };
        if spec.requires_face() && !has_face {
            return Err("requires a reference face".to_string());
        }
        if !self.backends.contains(id) {
            return Err("no implementation configured".to_string());
        }
        Ok(())
    }

    fn emit_fallback(&self, from: &str, to: &str, reason: &str, index: usize) {
        let Some(events) = self.events else {
            return;
        };
        let mut payload = EventPayload::new();
        payload.insert("from".to_string(), json!(from));
        payload.insert("to".to_string(), json!(to));
        payload.insert("reason".to_string(), json!(reason));
        payload.insert("index".to_string(), json!(index));
        if let Err(err) = events.emit("backend_fallback", payload) {
            tracing::warn!(error = %err, "failed to write backend_fallback event");
        }
    }

    fn creative(&self) -> Option<String> {
        self.registry.creative().map(|spec| spec.id.clone())
    }

    pub fn execute(
        &self,
        decision: &RoutingDecision,
        request: &SynthesisRequest,
        has_face: bool,
    ) -> EngineResult<SynthesizedImage> {
        let mut primary = decision.backend.clone();
        let mut secondary = decision.fallback.clone();
        if self.runnable(&secondary, has_face).is_err() {
            if let Some(creative) = self.creative() {
                secondary = creative;
            }
        }
        if let Err(why) = self.runnable(&primary, has_face) {
            let err = EngineError::BackendUnavailable {
                backend: primary.clone(),
                reason: why,
            };
            tracing::warn!(error = %err, fallback = %secondary, "substituting fallback backend");
            self.emit_fallback(&primary, &secondary, &err.to_string(), request.index);
            primary = secondary.clone();
        }

        let mut attempts: Vec<String> = vec![primary.clone()];
        if secondary != primary {
            attempts.push(secondary.clone());
        }

        let mut last_error = String::new();
        for (attempt, id) in attempts.iter().enumerate() {
            if let Err(why) = self.runnable(id, has_face) {
                last_error = format!("{id} unavailable: {why}");
                continue;
            }
            let Some(backend) = self.backends.get(id) else {
                continue;
            };
            match backend.synthesize(request) {
                Ok(image) => return Ok(image),
                Err(err) => {
                    last_error = error_chain_text(&err, 512);
                    tracing::warn!(backend = %id, index = request.index, error = %last_error, "synthesis failed");
                    if let Some(next) = attempts.get(attempt + 1) {
                        self.emit_fallback(id, next, &last_error, request.index);
                    }
                }
            }
        }

        Err(EngineError::GenerationFailed {
            primary,
            fallback: secondary,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::Value;
    use thumbforge_contracts::request::ReferenceImage;

    use super::*;
    use crate::backends::DryrunBackend;

    fn input<'a>(style: Option<&'a str>, niche: Option<&'a str>, has_face: bool) -> RoutingInput<'a> {
        RoutingInput {
            style,
            niche,
            has_face,
            priority: Priority::Quality,
            tier: QualityTier::Pro,
        }
    }

    fn synth_request() -> SynthesisRequest {
        SynthesisRequest {
            prompt: "test".to_string(),
            width: 64,
            height: 36,
            index: 0,
            reference_images: Vec::new(),
            params: Map::new(),
        }
    }

    #[test]
    fn tech_without_face_routes_to_creative() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let decision = BackendRouter::new(&tables).route(&input(None, Some("tech"), false))?;
        assert_eq!(decision.backend, "creative");
        assert_eq!(decision.fallback, "photoreal");
        assert_eq!(decision.params.get("steps"), Some(&Value::from(28)));
        Ok(())
    }

    #[test]
    fn face_supplied_prefers_face_preserving() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let decision =
            BackendRouter::new(&tables).route(&input(Some("mkbhd"), Some("tech"), true))?;
        assert_eq!(decision.backend, "face-lock");
        assert!(decision.reason.contains("face preservation wins"));
        Ok(())
    }

    /// A table id or an arbitrary name the tables do not know.
    fn table_key(ids: Vec<String>) -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop_oneof![prop::sample::select(ids), "[a-z-]{1,12}"])
    }

    proptest! {
        #[test]
        fn face_backend_never_chosen_without_face(
            style in table_key(EngineTables::default().style_ids()),
            niche in table_key(EngineTables::default().niche_ids()),
            priority in prop::sample::select(vec![Priority::Quality, Priority::Speed, Priority::Cost]),
            tier in prop::sample::select(vec![QualityTier::Basic, QualityTier::Pro, QualityTier::Premium]),
        ) {
            let tables = EngineTables::default();
            let routing = RoutingInput {
                style: style.as_deref(),
                niche: niche.as_deref(),
                has_face: false,
                priority,
                tier,
            };
            let decision = BackendRouter::new(&tables)
                .route(&routing)
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            for id in [&decision.backend, &decision.fallback] {
                let spec = tables.backends.get(id);
                prop_assert!(spec.is_some_and(|spec| !spec.requires_face()), "{} -> {}", decision.reason, id);
            }
        }
    }

    #[test]
    fn speed_and_cost_are_absolute_overrides() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let router = BackendRouter::new(&tables);
        let mut routing = input(Some("mrbeast"), Some("vlog"), true);
        routing.priority = Priority::Speed;
        assert_eq!(router.route(&routing)?.backend, "turbo");
        routing.priority = Priority::Cost;
        assert_eq!(router.route(&routing)?.backend, "budget");
        Ok(())
    }

    #[test]
    fn vlog_hint_ignored_without_face() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let decision = BackendRouter::new(&tables).route(&input(None, Some("vlog"), false))?;
        assert_eq!(decision.backend, "creative");
        assert!(decision.reason.contains("no reference face"));
        Ok(())
    }

    #[test]
    fn executor_falls_back_after_primary_failure() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let mut backends = BackendSet::dryrun(&tables.backends);
        backends.register(DryrunBackend::new("creative").always_failing());
        let decision = BackendRouter::new(&tables).route(&input(None, Some("tech"), false))?;
        let image = BackendExecutor::new(&backends, &tables.backends).execute(
            &decision,
            &synth_request(),
            false,
        )?;
        assert_eq!(image.backend, "photoreal");
        Ok(())
    }

    #[test]
    fn executor_substitutes_creative_for_face_fallback() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let backends = BackendSet::dryrun(&tables.backends);
        let decision = RoutingDecision {
            backend: "face-lock".to_string(),
            fallback: "face-lock".to_string(),
            reason: String::new(),
            params: Map::new(),
        };
        let image = BackendExecutor::new(&backends, &tables.backends).execute(
            &decision,
            &synth_request(),
            false,
        )?;
        assert_eq!(image.backend, "creative");
        Ok(())
    }

    #[test]
    fn executor_exhaustion_is_generation_failed() {
        let tables = EngineTables::default();
        let mut backends = BackendSet::new();
        backends.register(DryrunBackend::new("creative").always_failing());
        backends.register(DryrunBackend::new("photoreal").always_failing());
        let decision = RoutingDecision {
            backend: "creative".to_string(),
            fallback: "photoreal".to_string(),
            reason: String::new(),
            params: Map::new(),
        };
        let mut request = synth_request();
        request.reference_images.push(ReferenceImage {
            bytes: vec![1, 2, 3],
            mime: "image/png".to_string(),
        });
        let err = BackendExecutor::new(&backends, &tables.backends)
            .execute(&decision, &request, true)
            .err();
        assert!(matches!(
            err,
            Some(EngineError::GenerationFailed { ref primary, ref fallback, .. })
                if primary == "creative" && fallback == "photoreal"
        ));
    }
}
