use std::time::Instant;

use serde_json::json;
use thumbforge_contracts::events::{EventPayload, EventWriter};
use thumbforge_contracts::request::GenerationRequest;
use thumbforge_contracts::tables::EngineTables;

use crate::backends::BackendSet;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{PipelineContext, PipelineFallbackChain, PipelineOutcome};

/// Owns the configuration, static tables and backend set for a worker.
/// Jobs borrow all of it read-only, so one engine can serve many jobs.
pub struct ThumbforgeEngine {
    config: EngineConfig,
    tables: EngineTables,
    backends: BackendSet,
}

impl ThumbforgeEngine {
    pub fn new(config: EngineConfig, tables: EngineTables, backends: BackendSet) -> Self {
        Self {
            config,
            tables,
            backends,
        }
    }

    /// Offline engine backed by dryrun backends for every registered id.
    pub fn dryrun(config: EngineConfig) -> anyhow::Result<Self> {
        let tables = config.tables()?;
        let backends = BackendSet::dryrun(&tables.backends);
        Ok(Self::new(config, tables, backends))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tables(&self) -> &EngineTables {
        &self.tables
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    fn context(&self) -> PipelineContext<'_> {
        PipelineContext {
            tables: &self.tables,
            config: &self.config,
            backends: &self.backends,
        }
    }

    pub fn generate(&self, request: &GenerationRequest, events: &EventWriter) -> EngineResult<PipelineOutcome> {
        request.validate().map_err(EngineError::invalid_request)?;

        let started = Instant::now();
        let chain = PipelineFallbackChain::standard(self.context(), &self.config.pipeline_versions);
        let mut payload = EventPayload::new();
        payload.insert("niche".to_string(), json!(request.niche));
        payload.insert("creator_style".to_string(), json!(request.creator_style));
        payload.insert("variant_count".to_string(), json!(request.normalized_variant_count()));
        payload.insert("quality_tier".to_string(), json!(request.quality_tier));
        payload.insert("has_face".to_string(), json!(request.has_face()));
        payload.insert("versions".to_string(), json!(chain.versions()));
        emit(events, "job_started", payload);

        let result = chain.run(request, events);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = events.job_id(),
                    version = %outcome.pipeline_version,
                    variants = outcome.variants.len(),
                    elapsed_ms,
                    "job completed"
                );
                let mut payload = EventPayload::new();
                payload.insert("pipeline_version".to_string(), json!(outcome.pipeline_version));
                payload.insert(
                    "variants".to_string(),
                    json!(outcome
                        .variants
                        .iter()
                        .map(|variant| json!({
                            "label": variant.label,
                            "backend": variant.backend,
                            "final_score": variant.quality.final_score,
                        }))
                        .collect::<Vec<_>>()),
                );
                payload.insert("prior_failures".to_string(), json!(outcome.prior_failures));
                payload.insert("warnings".to_string(), json!(outcome.warnings));
                payload.insert("elapsed_ms".to_string(), json!(elapsed_ms));
                emit(events, "job_completed", payload);
            }
            Err(err) => {
                tracing::error!(job_id = events.job_id(), error = %err, elapsed_ms, "job failed");
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), json!(err.to_string()));
                if let EngineError::AllPipelineVersionsFailed { failures, .. } = err {
                    payload.insert("failures".to_string(), json!(failures));
                }
                payload.insert("elapsed_ms".to_string(), json!(elapsed_ms));
                emit(events, "job_failed", payload);
            }
        }
        result
    }
}

fn emit(events: &EventWriter, event_type: &str, payload: EventPayload) {
    if let Err(err) = events.emit(event_type, payload) {
        tracing::warn!(error = %err, event_type, "failed to write event");
    }
}
