//! Orchestration state machine and the degradation chain around it.
//!
//! A run walks `PROMPT_BUILT -> BACKEND_SELECTED -> CANDIDATES_SCORED ->
//! LAYOUT_COMPUTED -> FINALIZED`. Any stage failure ends the run for that
//! pipeline version only; [`PipelineFallbackChain`] then retries the whole job
//! with the next, simpler version.

use std::fmt;
use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageReader;
use serde_json::json;
use thumbforge_contracts::events::{EventPayload, EventWriter};
use thumbforge_contracts::jobs::{variant_label, PipelineVersion, Variant, VersionFailure};
use thumbforge_contracts::layout::{Anchor, TextLayout, TextPosition};
use thumbforge_contracts::request::GenerationRequest;
use thumbforge_contracts::tables::EngineTables;
use thumbforge_contracts::zones::Canvas;

use crate::backends::{encode_png, short_id, BackendSet, SynthesisRequest};
use crate::composition::{CompositionRequest, Zone};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::layout::{self, FitConstraints, TextStyle};
use crate::prompt::{PromptBuilder, PromptRichness};
use crate::router::{BackendExecutor, BackendRouter, RoutingInput};
use crate::scoring::{QualityScorer, ScoringContext};
use crate::selector::{MultiPassSelector, ScoredCandidate, SelectionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    PromptBuilt,
    BackendSelected,
    CandidatesScored,
    LayoutComputed,
    Finalized,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptBuilt => "PROMPT_BUILT",
            Self::BackendSelected => "BACKEND_SELECTED",
            Self::CandidatesScored => "CANDIDATES_SCORED",
            Self::LayoutComputed => "LAYOUT_COMPUTED",
            Self::Finalized => "FINALIZED",
            Self::Failed => "FAILED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::PromptBuilt => 1,
            Self::BackendSelected => 2,
            Self::CandidatesScored => 3,
            Self::LayoutComputed => 4,
            Self::Finalized => 5,
            Self::Failed => 0,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        [
            Self::PromptBuilt,
            Self::BackendSelected,
            Self::CandidatesScored,
            Self::LayoutComputed,
            Self::Finalized,
            Self::Failed,
        ]
        .into_iter()
        .find(|stage| stage.as_str() == raw)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineFeatures {
    pub multi_pass: bool,
    pub composition_analysis: bool,
    pub prompt: PromptRichness,
    /// Decode, resize to the output canvas and re-encode as PNG.
    pub normalize_image: bool,
}

impl PipelineFeatures {
    pub fn for_version(version: PipelineVersion) -> Self {
        match version {
            PipelineVersion::V9 => Self {
                multi_pass: true,
                composition_analysis: true,
                prompt: PromptRichness::Cinematic,
                normalize_image: true,
            },
            PipelineVersion::V8 => Self {
                multi_pass: false,
                composition_analysis: true,
                prompt: PromptRichness::Cinematic,
                normalize_image: true,
            },
            PipelineVersion::V3 => Self {
                multi_pass: false,
                composition_analysis: false,
                prompt: PromptRichness::Cinematic,
                normalize_image: true,
            },
            PipelineVersion::V2 => Self {
                multi_pass: false,
                composition_analysis: false,
                prompt: PromptRichness::Plain,
                normalize_image: false,
            },
        }
    }
}

/// Successful run of one pipeline version.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub variants: Vec<Variant>,
    pub warnings: Vec<String>,
    pub trace: Vec<PipelineStage>,
}

pub trait PipelineStrategy {
    fn version(&self) -> PipelineVersion;
    fn run(&self, request: &GenerationRequest, events: &EventWriter) -> EngineResult<PipelineRun>;
}

/// Everything a staged run reads. All of it is shared and read-only.
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub tables: &'a EngineTables,
    pub config: &'a EngineConfig,
    pub backends: &'a BackendSet,
}

pub struct StagedPipeline<'a> {
    version: PipelineVersion,
    features: PipelineFeatures,
    ctx: PipelineContext<'a>,
}

impl<'a> StagedPipeline<'a> {
    pub fn new(version: PipelineVersion, ctx: PipelineContext<'a>) -> Self {
        Self {
            version,
            features: PipelineFeatures::for_version(version),
            ctx,
        }
    }

    pub fn with_features(mut self, features: PipelineFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn features(&self) -> PipelineFeatures {
        self.features
    }

    fn fail(&self, stage: PipelineStage, msg: impl Into<String>) -> EngineError {
        EngineError::version_failed(self.version, stage, msg)
    }

    fn reached(&self, stage: PipelineStage, trace: &mut Vec<PipelineStage>, events: &EventWriter) {
        trace.push(stage);
        let mut payload = EventPayload::new();
        payload.insert("version".to_string(), json!(self.version));
        payload.insert("stage".to_string(), json!(stage.as_str()));
        if let Err(err) = events.emit("stage_completed", payload) {
            tracing::warn!(error = %err, "failed to write stage_completed event");
        }
    }

    fn canvas(&self) -> Canvas {
        Canvas::new(
            self.ctx.config.output_width as f64,
            self.ctx.config.output_height as f64,
        )
    }

    fn candidate_count(&self, request: &GenerationRequest) -> (usize, usize) {
        let wanted = request.normalized_variant_count();
        if !self.features.multi_pass {
            return (wanted as usize, wanted as usize);
        }
        let selection = &self.ctx.config.selection;
        let generate = (wanted + selection.extra_for(request.quality_tier))
            .min(selection.max_candidates)
            .max(wanted);
        (generate as usize, wanted as usize)
    }

    fn composition_request(&self, request: &GenerationRequest) -> CompositionRequest {
        let style = self.ctx.tables.style(request.creator_style.as_deref());
        let mut sides = style.text_sides.clone();
        if let Some(niche) = self.ctx.tables.niche(request.niche.as_deref()) {
            sides.extend(niche.text_sides.iter().copied());
        }
        let font = FitConstraints::from(&self.ctx.config.layout).scaled_for(&self.canvas());
        CompositionRequest {
            text_len: request
                .overlay_text()
                .map(|text| text.chars().count())
                .unwrap_or(0),
            font_size: font.max_font_size,
            preferred_zone: request.placement.text_zone.clone(),
            preferred_sides: sides,
            platform: self.ctx.config.layout.platform,
        }
    }

    /// Canvas of the image the caller will receive. Normalized output is
    /// resized to the configured size; passthrough keeps the source size.
    fn delivered_canvas(&self, scored: &ScoredCandidate) -> Canvas {
        if self.features.normalize_image {
            return self.canvas();
        }
        match source_dimensions(&scored.candidate.image.bytes) {
            Some((width, height)) => Canvas::new(width as f64, height as f64),
            None => self.canvas(),
        }
    }

    /// Where the text goes when there is no composition analysis.
    fn default_position(&self, request: &GenerationRequest, canvas: &Canvas) -> TextPosition {
        let zone = request
            .placement
            .text_zone
            .as_deref()
            .and_then(Zone::find)
            .or_else(|| Zone::find("top-center"));
        let (x, y, anchor, name) = match zone {
            Some(zone) => (
                zone.fx * canvas.width,
                zone.fy * canvas.height,
                zone.anchor,
                zone.name,
            ),
            None => (canvas.width / 2.0, canvas.height * 0.1, Anchor::TopCenter, "top-center"),
        };
        TextPosition {
            x,
            y,
            anchor,
            score: 50.0,
            zone: name.to_string(),
            confidence: 0.5,
        }
    }

    fn layout_for(
        &self,
        text: &str,
        request: &GenerationRequest,
        scored: &ScoredCandidate,
    ) -> EngineResult<TextLayout> {
        let canvas = self.delivered_canvas(scored);
        let position = scored
            .composition
            .as_ref()
            .filter(|_| self.features.composition_analysis)
            .map(|analysis| on_canvas(&analysis.best_position, &canvas))
            .unwrap_or_else(|| self.default_position(request, &canvas));
        let style = TextStyle {
            stroke_width: self.ctx.config.layout.stroke_width,
            ..TextStyle::default()
        };
        let constraints = FitConstraints::from(&self.ctx.config.layout).scaled_for(&canvas);
        let mut fitted = layout::fit(text, &style, &position, canvas, &constraints);
        if canvas != self.canvas() {
            fitted.warnings.push(format!(
                "layout computed on the {}x{} source image",
                canvas.width, canvas.height
            ));
        }
        if !(fitted.x.is_finite() && fitted.y.is_finite() && fitted.font_size.is_finite()) {
            return Err(self.fail(
                PipelineStage::LayoutComputed,
                format!("non-finite text layout for candidate {}", scored.candidate.index),
            ));
        }
        Ok(fitted)
    }

    fn finalize(&self, scored: &ScoredCandidate) -> EngineResult<(Vec<u8>, String)> {
        let image = &scored.candidate.image;
        if !self.features.normalize_image {
            return Ok((image.bytes.clone(), image.mime.clone()));
        }
        let decoded = image::load_from_memory(&image.bytes).map_err(|err| {
            self.fail(
                PipelineStage::Finalized,
                format!(
                    "candidate {} from {} is not a decodable image: {err}",
                    scored.candidate.index, image.backend
                ),
            )
        })?;
        let (width, height) = (self.ctx.config.output_width, self.ctx.config.output_height);
        let rgb = if decoded.width() != width || decoded.height() != height {
            decoded.resize_exact(width, height, FilterType::Lanczos3).to_rgb8()
        } else {
            decoded.to_rgb8()
        };
        let bytes = encode_png(&rgb).map_err(|err| self.fail(PipelineStage::Finalized, err.to_string()))?;
        Ok((bytes, "image/png".to_string()))
    }
}

impl PipelineStrategy for StagedPipeline<'_> {
    fn version(&self) -> PipelineVersion {
        self.version
    }

    fn run(&self, request: &GenerationRequest, events: &EventWriter) -> EngineResult<PipelineRun> {
        let mut trace = Vec::new();
        let mut warnings = Vec::new();
        let tables = self.ctx.tables;
        let config = self.ctx.config;
        tracing::debug!(version = %self.version, features = ?self.features(), "pipeline run");

        let prompt = PromptBuilder::new(tables).build(request, self.features.prompt);
        tracing::debug!(version = %self.version, prompt_id = %short_id(&prompt, 0), "prompt built");
        self.reached(PipelineStage::PromptBuilt, &mut trace, events);

        let routing = RoutingInput::from_request(request);
        let decision = BackendRouter::new(tables)
            .route(&routing)
            .map_err(|err| self.fail(PipelineStage::BackendSelected, err.to_string()))?;
        let mut payload = EventPayload::new();
        payload.insert("version".to_string(), json!(self.version));
        payload.insert("decision".to_string(), json!(decision));
        if let Err(err) = events.emit("routing_decision", payload) {
            tracing::warn!(error = %err, "failed to write routing_decision event");
        }
        self.reached(PipelineStage::BackendSelected, &mut trace, events);

        let (num_to_generate, num_to_return) = self.candidate_count(request);
        let options = SelectionOptions {
            num_to_generate,
            num_to_return,
            min_score: if self.features.multi_pass {
                config.selection.min_score
            } else {
                0.0
            },
        };
        let executor = BackendExecutor::new(self.ctx.backends, &tables.backends).with_events(events);
        let scorer = QualityScorer::new(config.analysis.clone());
        let composition_request = self.composition_request(request);
        let scoring_ctx = ScoringContext {
            style: tables.style(request.creator_style.as_deref()),
            niche: tables.niche(request.niche.as_deref()),
            expects_face: routing.has_face,
            composition: self
                .features
                .composition_analysis
                .then_some(&composition_request),
        };
        let selected = MultiPassSelector::with_events(events)
            .select(
                |index| {
                    let synth = SynthesisRequest {
                        prompt: prompt.clone(),
                        width: config.output_width,
                        height: config.output_height,
                        index,
                        reference_images: request.reference_faces.clone(),
                        params: decision.params.clone(),
                    };
                    executor.execute(&decision, &synth, routing.has_face)
                },
                |candidate| scorer.score(&candidate.image.bytes, &scoring_ctx),
                &options,
            )
            .map_err(|err| self.fail(PipelineStage::CandidatesScored, err.to_string()))?;
        self.reached(PipelineStage::CandidatesScored, &mut trace, events);

        let mut layouts: Vec<Option<TextLayout>> = Vec::with_capacity(selected.len());
        for scored in &selected {
            let layout = match request.overlay_text() {
                Some(text) => {
                    let fitted = self.layout_for(text, request, scored)?;
                    for warning in &fitted.warnings {
                        warnings.push(format!("candidate {}: {warning}", scored.candidate.index));
                    }
                    Some(fitted)
                }
                None => None,
            };
            layouts.push(layout);
        }
        self.reached(PipelineStage::LayoutComputed, &mut trace, events);

        let mut variants = Vec::with_capacity(selected.len());
        for (position, (scored, text_layout)) in selected.iter().zip(layouts).enumerate() {
            let (bytes, mime) = self.finalize(scored)?;
            variants.push(Variant {
                label: variant_label(position),
                image: bytes,
                mime,
                backend: scored.candidate.image.backend.clone(),
                quality: scored.quality.clone(),
                text_layout,
                composition: scored.composition.clone(),
            });
        }
        if variants.len() < num_to_return {
            warnings.push(format!(
                "delivered {} of {} requested variants",
                variants.len(),
                num_to_return
            ));
        }
        self.reached(PipelineStage::Finalized, &mut trace, events);

        Ok(PipelineRun {
            variants,
            warnings,
            trace,
        })
    }
}

fn source_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Candidates are analyzed at their native size; zones are fractional, so
/// the chosen zone is re-projected onto the output canvas.
fn on_canvas(position: &TextPosition, canvas: &Canvas) -> TextPosition {
    match Zone::find(&position.zone) {
        Some(zone) => TextPosition {
            x: zone.fx * canvas.width,
            y: zone.fy * canvas.height,
            anchor: zone.anchor,
            ..position.clone()
        },
        None => position.clone(),
    }
}

/// Result of the first pipeline version that reached `FINALIZED`.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub variants: Vec<Variant>,
    pub pipeline_version: PipelineVersion,
    pub prior_failures: Vec<VersionFailure>,
    pub warnings: Vec<String>,
    pub trace: Vec<PipelineStage>,
}

pub struct PipelineFallbackChain<'a> {
    strategies: Vec<Box<dyn PipelineStrategy + 'a>>,
}

impl<'a> PipelineFallbackChain<'a> {
    pub fn new(strategies: Vec<Box<dyn PipelineStrategy + 'a>>) -> Self {
        Self { strategies }
    }

    /// Staged pipelines for `versions`, in the given order.
    pub fn standard(ctx: PipelineContext<'a>, versions: &[PipelineVersion]) -> Self {
        Self::new(
            versions
                .iter()
                .map(|version| {
                    Box::new(StagedPipeline::new(*version, ctx)) as Box<dyn PipelineStrategy + 'a>
                })
                .collect(),
        )
    }

    pub fn versions(&self) -> Vec<PipelineVersion> {
        self.strategies.iter().map(|strategy| strategy.version()).collect()
    }

    pub fn run(&self, request: &GenerationRequest, events: &EventWriter) -> EngineResult<PipelineOutcome> {
        let mut failures: Vec<VersionFailure> = Vec::new();
        for strategy in &self.strategies {
            let version = strategy.version();
            let mut payload = EventPayload::new();
            payload.insert("version".to_string(), json!(version));
            payload.insert("attempt".to_string(), json!(failures.len() + 1));
            if let Err(err) = events.emit("pipeline_attempt", payload) {
                tracing::warn!(error = %err, "failed to write pipeline_attempt event");
            }

            match strategy.run(request, events) {
                Ok(run) => {
                    let mut warnings = run.warnings;
                    if !failures.is_empty() {
                        warnings.insert(
                            0,
                            format!(
                                "completed with pipeline {version} after {} failed version(s)",
                                failures.len()
                            ),
                        );
                    }
                    return Ok(PipelineOutcome {
                        variants: run.variants,
                        pipeline_version: version,
                        prior_failures: failures,
                        warnings,
                        trace: run.trace,
                    });
                }
                Err(err) => {
                    let (stage, message) = match &err {
                        EngineError::PipelineVersionFailed { stage, message, .. } => {
                            (*stage, message.clone())
                        }
                        other => (PipelineStage::Failed, other.to_string()),
                    };
                    tracing::warn!(%version, %stage, error = %message, "pipeline version failed");
                    let mut payload = EventPayload::new();
                    payload.insert("version".to_string(), json!(version));
                    payload.insert("stage".to_string(), json!(stage.as_str()));
                    payload.insert("error".to_string(), json!(message));
                    if let Err(err) = events.emit("pipeline_failed", payload) {
                        tracing::warn!(error = %err, "failed to write pipeline_failed event");
                    }
                    failures.push(VersionFailure {
                        version,
                        stage: stage.as_str().to_string(),
                        message,
                    });
                }
            }
        }

        let message = most_specific(&failures)
            .unwrap_or_else(|| "no pipeline versions configured".to_string());
        Err(EngineError::AllPipelineVersionsFailed { message, failures })
    }
}

/// The failure that got furthest through the stages; ties go to the richer
/// (earlier) version.
fn most_specific(failures: &[VersionFailure]) -> Option<String> {
    let rank = |failure: &VersionFailure| {
        PipelineStage::parse(&failure.stage)
            .map(|stage| stage.rank())
            .unwrap_or(0)
    };
    let mut best: Option<&VersionFailure> = None;
    for failure in failures {
        if best.map(|current| rank(failure) > rank(current)).unwrap_or(true) {
            best = Some(failure);
        }
    }
    best.map(|failure| {
        format!(
            "pipeline {} failed at {}: {}",
            failure.version, failure.stage, failure.message
        )
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::Result;
    use thumbforge_contracts::request::ReferenceImage;

    use super::*;
    use crate::backends::{DryrunBackend, SynthesisBackend, SynthesizedImage};

    struct Scripted<'c> {
        version: PipelineVersion,
        fail_at: Option<PipelineStage>,
        calls: &'c Cell<usize>,
    }

    impl PipelineStrategy for Scripted<'_> {
        fn version(&self) -> PipelineVersion {
            self.version
        }

        fn run(&self, _request: &GenerationRequest, _events: &EventWriter) -> EngineResult<PipelineRun> {
            self.calls.set(self.calls.get() + 1);
            if let Some(stage) = self.fail_at {
                return Err(EngineError::version_failed(
                    self.version,
                    stage,
                    format!("{} broke", self.version),
                ));
            }
            Ok(PipelineRun {
                variants: Vec::new(),
                warnings: Vec::new(),
                trace: vec![PipelineStage::Finalized],
            })
        }
    }

    /// Returns bytes no decoder accepts.
    struct Garbage(&'static str);

    impl SynthesisBackend for Garbage {
        fn id(&self) -> &str {
            self.0
        }

        fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesizedImage> {
            Ok(SynthesizedImage {
                bytes: b"definitely not a png".to_vec(),
                mime: "application/octet-stream".to_string(),
                backend: self.0.to_string(),
            })
        }
    }

    /// Always returns the same small PNG, whatever size was asked for.
    struct FixedSize(&'static str);

    impl SynthesisBackend for FixedSize {
        fn id(&self) -> &str {
            self.0
        }

        fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesizedImage> {
            let image = image::RgbImage::from_pixel(200, 100, image::Rgb([40, 40, 40]));
            Ok(SynthesizedImage {
                bytes: encode_png(&image)?,
                mime: "image/png".to_string(),
                backend: self.0.to_string(),
            })
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            output_width: 384,
            output_height: 216,
            ..EngineConfig::default()
        }
    }

    fn request() -> GenerationRequest {
        let mut request = GenerationRequest::new("robot unboxing a tiny phone");
        request.niche = Some("tech".to_string());
        request.text = Some("TINY PHONE".to_string());
        request.variant_count = 2;
        request
    }

    #[test]
    fn second_version_wins_and_keeps_first_failure() -> anyhow::Result<()> {
        let calls = [Cell::new(0), Cell::new(0), Cell::new(0)];
        let chain = PipelineFallbackChain::new(vec![
            Box::new(Scripted {
                version: PipelineVersion::V9,
                fail_at: Some(PipelineStage::LayoutComputed),
                calls: &calls[0],
            }),
            Box::new(Scripted {
                version: PipelineVersion::V8,
                fail_at: None,
                calls: &calls[1],
            }),
            Box::new(Scripted {
                version: PipelineVersion::V3,
                fail_at: None,
                calls: &calls[2],
            }),
        ]);
        let outcome = chain.run(&request(), &EventWriter::disabled("job-f"))?;
        assert_eq!(outcome.pipeline_version, PipelineVersion::V8);
        assert_eq!(outcome.prior_failures.len(), 1);
        assert_eq!(outcome.prior_failures[0].version, PipelineVersion::V9);
        assert_eq!(outcome.prior_failures[0].stage, "LAYOUT_COMPUTED");
        assert_eq!(outcome.prior_failures[0].message, "v9 broke");
        assert_eq!(calls.iter().map(Cell::get).collect::<Vec<_>>(), vec![1, 1, 0]);
        Ok(())
    }

    #[test]
    fn all_versions_failing_reports_the_furthest_failure() {
        let calls = Cell::new(0);
        let chain = PipelineFallbackChain::new(vec![
            Box::new(Scripted {
                version: PipelineVersion::V9,
                fail_at: Some(PipelineStage::BackendSelected),
                calls: &calls,
            }),
            Box::new(Scripted {
                version: PipelineVersion::V3,
                fail_at: Some(PipelineStage::Finalized),
                calls: &calls,
            }),
        ]);
        let err = chain.run(&request(), &EventWriter::disabled("job-x")).err();
        match err {
            Some(EngineError::AllPipelineVersionsFailed { message, failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(message, "pipeline v3 failed at FINALIZED: v3 broke");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_chain_fails() {
        let chain = PipelineFallbackChain::new(Vec::new());
        assert!(matches!(
            chain.run(&request(), &EventWriter::disabled("job-e")),
            Err(EngineError::AllPipelineVersionsFailed { .. })
        ));
    }

    #[test]
    fn v9_run_delivers_labeled_variants_with_layouts() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let backends = BackendSet::dryrun(&tables.backends);
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "job-v9");
        let outcome = PipelineFallbackChain::standard(ctx, &PipelineVersion::CHAIN).run(&request(), &events)?;

        assert_eq!(outcome.pipeline_version, PipelineVersion::V9);
        assert!(outcome.prior_failures.is_empty());
        assert_eq!(outcome.variants.len(), 2);
        assert_eq!(outcome.variants[0].label, "A");
        assert_eq!(outcome.variants[1].label, "B");
        assert!(outcome.variants[0].quality.final_score >= outcome.variants[1].quality.final_score);
        assert_eq!(
            outcome.trace,
            vec![
                PipelineStage::PromptBuilt,
                PipelineStage::BackendSelected,
                PipelineStage::CandidatesScored,
                PipelineStage::LayoutComputed,
                PipelineStage::Finalized,
            ]
        );
        for variant in &outcome.variants {
            assert_eq!(variant.backend, "creative");
            assert!(variant.composition.is_some());
            let layout = variant.text_layout.as_ref().ok_or_else(|| anyhow::anyhow!("no layout"))?;
            let overlay = Canvas::new(384.0, 216.0).duration_overlay().rect;
            assert!(!layout.bounds.intersects(&overlay));
            let decoded = image::load_from_memory(&variant.image)?;
            assert_eq!((decoded.width(), decoded.height()), (384, 216));
        }

        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert!(raw.contains("\"type\":\"routing_decision\""));
        assert!(raw.contains("\"type\":\"candidates_scored\""));
        assert_eq!(raw.matches("\"type\":\"stage_completed\"").count(), 5);
        Ok(())
    }

    #[test]
    fn multi_pass_generates_extra_candidates_per_tier() {
        let tables = EngineTables::default();
        let config = small_config();
        let backends = BackendSet::new();
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let v9 = StagedPipeline::new(PipelineVersion::V9, ctx);
        let v8 = StagedPipeline::new(PipelineVersion::V8, ctx);
        let mut req = request();
        req.variant_count = 4;
        req.quality_tier = thumbforge_contracts::request::QualityTier::Premium;
        assert_eq!(v9.candidate_count(&req), (5, 4));
        assert_eq!(v8.candidate_count(&req), (4, 4));
        req.variant_count = 1;
        req.quality_tier = thumbforge_contracts::request::QualityTier::Basic;
        assert_eq!(v9.candidate_count(&req), (1, 1));
    }

    #[test]
    fn undecodable_output_degrades_to_passthrough_version() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let mut backends = BackendSet::new();
        backends.register(Garbage("creative"));
        backends.register(Garbage("photoreal"));
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let outcome = PipelineFallbackChain::standard(ctx, &PipelineVersion::CHAIN)
            .run(&request(), &EventWriter::disabled("job-g"))?;
        assert_eq!(outcome.pipeline_version, PipelineVersion::V2);
        assert_eq!(outcome.prior_failures.len(), 3);
        assert!(outcome
            .prior_failures
            .iter()
            .all(|failure| failure.stage == "FINALIZED"));
        assert_eq!(outcome.variants[0].image, b"definitely not a png".to_vec());
        assert!(outcome.warnings[0].contains("after 3 failed version(s)"));
        Ok(())
    }

    #[test]
    fn partial_delivery_is_success_with_warning() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let mut backends = BackendSet::dryrun(&tables.backends);
        backends.register(DryrunBackend::new("creative").failing_on([1, 2]));
        backends.register(DryrunBackend::new("photoreal").failing_on([1, 2]));
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let mut req = request();
        req.variant_count = 3;
        req.quality_tier = thumbforge_contracts::request::QualityTier::Basic;
        let outcome = PipelineFallbackChain::standard(ctx, &[PipelineVersion::V9])
            .run(&req, &EventWriter::disabled("job-p"))?;
        assert_eq!(outcome.variants.len(), 1);
        assert!(outcome
            .warnings
            .iter()
            .any(|warning| warning == "delivered 1 of 3 requested variants"));
        Ok(())
    }

    #[test]
    fn face_request_routes_to_face_preserving_backend() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let backends = BackendSet::dryrun(&tables.backends);
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let mut req = request();
        req.reference_faces.push(ReferenceImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            mime: "image/png".to_string(),
        });
        let outcome = PipelineFallbackChain::standard(ctx, &[PipelineVersion::V8])
            .run(&req, &EventWriter::disabled("job-face"))?;
        assert!(outcome.variants.iter().all(|variant| variant.backend == "face-lock"));
        Ok(())
    }

    #[test]
    fn zone_positions_follow_the_output_canvas() {
        let analyzed = TextPosition {
            x: 88.0,
            y: 72.0,
            anchor: Anchor::TopLeft,
            score: 80.0,
            zone: "top-left".to_string(),
            confidence: 0.8,
        };
        let moved = on_canvas(&analyzed, &Canvas::new(1920.0, 1080.0));
        assert!((moved.x - 0.08 * 1920.0).abs() < 1e-9);
        assert!((moved.y - 108.0).abs() < 1e-9);
        assert_eq!(moved.confidence, 0.8);

        let custom = TextPosition {
            zone: "requested".to_string(),
            ..analyzed
        };
        assert_eq!(on_canvas(&custom, &Canvas::new(10.0, 10.0)).x, 88.0);
    }

    #[test]
    fn passthrough_lays_text_out_on_the_source_image() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let mut backends = BackendSet::new();
        backends.register(FixedSize("creative"));
        backends.register(FixedSize("photoreal"));
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let mut req = request();
        req.variant_count = 1;
        let outcome = PipelineFallbackChain::standard(ctx, &[PipelineVersion::V2])
            .run(&req, &EventWriter::disabled("job-v2"))?;
        let variant = &outcome.variants[0];
        let decoded = image::load_from_memory(&variant.image)?;
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
        let layout = variant.text_layout.as_ref().ok_or_else(|| anyhow::anyhow!("no layout"))?;
        assert!(Canvas::new(200.0, 100.0).bounds().contains(&layout.bounds) || !layout.fits);
        assert!(layout.x <= 200.0 && layout.y <= 100.0);
        assert!(outcome
            .warnings
            .iter()
            .any(|warning| warning.contains("200x100 source image")));
        Ok(())
    }

    #[test]
    fn custom_features_skip_composition_analysis() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let config = small_config();
        let backends = BackendSet::dryrun(&tables.backends);
        let ctx = PipelineContext {
            tables: &tables,
            config: &config,
            backends: &backends,
        };
        let features = PipelineFeatures {
            composition_analysis: false,
            ..PipelineFeatures::for_version(PipelineVersion::V9)
        };
        let pipeline = StagedPipeline::new(PipelineVersion::V9, ctx).with_features(features);
        assert!(!pipeline.features().composition_analysis);
        assert!(pipeline.features().multi_pass);

        let chain = PipelineFallbackChain::new(vec![Box::new(pipeline)]);
        assert_eq!(chain.versions(), vec![PipelineVersion::V9]);
        let outcome = chain.run(&request(), &EventWriter::disabled("job-custom"))?;
        assert_eq!(outcome.pipeline_version, PipelineVersion::V9);
        assert!(outcome.variants.iter().all(|variant| variant.composition.is_none()));
        assert!(outcome.variants.iter().all(|variant| variant
            .quality
            .degraded
            .iter()
            .any(|name| name == "text_readability")));
        let layout = outcome.variants[0]
            .text_layout
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no layout"))?;
        assert_eq!(layout.anchor, Anchor::TopCenter);
        Ok(())
    }

    #[test]
    fn stage_names_are_screaming_case() {
        assert_eq!(PipelineStage::CandidatesScored.to_string(), "CANDIDATES_SCORED");
        assert_eq!(PipelineStage::parse("FINALIZED"), Some(PipelineStage::Finalized));
        assert_eq!(PipelineStage::parse("nope"), None);
    }
}
