use rayon::prelude::*;
use serde_json::json;
use thumbforge_contracts::events::{EventPayload, EventWriter};
use thumbforge_contracts::layout::CompositionAnalysis;
use thumbforge_contracts::scoring::QualityScore;

use crate::backends::SynthesizedImage;
use crate::error::{EngineError, EngineResult};
use crate::scoring::ScoredAnalysis;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionOptions {
    pub num_to_generate: usize,
    pub num_to_return: usize,
    pub min_score: f64,
}

/// One raw synthesis result, owned by the selector until scored.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub image: SynthesizedImage,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub quality: QualityScore,
    pub composition: Option<CompositionAnalysis>,
}

#[derive(Default)]
pub struct MultiPassSelector<'a> {
    events: Option<&'a EventWriter>,
}

impl<'a> MultiPassSelector<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: &'a EventWriter) -> Self {
        Self {
            events: Some(events),
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Some(events) = self.events {
            if let Err(err) = events.emit(event_type, payload) {
                tracing::warn!(error = %err, event_type, "failed to write event");
            }
        }
    }

    /// Generate `num_to_generate` candidates one at a time, score the
    /// survivors in parallel, and keep the best `num_to_return`.
    ///
    /// Candidates below `min_score` are dropped only while enough remain;
    /// otherwise the full sorted list is used.
    pub fn select<G, S>(
        &self,
        mut generate: G,
        score: S,
        options: &SelectionOptions,
    ) -> EngineResult<Vec<ScoredCandidate>>
    where
        G: FnMut(usize) -> EngineResult<SynthesizedImage>,
        S: Fn(&Candidate) -> ScoredAnalysis + Sync,
    {
        if options.num_to_generate == 0 || options.num_to_return == 0 {
            return Err(EngineError::invalid_request(format!(
                "candidate counts must be positive (generate {}, return {})",
                options.num_to_generate, options.num_to_return
            )));
        }
        let mut produced = Vec::with_capacity(options.num_to_generate);
        let mut last_error: Option<String> = None;
        for index in 0..options.num_to_generate {
            match generate(index) {
                Ok(image) => produced.push(Candidate { index, image }),
                Err(err) => {
                    let failure = match err {
                        EngineError::CandidateFailed { .. } => err,
                        other => EngineError::CandidateFailed {
                            index,
                            backend: backend_of(&other),
                            message: other.to_string(),
                        },
                    };
                    tracing::warn!(index, error = %failure, "candidate skipped");
                    let mut payload = EventPayload::new();
                    payload.insert("index".to_string(), json!(index));
                    payload.insert("error".to_string(), json!(failure.to_string()));
                    self.emit("candidate_failed", payload);
                    last_error = Some(failure.to_string());
                }
            }
        }

        if produced.is_empty() {
            return Err(EngineError::AllCandidatesFailed {
                attempts: options.num_to_generate,
                last_error: last_error.unwrap_or_else(|| "nothing was generated".to_string()),
            });
        }

        let mut scored: Vec<ScoredCandidate> = produced
            .into_par_iter()
            .map(|candidate| {
                let analysis = score(&candidate);
                ScoredCandidate {
                    candidate,
                    quality: analysis.score,
                    composition: analysis.composition,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.quality
                .final_score
                .total_cmp(&a.quality.final_score)
                .then(a.candidate.index.cmp(&b.candidate.index))
        });

        let passing = scored
            .iter()
            .filter(|item| item.quality.final_score >= options.min_score)
            .count();
        let mut selected: Vec<ScoredCandidate> = if passing >= options.num_to_return {
            scored
                .into_iter()
                .filter(|item| item.quality.final_score >= options.min_score)
                .collect()
        } else {
            if passing < scored.len() {
                tracing::debug!(
                    passing,
                    available = scored.len(),
                    min_score = options.min_score,
                    "too few candidates above the bar; using unfiltered list"
                );
            }
            scored
        };
        selected.truncate(options.num_to_return);

        let mut payload = EventPayload::new();
        payload.insert(
            "scores".to_string(),
            json!(selected
                .iter()
                .map(|item| json!({
                    "index": item.candidate.index,
                    "backend": item.candidate.image.backend,
                    "final_score": item.quality.final_score,
                    "recommendation": item.quality.recommendation,
                }))
                .collect::<Vec<_>>()),
        );
        payload.insert("generated".to_string(), json!(options.num_to_generate));
        self.emit("candidates_scored", payload);

        Ok(selected)
    }
}

fn backend_of(err: &EngineError) -> String {
    match err {
        EngineError::GenerationFailed { primary, .. } => primary.clone(),
        EngineError::BackendUnavailable { backend, .. } => backend.clone(),
        _ => "unknown".to_string(),
    }
}
