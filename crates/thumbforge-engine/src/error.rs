use thiserror::Error;
use thumbforge_contracts::jobs::{PipelineVersion, VersionFailure};

use crate::pipeline::PipelineStage;

/// A heuristic sub-computation could not produce a value.
///
/// Always recovered locally by substituting the documented default.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AnalysisError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("image too small for analysis ({width}x{height})")]
    Degenerate { width: u32, height: u32 },

    #[error("analysis disabled for this pipeline")]
    Disabled,

    #[error("non-finite metric: {0}")]
    NonFinite(&'static str),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("candidate {index} failed on backend '{backend}': {message}")]
    CandidateFailed {
        index: usize,
        backend: String,
        message: String,
    },

    #[error("generation failed on '{primary}' and fallback '{fallback}': {message}")]
    GenerationFailed {
        primary: String,
        fallback: String,
        message: String,
    },

    #[error("all {attempts} candidate generations failed; last error: {last_error}")]
    AllCandidatesFailed { attempts: usize, last_error: String },

    #[error("pipeline {version} failed at {stage}: {message}")]
    PipelineVersionFailed {
        version: PipelineVersion,
        stage: PipelineStage,
        message: String,
    },

    #[error("all pipeline versions failed: {message}")]
    AllPipelineVersionsFailed {
        message: String,
        failures: Vec<VersionFailure>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn version_failed(
        version: PipelineVersion,
        stage: PipelineStage,
        msg: impl Into<String>,
    ) -> Self {
        Self::PipelineVersionFailed {
            version,
            stage,
            message: msg.into(),
        }
    }
}
