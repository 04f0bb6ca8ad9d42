pub mod backends;
pub mod composition;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod raster;
pub mod router;
pub mod scoring;
pub mod selector;

pub use backends::{BackendSet, DryrunBackend, HttpBackend, SynthesisBackend, SynthesisRequest, SynthesizedImage};
pub use composition::{CompositionPlanner, CompositionRequest};
pub use config::EngineConfig;
pub use engine::ThumbforgeEngine;
pub use error::{AnalysisError, EngineError, EngineResult};
pub use layout::{FitConstraints, TextStyle};
pub use pipeline::{PipelineFallbackChain, PipelineOutcome, PipelineStage, PipelineStrategy, StagedPipeline};
pub use queue::{DirJobQueue, JobQueue, RetryPolicy, Worker};
pub use router::{BackendExecutor, BackendRouter, RoutingInput};
pub use scoring::{QualityScorer, ScoringContext};
pub use selector::{MultiPassSelector, SelectionOptions};
