pub mod error;
pub mod factory;
pub mod filter;
pub mod metrics;
pub mod orchestrator;
pub mod ordinal; // page numbers from filenames
pub mod resume;
pub mod retry;
pub mod sinks;
pub mod sources;
pub mod traits;
pub mod types;
pub mod vision;

pub use error::{ErrorClass, PipelineError};
pub use factory::{ModeFactory, StrategyBundle};
pub use orchestrator::{BatchOrchestrator, OrchestratorConfig, ProgressEvent};
