pub mod auth;
pub mod config;
pub mod http;
pub mod pipeline;

use std::path::Path;

use tracing_subscriber::EnvFilter;

use config::RunConfig;
use pipeline::ordinal::{scan_population, PopulationScan};
use pipeline::orchestrator::ProgressFn;
use pipeline::sources::LocalFolderSource;
use pipeline::types::RunReport;
use pipeline::{ModeFactory, PipelineError};

/// Install the global subscriber. Filter: `RUST_LOG`, then `PAGESCRIBE_LOG`,
/// then `config::default_log_filter()`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(config::LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Build the strategies for `config` and execute one run.
pub fn run_from_config(config: &RunConfig, progress: ProgressFn<'_>) -> Result<RunReport, PipelineError> {
    tracing::info!("pagescribe v{}", config::APP_VERSION);
    let mut orchestrator = ModeFactory::orchestrator(config)?;
    orchestrator.run(progress)
}

/// Page-number population of the images in a local folder.
pub fn scan_folder(dir: &Path) -> Result<PopulationScan, PipelineError> {
    let names = LocalFolderSource::new(dir).image_names()?;
    Ok(scan_population(&names))
}
