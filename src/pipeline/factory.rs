//! ModeFactory: picks one concrete strategy per seam for the configured mode.
//!
//! | Mode  | Credential (pre-flight)  | Source              | Sink                |
//! |-------|--------------------------|---------------------|---------------------|
//! | local | model credential         | LocalFolderSource   | LogFileSink         |
//! | cloud | ServiceTokenAuth         | RemoteStorageSource | DocumentServiceSink |
//!
//! The AI backend is chosen independently: `GenerativeApiClient` with
//! `ApiKeyAuth`, or `OllamaVisionClient` with `NoAuth`.

use std::sync::Arc;

use super::orchestrator::{BatchOrchestrator, OrchestratorConfig};
use super::sinks::{DocumentServiceSink, LogFileSink};
use super::sources::{LocalFolderSource, RemoteStorageSource};
use super::traits::{AiClient, AuthenticationProvider, ImageSource, OutputSink};
use super::types::Mode;
use super::vision::{GenerativeApiClient, OllamaVisionClient};
use super::PipelineError;
use crate::auth::{ApiKeyAuth, NoAuth, ServiceTokenAuth};
use crate::config::{AiBackend, RunConfig};

/// The four strategies one run uses.
pub struct StrategyBundle {
    /// Credential checked during pre-flight.
    pub auth: Arc<dyn AuthenticationProvider>,
    pub source: Arc<dyn ImageSource>,
    pub ai: Arc<dyn AiClient>,
    pub sink: Box<dyn OutputSink>,
}

pub struct ModeFactory;

impl ModeFactory {
    /// Build the strategies for `config`. The model credential is acquired
    /// here so a missing API key fails before any image is touched.
    pub fn build(config: &RunConfig) -> Result<StrategyBundle, PipelineError> {
        let model_auth: Arc<dyn AuthenticationProvider> = match config.ai_backend {
            AiBackend::GenerativeApi => Arc::new(ApiKeyAuth::from_env(&config.generative.api_key_env)),
            AiBackend::Ollama => Arc::new(NoAuth),
        };
        model_auth.acquire()?;

        let ai: Arc<dyn AiClient> = match config.ai_backend {
            AiBackend::GenerativeApi => Arc::new(GenerativeApiClient::new(
                &config.generative.base_url,
                &config.model,
                Arc::clone(&model_auth),
            )?),
            AiBackend::Ollama => Arc::new(OllamaVisionClient::new(
                &config.ollama.base_url,
                &config.model,
                Arc::clone(&model_auth),
            )?),
        };

        let bundle = match config.mode {
            Mode::Local => {
                let input_dir = config.local.input_dir.clone().ok_or_else(|| {
                    PipelineError::Config("local.input_dir is required in local mode".into())
                })?;
                StrategyBundle {
                    auth: model_auth,
                    source: Arc::new(LocalFolderSource::new(input_dir)),
                    ai,
                    sink: Box::new(LogFileSink::new(config.output_dir())),
                }
            }
            Mode::Cloud => {
                let service_auth: Arc<dyn AuthenticationProvider> = Arc::new(ServiceTokenAuth::new(
                    config.cloud.token_file.clone(),
                    config.cloud.token_env.clone(),
                ));
                StrategyBundle {
                    source: Arc::new(RemoteStorageSource::new(
                        &config.cloud.storage_url,
                        &config.cloud.folder_id,
                        Arc::clone(&service_auth),
                    )?),
                    sink: Box::new(DocumentServiceSink::new(
                        &config.cloud.document_url,
                        &config.cloud.document_title,
                        Arc::clone(&service_auth),
                    )?),
                    auth: service_auth,
                    ai,
                }
            }
        };

        tracing::info!(
            mode = %config.mode,
            auth = bundle.auth.name(),
            source = %bundle.source.describe(),
            model = bundle.ai.model_name(),
            sink = bundle.sink.name(),
            "Strategies selected"
        );
        Ok(bundle)
    }

    /// Validate `config` and assemble a ready-to-run orchestrator.
    pub fn orchestrator(config: &RunConfig) -> Result<BatchOrchestrator, PipelineError> {
        config.validate()?;
        let instructions = config.instructions_text()?;
        let strategies = Self::build(config)?;
        Ok(BatchOrchestrator::new(
            strategies,
            OrchestratorConfig {
                mode: config.mode,
                batch_size: config.batch_size,
                instructions,
                filter: config.filter_spec(),
                fallback_dir: config.fallback_dir(),
            },
        ))
    }
}
