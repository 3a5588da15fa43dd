//! Strategy contracts consumed by the orchestrator.
//!
//! Four seams, one concrete implementation per mode chosen once by the factory:
//! - AuthenticationProvider: credential for remote calls
//! - ImageSource: enumerate and fetch images
//! - AiClient: one image in, text + token usage out
//! - OutputSink: create-once destination, append batches, finalize

use std::fmt;
use std::time::Duration;

use super::error::PipelineError;
use super::metrics::{rates_for, ModelRates};
use super::types::*;

/// Credential produced by an `AuthenticationProvider`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// No credential needed (local model server, local files).
    Anonymous,
    /// Sent as an API key header.
    ApiKey(String),
    /// Sent as `Authorization: Bearer`.
    Bearer(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::ApiKey(_) => "api_key",
            Self::Bearer(_) => "bearer",
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

pub trait AuthenticationProvider: Send + Sync {
    /// Obtain the credential. Fails with `PipelineError::Auth` when none is available.
    fn acquire(&self) -> Result<Credential, PipelineError>;

    /// Cheap local check that a credential looks usable.
    fn validate(&self) -> bool;

    fn name(&self) -> &'static str;
}

pub trait ImageSource: Send + Sync {
    /// Enumerate images matching `filter`, in processing order.
    fn list(&self, filter: &FilterSpec) -> Result<Vec<ImageRecord>, PipelineError>;

    /// Read the raw bytes of one image within `timeout`.
    fn fetch(&self, record: &ImageRecord, timeout: Duration) -> Result<Vec<u8>, PipelineError>;

    /// Reference usable for citation in the output.
    fn display_link(&self, record: &ImageRecord) -> String;

    /// Short description for logs and the run header.
    fn describe(&self) -> String;
}

pub trait AiClient: Send + Sync {
    /// Transcribe one image. `timeout` bounds the single HTTP call.
    fn transcribe(
        &self,
        image_bytes: &[u8],
        filename: &str,
        instructions: &str,
        timeout: Duration,
    ) -> Result<Transcription, PipelineError>;

    fn model_name(&self) -> &str;

    /// Per-token pricing used for the cost estimate; `None` when unknown.
    fn rates(&self) -> Option<ModelRates> {
        rates_for(self.model_name())
    }
}

/// When the orchestrator flushes the batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Cheap local sinks: one write after all images are processed.
    EndOfRun,
    /// Remote documents: every `batch_size` images.
    EveryBatch,
}

pub trait OutputSink: Send {
    /// Create the destination, or adopt `ctx.existing_destination` when set.
    /// Must never create a second destination for the same run.
    fn initialize(&mut self, ctx: &RunContext) -> Result<DestinationHandle, PipelineError>;

    /// Write one batch. `is_first_batch` decides create-path vs append-path content.
    fn write_batch(
        &mut self,
        results: &[TranscriptionResult],
        batch_number: u32,
        is_first_batch: bool,
    ) -> Result<(), PipelineError>;

    /// Write the run summary. Safe with zero results.
    fn finalize(
        &mut self,
        all_results: &[TranscriptionResult],
        summary: &RunSummary,
    ) -> Result<(), PipelineError>;

    fn flush_policy(&self) -> FlushPolicy;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_auth(_: &dyn AuthenticationProvider) {}
        fn _assert_source(_: &dyn ImageSource) {}
        fn _assert_ai(_: &dyn AiClient) {}
        fn _assert_sink(_: &dyn OutputSink) {}
    }

    #[test]
    fn credential_debug_redacts_secrets() {
        let shown = format!("{:?}", Credential::Bearer("s3cr3t-token".into()));
        assert!(!shown.contains("s3cr3t"));
        assert_eq!(Credential::ApiKey("k".into()).kind(), "api_key");
    }
}
