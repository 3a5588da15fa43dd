//! Error taxonomy for the transcription pipeline.
//!
//! Every failure is a `PipelineError`; `class()` tells the orchestrator what to do
//! with it, so branching never depends on message sniffing:
//! - `Transient`: retried by `RetryPolicy`, surfaced only after exhaustion
//! - `ItemFatal`: becomes an error placeholder for one image, run continues
//! - `RunFatal`: aborts the per-image loop (flush, fallback save, resume guidance)
//! - `PreFlight`: raised before any model call is made

use thiserror::Error;

use super::resume::ResumeGuidance;

/// How the pipeline reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    ItemFatal,
    RunFatal,
    PreFlight,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ItemFatal => "item_fatal",
            Self::RunFatal => "run_fatal",
            Self::PreFlight => "pre_flight",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn aborts_run(&self) -> bool {
        matches!(self, Self::RunFatal | Self::PreFlight)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Service temporarily unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Image unreadable: {0}")]
    ImageUnreadable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No images to process: {0}")]
    NoImages(String),

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Local fallback write failed: {0}")]
    Fallback(String),

    #[error("Run failed: {cause}. {}", .resume.message)]
    RunFailed {
        cause: Box<PipelineError>,
        resume: ResumeGuidance,
    },
}

impl PipelineError {
    /// Classify this error for retry and run-control decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Unavailable { .. } => ErrorClass::Transient,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock => ErrorClass::Transient,
                _ => ErrorClass::ItemFatal,
            },
            Self::Rejected { .. } | Self::ResponseParsing(_) | Self::ImageUnreadable(_) => {
                ErrorClass::ItemFatal
            }
            Self::Auth(_) | Self::Fallback(_) | Self::RunFailed { .. } => ErrorClass::RunFatal,
            Self::Config(_) | Self::NoImages(_) | Self::SourceUnreachable(_) => {
                ErrorClass::PreFlight
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class().is_retryable()
    }

    /// Short variant name, logged as `exception_class` on retry attempts.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Unavailable { .. } => "unavailable",
            Self::Auth(_) => "auth",
            Self::Rejected { .. } => "rejected",
            Self::ResponseParsing(_) => "response_parsing",
            Self::ImageUnreadable(_) => "image_unreadable",
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::NoImages(_) => "no_images",
            Self::SourceUnreachable(_) => "source_unreachable",
            Self::Fallback(_) => "fallback",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    /// Resume guidance carried by a run-level failure, if any.
    pub fn resume_guidance(&self) -> Option<&ResumeGuidance> {
        match self {
            Self::RunFailed { resume, .. } => Some(resume),
            _ => None,
        }
    }

    /// Map an HTTP status to the matching error variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {message}")),
            408 | 429 | 500..=599 => Self::Unavailable { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_class_errors_are_transient() {
        assert_eq!(PipelineError::Network("reset".into()).class(), ErrorClass::Transient);
        assert_eq!(PipelineError::Timeout(60).class(), ErrorClass::Transient);
        assert!(PipelineError::from_status(503, "temporarily unavailable".into()).is_transient());
        assert!(PipelineError::from_status(429, "slow down".into()).is_transient());
    }

    #[test]
    fn auth_failures_abort_the_run() {
        let err = PipelineError::from_status(401, "bad token".into());
        assert!(matches!(err, PipelineError::Auth(_)));
        assert!(err.class().aborts_run());
        assert!(!err.is_transient());
    }

    #[test]
    fn malformed_request_is_item_fatal() {
        let err = PipelineError::from_status(400, "image too large".into());
        assert_eq!(err.class(), ErrorClass::ItemFatal);
    }

    #[test]
    fn io_timeouts_are_transient_but_missing_files_are_not() {
        let timeout = PipelineError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        let missing = PipelineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(timeout.is_transient());
        assert_eq!(missing.class(), ErrorClass::ItemFatal);
    }

    #[test]
    fn configuration_problems_are_pre_flight() {
        assert_eq!(PipelineError::Config("batch_size".into()).class(), ErrorClass::PreFlight);
        assert_eq!(PipelineError::NoImages("empty".into()).class(), ErrorClass::PreFlight);
    }
}
