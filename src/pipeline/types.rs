use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ──────────────────────────────────────────────
// Work items
// ──────────────────────────────────────────────

/// One enumerable image, created fresh by every `ImageSource::list` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Opaque locator understood only by the owning source (path, remote file id).
    pub identity: String,
    pub display_name: String,
    /// Page number extracted from the filename, if any pattern matched.
    pub ordinal: Option<u64>,
    /// Citation reference (`file://` URI or remote view link).
    pub source_link: String,
}

impl ImageRecord {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let ordinal = super::ordinal::extract_ordinal(&display_name);
        Self {
            identity: identity.into(),
            display_name,
            ordinal,
            source_link: String::new(),
        }
    }

    pub fn with_source_link(mut self, link: impl Into<String>) -> Self {
        self.source_link = link.into();
        self
    }
}

/// Token counts reported by the model for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.prompt == 0 && self.completion == 0 && self.cached == 0
    }

    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.cached += other.cached;
    }
}

/// Raw output of one `AiClient::transcribe` call.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub elapsed_seconds: f64,
    pub usage: TokenUsage,
}

/// Result for one image. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub image: ImageRecord,
    /// Transcribed text, or an `[Error: ...]` placeholder.
    pub text: String,
    pub elapsed_seconds: f64,
    pub usage: TokenUsage,
    /// Set when the image ultimately failed; `text` then holds the placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResult {
    pub fn success(image: ImageRecord, transcription: Transcription) -> Self {
        Self {
            image,
            text: transcription.text,
            elapsed_seconds: transcription.elapsed_seconds,
            usage: transcription.usage,
            error: None,
        }
    }

    pub fn failure(image: ImageRecord, error: &str, elapsed_seconds: f64) -> Self {
        Self {
            image,
            text: error_placeholder(error),
            elapsed_seconds,
            usage: TokenUsage::default(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Placeholder text written in place of a failed transcription.
pub fn error_placeholder(message: &str) -> String {
    format!("[Error: {message}]")
}

// ──────────────────────────────────────────────
// Selection
// ──────────────────────────────────────────────

/// Which images a source should return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// First ordinal (or 1-based position when names carry no ordinals) to process.
    pub start_ordinal: u64,
    /// Maximum number of images; 0 means no limit.
    pub count: usize,
    /// When present, exactly these names are processed instead of the range.
    pub explicit_name_list: Option<Vec<String>>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            start_ordinal: 1,
            count: 0,
            explicit_name_list: None,
        }
    }
}

// ──────────────────────────────────────────────
// Run state
// ──────────────────────────────────────────────

/// Deployment mode; every external dependency differs between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Local folder in, plain log files out.
    Local,
    /// Remote storage in, remote document service out.
    Cloud,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Enumerating,
    Fetching,
    Transcribing,
    Recording,
    Flushing,
    Finalizing,
    Done,
    Failed,
}

/// Session-scoped mutable state, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: Uuid,
    pub mode: Mode,
    pub phase: RunPhase,
    /// Images transcribed successfully.
    pub processed_count: u32,
    /// Images that ended as error placeholders.
    pub failed_count: u32,
    pub last_successful_ordinal: Option<u64>,
    /// Set once the sink has created its destination.
    pub destination_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Start of the requested range; used by positional resume.
    pub start_ordinal: u64,
    /// True when the enumerated images carry ordinals.
    pub ordinals_available: bool,
    pub batches_flushed: u32,
    /// Display names of images that failed per-item.
    pub failed_images: Vec<String>,
    /// True once the primary sink failed and output moved to the local fallback.
    pub sink_degraded: bool,
    /// Processing order of a run selected by `retry_images`.
    pub named_selection: Option<Vec<String>>,
}

impl RunState {
    pub fn new(mode: Mode, start_ordinal: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            phase: RunPhase::Idle,
            processed_count: 0,
            failed_count: 0,
            last_successful_ordinal: None,
            destination_id: None,
            started_at: Utc::now(),
            start_ordinal: start_ordinal.max(1),
            ordinals_available: false,
            batches_flushed: 0,
            failed_images: Vec::new(),
            sink_degraded: false,
            named_selection: None,
        }
    }

    pub fn transition(&mut self, next: RunPhase) {
        if self.phase != next {
            tracing::debug!(from = ?self.phase, to = ?next, run_id = %self.run_id, "Run phase");
            self.phase = next;
        }
    }

    /// Record a successful image; advances the resume point.
    pub fn record_success(&mut self, image: &ImageRecord) {
        self.processed_count += 1;
        if let Some(ordinal) = image.ordinal {
            self.last_successful_ordinal = Some(ordinal);
        }
    }

    /// Record a per-item failure; the resume point does not move.
    pub fn record_failure(&mut self, image: &ImageRecord) {
        self.failed_count += 1;
        self.failed_images.push(image.display_name.clone());
    }

    /// Images that reached a result, successful or not.
    pub fn attempted(&self) -> u32 {
        self.processed_count + self.failed_count
    }
}

/// Context handed to `OutputSink::initialize`.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub mode: Mode,
    pub model_name: String,
    pub source_description: String,
    pub started_at: DateTime<Utc>,
    pub image_count: usize,
    /// Destination already created earlier in this run, if any.
    pub existing_destination: Option<String>,
}

/// Handle returned by `OutputSink::initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationHandle {
    pub id: String,
    /// Human-facing location (file path or document URL).
    pub location: String,
}

// ──────────────────────────────────────────────
// Summary
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    /// All images attempted, but output went to the local fallback.
    CompletedWithFallback,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithFallback => "completed_with_fallback",
            Self::Failed => "failed",
        }
    }
}

/// Snapshot produced by `MetricsAggregator::summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub model_name: String,
    pub processed_count: u32,
    pub failed_count: u32,
    pub total_tokens_by_category: TokenUsage,
    /// `None` when the model has no known rate.
    pub estimated_cost_usd: Option<f64>,
    /// Sum of per-image elapsed time.
    pub elapsed_seconds: f64,
    pub average_seconds_per_image: f64,
    pub completion_status: CompletionStatus,
}

/// What the caller gets back from a run that reached `Done`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summary: RunSummary,
    pub results: Vec<TranscriptionResult>,
    pub destination: Option<DestinationHandle>,
    pub fallback_path: Option<std::path::PathBuf>,
    /// Present when some images failed per-item and can be retried by name.
    pub retry_hint: Option<super::resume::ResumeGuidance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_record_extracts_ordinal_from_name() {
        let record = ImageRecord::new("/scans/007821451_00155.jpeg", "007821451_00155.jpeg");
        assert_eq!(record.ordinal, Some(155));
        assert!(record.source_link.is_empty());
    }

    #[test]
    fn failure_result_carries_placeholder() {
        let image = ImageRecord::new("id-1", "page_2.png");
        let result = TranscriptionResult::failure(image, "model rejected image", 1.5);
        assert!(result.is_error());
        assert_eq!(result.text, "[Error: model rejected image]");
        assert!(result.usage.is_empty());
    }

    #[test]
    fn failures_do_not_advance_resume_point() {
        let mut state = RunState::new(Mode::Cloud, 1);
        state.record_success(&ImageRecord::new("a", "scan_001.jpg"));
        state.record_failure(&ImageRecord::new("b", "scan_002.jpg"));
        assert_eq!(state.last_successful_ordinal, Some(1));
        assert_eq!(state.processed_count, 1);
        assert_eq!(state.failed_count, 1);
        assert_eq!(state.failed_images, vec!["scan_002.jpg".to_string()]);
    }

    #[test]
    fn start_ordinal_is_at_least_one() {
        let state = RunState::new(Mode::Local, 0);
        assert_eq!(state.start_ordinal, 1);
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage { prompt: 10, completion: 5, cached: 2 });
        total.add(&TokenUsage { prompt: 1, completion: 1, cached: 0 });
        assert_eq!(total, TokenUsage { prompt: 11, completion: 6, cached: 2 });
        assert_eq!(total.total(), 17);
    }

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Mode::Cloud).unwrap(), "\"cloud\"");
        let status = serde_json::to_string(&CompletionStatus::CompletedWithFallback).unwrap();
        assert_eq!(status, "\"completed_with_fallback\"");
    }
}
