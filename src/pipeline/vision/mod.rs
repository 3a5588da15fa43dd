//! AI clients: one image plus instructions in, text and token usage out.

pub mod generative;
pub mod ollama;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub use generative::GenerativeApiClient;
pub use ollama::OllamaVisionClient;
pub use prompt::{resolve_instructions, DEFAULT_INSTRUCTIONS};

use super::traits::AiClient;
use super::types::{TokenUsage, Transcription};
use super::PipelineError;

// ──────────────────────────────────────────────
// MockAiClient
// ──────────────────────────────────────────────

struct ScriptedFailure {
    /// Number of calls that fail before the image succeeds; `None` fails forever.
    times: Option<u32>,
    make: fn() -> PipelineError,
}

/// Deterministic client for tests.
///
/// Returns `"Transcription of <filename>"` unless a failure is scripted for
/// that filename. Every call is recorded.
pub struct MockAiClient {
    model: String,
    elapsed_seconds: f64,
    usage: TokenUsage,
    failures: HashMap<String, ScriptedFailure>,
    calls: Mutex<Vec<String>>,
}

impl MockAiClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            elapsed_seconds: 0.5,
            usage: TokenUsage {
                prompt: 100,
                completion: 20,
                cached: 0,
            },
            failures: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call for `filename` fails with `make()`.
    pub fn failing(mut self, filename: &str, make: fn() -> PipelineError) -> Self {
        self.failures
            .insert(filename.to_string(), ScriptedFailure { times: None, make });
        self
    }

    /// The first `times` calls for `filename` fail, later calls succeed.
    pub fn flaky(mut self, filename: &str, times: u32, make: fn() -> PipelineError) -> Self {
        self.failures.insert(
            filename.to_string(),
            ScriptedFailure {
                times: Some(times),
                make,
            },
        );
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Filenames in call order, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, filename: &str) -> usize {
        self.calls().iter().filter(|c| *c == filename).count()
    }
}

impl AiClient for MockAiClient {
    fn transcribe(
        &self,
        _image_bytes: &[u8],
        filename: &str,
        _instructions: &str,
        _timeout: Duration,
    ) -> Result<Transcription, PipelineError> {
        let attempt = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| PipelineError::Network("mock call log poisoned".into()))?;
            calls.push(filename.to_string());
            calls.iter().filter(|c| *c == filename).count() as u32
        };

        if let Some(failure) = self.failures.get(filename) {
            let still_failing = failure.times.map_or(true, |n| attempt <= n);
            if still_failing {
                return Err((failure.make)());
            }
        }

        Ok(Transcription {
            text: format!("Transcription of {filename}"),
            elapsed_seconds: self.elapsed_seconds,
            usage: self.usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
