//! Output sinks: where transcriptions end up.

pub mod document;
pub mod fallback;
pub mod log_file;
pub mod render;

use std::sync::{Arc, Mutex};

pub use document::DocumentServiceSink;
pub use fallback::FallbackWriter;
pub use log_file::LogFileSink;

use super::traits::{FlushPolicy, OutputSink};
use super::types::{CompletionStatus, DestinationHandle, RunContext, RunSummary, TranscriptionResult};
use super::PipelineError;

// ──────────────────────────────────────────────
// MemorySink
// ──────────────────────────────────────────────

/// One call observed by a `MemorySink`.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Initialize {
        existing_destination: Option<String>,
    },
    WriteBatch {
        batch_number: u32,
        is_first_batch: bool,
        names: Vec<String>,
        texts: Vec<String>,
    },
    Finalize {
        result_count: usize,
        processed: u32,
        failed: u32,
        status: CompletionStatus,
    },
}

/// Recording sink for tests. The call log stays readable after the sink is
/// moved into the orchestrator.
pub struct MemorySink {
    policy: FlushPolicy,
    calls: Arc<Mutex<Vec<SinkCall>>>,
    destination: Option<String>,
    created: u32,
    fail_initialize: bool,
    fail_from_batch: Option<u32>,
}

impl MemorySink {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            calls: Arc::new(Mutex::new(Vec::new())),
            destination: None,
            created: 0,
            fail_initialize: false,
            fail_from_batch: None,
        }
    }

    /// `initialize` fails as if the service were unreachable.
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// `write_batch` fails for `batch_number` and every later batch.
    pub fn failing_from_batch(mut self, batch_number: u32) -> Self {
        self.fail_from_batch = Some(batch_number);
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<SinkCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: SinkCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn unavailable(what: &str) -> PipelineError {
        PipelineError::Unavailable {
            status: 503,
            message: format!("{what}: service unavailable"),
        }
    }
}

impl OutputSink for MemorySink {
    fn initialize(&mut self, ctx: &RunContext) -> Result<DestinationHandle, PipelineError> {
        self.record(SinkCall::Initialize {
            existing_destination: ctx.existing_destination.clone(),
        });
        if self.fail_initialize {
            return Err(Self::unavailable("create"));
        }
        let id = match ctx.existing_destination.clone().or_else(|| self.destination.clone()) {
            Some(id) => id,
            None => {
                self.created += 1;
                format!("memory-doc-{}", self.created)
            }
        };
        self.destination = Some(id.clone());
        Ok(DestinationHandle {
            location: format!("memory://{id}"),
            id,
        })
    }

    fn write_batch(
        &mut self,
        results: &[TranscriptionResult],
        batch_number: u32,
        is_first_batch: bool,
    ) -> Result<(), PipelineError> {
        self.record(SinkCall::WriteBatch {
            batch_number,
            is_first_batch,
            names: results.iter().map(|r| r.image.display_name.clone()).collect(),
            texts: results.iter().map(|r| r.text.clone()).collect(),
        });
        if self.destination.is_none() {
            return Err(PipelineError::Config("append before create".into()));
        }
        if self.fail_from_batch.is_some_and(|n| batch_number >= n) {
            return Err(Self::unavailable("append"));
        }
        Ok(())
    }

    fn finalize(
        &mut self,
        all_results: &[TranscriptionResult],
        summary: &RunSummary,
    ) -> Result<(), PipelineError> {
        self.record(SinkCall::Finalize {
            result_count: all_results.len(),
            processed: summary.processed_count,
            failed: summary.failed_count,
            status: summary.completion_status,
        });
        Ok(())
    }

    fn flush_policy(&self) -> FlushPolicy {
        self.policy
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Mode;
    use chrono::Utc;
    use uuid::Uuid;

    fn ctx() -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            mode: Mode::Cloud,
            model_name: "m".into(),
            source_description: "memory".into(),
            started_at: Utc::now(),
            image_count: 0,
            existing_destination: None,
        }
    }

    #[test]
    fn memory_sink_creates_once() {
        let mut sink = MemorySink::new(FlushPolicy::EveryBatch);
        let first = sink.initialize(&ctx()).unwrap();
        let second = sink.initialize(&ctx()).unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.created, 1);
    }

    #[test]
    fn memory_sink_rejects_append_before_create() {
        let mut sink = MemorySink::new(FlushPolicy::EveryBatch);
        assert!(sink.write_batch(&[], 1, true).is_err());
        assert_eq!(sink.log().lock().unwrap().len(), 1);
    }
}
