//! BatchOrchestrator: drives one run from enumeration to summary.
//!
//! Strictly sequential. Results are buffered in enumeration order and flushed
//! to the sink in that same order, either every `batch_size` images
//! (`FlushPolicy::EveryBatch`) or once at the end (`FlushPolicy::EndOfRun`).
//!
//! Failure handling:
//! - per-item errors become `[Error: ...]` placeholders and the loop continues
//! - a sink failure moves all output to the local fallback file for the rest of the run
//! - a run-fatal error flushes what it can, saves everything locally and
//!   returns `PipelineError::RunFailed` carrying resume guidance

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::error::PipelineError;
use super::factory::StrategyBundle;
use super::metrics::MetricsAggregator;
use super::resume::{compute_resume, retry_hint};
use super::retry::RetryPolicy;
use super::sinks::FallbackWriter;
use super::traits::{AiClient, AuthenticationProvider, FlushPolicy, ImageSource, OutputSink};
use super::types::*;

// ──────────────────────────────────────────────
// Configuration and events
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: Mode,
    /// Images per flush for `FlushPolicy::EveryBatch` sinks.
    pub batch_size: usize,
    pub instructions: String,
    pub filter: FilterSpec,
    pub fallback_dir: PathBuf,
}

/// Progress notifications for a UI or CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    Started {
        run_id: String,
        total: usize,
        mode: Mode,
        model: String,
    },
    ImageDone {
        /// 1-based position in the run.
        index: usize,
        total: usize,
        name: String,
        ok: bool,
        eta_seconds: f64,
    },
    BatchFlushed {
        batch_number: u32,
        results: usize,
        /// True when the batch went to the local fallback instead of the sink.
        fallback: bool,
    },
    Completed {
        processed: u32,
        failed: u32,
        status: CompletionStatus,
        elapsed_seconds: f64,
    },
    Failed {
        error: String,
        resume: Option<String>,
    },
}

pub type ProgressFn<'a> = Option<&'a dyn Fn(ProgressEvent)>;

fn emit(progress: ProgressFn<'_>, event: ProgressEvent) {
    if let Some(progress) = progress {
        progress(event);
    }
}

/// Mutable bookkeeping for one run.
struct Session {
    state: RunState,
    metrics: MetricsAggregator,
    total: usize,
    all_results: Vec<TranscriptionResult>,
    buffer: Vec<TranscriptionResult>,
    destination: Option<DestinationHandle>,
    fallback: FallbackWriter,
    fallback_used: bool,
}

// ──────────────────────────────────────────────
// BatchOrchestrator
// ──────────────────────────────────────────────

pub struct BatchOrchestrator {
    auth: Arc<dyn AuthenticationProvider>,
    source: Arc<dyn ImageSource>,
    ai: Arc<dyn AiClient>,
    sink: Box<dyn OutputSink>,
    config: OrchestratorConfig,
    model_retry: RetryPolicy,
    io_retry: RetryPolicy,
}

impl BatchOrchestrator {
    pub fn new(strategies: StrategyBundle, config: OrchestratorConfig) -> Self {
        Self {
            auth: strategies.auth,
            source: strategies.source,
            ai: strategies.ai,
            sink: strategies.sink,
            config,
            model_retry: RetryPolicy::model_calls(),
            io_retry: RetryPolicy::document_calls(),
        }
    }

    /// Replace the retry schedules for model calls and for source fetches.
    pub fn with_retry_policies(mut self, model: RetryPolicy, io: RetryPolicy) -> Self {
        self.model_retry = model;
        self.io_retry = io;
        self
    }

    /// Execute the run.
    ///
    /// Pre-flight problems are returned as-is before any model call. Once
    /// images are being processed, run-fatal errors come back as
    /// `PipelineError::RunFailed`.
    pub fn run(&mut self, progress: ProgressFn<'_>) -> Result<RunReport, PipelineError> {
        let mut state = RunState::new(self.config.mode, self.config.filter.start_ordinal);
        let _span = tracing::info_span!(
            "transcription_run",
            run_id = %state.run_id,
            mode = %self.config.mode,
            model = self.ai.model_name()
        )
        .entered();

        if let Err(e) = self.preflight() {
            state.transition(RunPhase::Failed);
            tracing::error!(error = %e, class = e.class().as_str(), "Pre-flight check failed");
            emit(progress, ProgressEvent::Failed { error: e.to_string(), resume: None });
            return Err(e);
        }

        state.transition(RunPhase::Enumerating);
        let images = match self.enumerate() {
            Ok(images) => images,
            Err(e) => {
                state.transition(RunPhase::Failed);
                tracing::error!(error = %e, source = %self.source.describe(), "Image enumeration failed");
                emit(progress, ProgressEvent::Failed { error: e.to_string(), resume: None });
                return Err(e);
            }
        };
        state.ordinals_available = images.iter().any(|i| i.ordinal.is_some());
        if self.config.filter.explicit_name_list.is_some() {
            state.named_selection = Some(images.iter().map(|i| i.display_name.clone()).collect());
        }

        let fallback = FallbackWriter::new(&self.config.fallback_dir, state.run_id);
        let mut session = Session {
            metrics: MetricsAggregator::new(self.ai.model_name(), self.ai.rates()),
            total: images.len(),
            all_results: Vec::with_capacity(images.len()),
            buffer: Vec::new(),
            destination: None,
            fallback,
            fallback_used: false,
            state,
        };

        tracing::info!(
            images = session.total,
            source = %self.source.describe(),
            sink = self.sink.name(),
            batch_size = self.config.batch_size,
            ordinals = session.state.ordinals_available,
            "Starting transcription run"
        );
        emit(
            progress,
            ProgressEvent::Started {
                run_id: session.state.run_id.to_string(),
                total: session.total,
                mode: self.config.mode,
                model: self.ai.model_name().to_string(),
            },
        );

        let flush_every = match self.sink.flush_policy() {
            FlushPolicy::EveryBatch => self.config.batch_size.max(1),
            FlushPolicy::EndOfRun => usize::MAX,
        };

        for (index, image) in images.iter().enumerate() {
            let _image_span = tracing::info_span!(
                "image",
                name = %image.display_name,
                ordinal = image.ordinal,
                index = index + 1,
                total = session.total
            )
            .entered();

            let result = match self.process_image(image, &mut session.state) {
                Ok(result) => result,
                Err(fatal) => {
                    let reason = format!("run aborted at {}", image.display_name);
                    return Err(self.abort(fatal, &reason, &mut session, progress));
                }
            };

            session.state.transition(RunPhase::Recording);
            if result.is_error() {
                session.state.record_failure(image);
            } else {
                session.state.record_success(image);
            }
            session.metrics.record(&result);
            let ok = !result.is_error();
            session.all_results.push(result.clone());
            session.buffer.push(result);

            emit(
                progress,
                ProgressEvent::ImageDone {
                    index: index + 1,
                    total: session.total,
                    name: image.display_name.clone(),
                    ok,
                    eta_seconds: session.metrics.eta_seconds(session.total - index - 1),
                },
            );

            if session.buffer.len() >= flush_every {
                if let Err(e) = self.flush(&mut session, progress) {
                    return Err(self.abort(e, "local fallback unavailable", &mut session, progress));
                }
            }
        }

        if !session.buffer.is_empty() {
            if let Err(e) = self.flush(&mut session, progress) {
                return Err(self.abort(e, "local fallback unavailable", &mut session, progress));
            }
        }

        match self.finalize(&mut session) {
            Ok(summary) => Ok(self.complete(session, summary, progress)),
            Err(e) => Err(self.abort(e, "finalize failed", &mut session, progress)),
        }
    }

    // ──────────────────────────────────────────
    // Phases
    // ──────────────────────────────────────────

    fn preflight(&self) -> Result<(), PipelineError> {
        if self.config.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        if self.config.instructions.trim().is_empty() {
            return Err(PipelineError::Config("transcription instructions are empty".into()));
        }
        let credential = self.auth.acquire()?;
        if !self.auth.validate() {
            return Err(PipelineError::Auth(format!(
                "{} credential failed validation",
                self.auth.name()
            )));
        }
        tracing::debug!(
            provider = self.auth.name(),
            credential = credential.kind(),
            "Credential acquired"
        );
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<ImageRecord>, PipelineError> {
        self.io_retry
            .execute("list_images", |_| self.source.list(&self.config.filter))
            .map_err(|e| {
                if e.is_transient() {
                    PipelineError::SourceUnreachable(format!("{}: {e}", self.source.describe()))
                } else {
                    e
                }
            })
    }

    /// Fetch and transcribe one image.
    ///
    /// Returns `Err` only for errors that abort the run; everything else is
    /// folded into a failure result.
    fn process_image(
        &self,
        image: &ImageRecord,
        state: &mut RunState,
    ) -> Result<TranscriptionResult, PipelineError> {
        let start = Instant::now();

        state.transition(RunPhase::Fetching);
        let fetched = self
            .io_retry
            .execute("fetch_image", |attempt| self.source.fetch(image, attempt.timeout));
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => return Self::item_failure(image, e, start),
        };

        state.transition(RunPhase::Transcribing);
        let transcribed = self.model_retry.execute("transcribe", |attempt| {
            self.ai.transcribe(
                &bytes,
                &image.display_name,
                &self.config.instructions,
                attempt.timeout,
            )
        });
        match transcribed {
            Ok(transcription) => {
                tracing::info!(
                    chars = transcription.text.len(),
                    prompt_tokens = transcription.usage.prompt,
                    completion_tokens = transcription.usage.completion,
                    elapsed_ms = (transcription.elapsed_seconds * 1000.0) as u64,
                    "Image transcribed"
                );
                Ok(TranscriptionResult::success(image.clone(), transcription))
            }
            Err(e) => Self::item_failure(image, e, start),
        }
    }

    fn item_failure(
        image: &ImageRecord,
        error: PipelineError,
        start: Instant,
    ) -> Result<TranscriptionResult, PipelineError> {
        if error.class().aborts_run() {
            return Err(error);
        }
        tracing::warn!(
            error = %error,
            class = error.class().as_str(),
            "Image failed, recording placeholder"
        );
        Ok(TranscriptionResult::failure(
            image.clone(),
            &error.to_string(),
            start.elapsed().as_secs_f64(),
        ))
    }

    fn context(&self, session: &Session) -> RunContext {
        RunContext {
            run_id: session.state.run_id,
            mode: self.config.mode,
            model_name: self.ai.model_name().to_string(),
            source_description: self.source.describe(),
            started_at: session.state.started_at,
            image_count: session.total,
            existing_destination: session.state.destination_id.clone(),
        }
    }

    /// Create the destination on first use; later calls reuse it.
    fn ensure_destination(&mut self, session: &mut Session) -> Result<(), PipelineError> {
        if session.state.destination_id.is_some() {
            return Ok(());
        }
        let ctx = self.context(session);
        let handle = self.sink.initialize(&ctx)?;
        tracing::info!(destination = %handle.location, "Destination ready");
        session.state.destination_id = Some(handle.id.clone());
        session.destination = Some(handle);
        Ok(())
    }

    /// Write the buffer to the sink, or to the fallback once the sink has failed.
    ///
    /// Only a fallback failure is returned as an error.
    fn flush(&mut self, session: &mut Session, progress: ProgressFn<'_>) -> Result<(), PipelineError> {
        session.state.transition(RunPhase::Flushing);
        let batch_number = session.state.batches_flushed + 1;

        if !session.state.sink_degraded {
            let is_first_batch = session.state.batches_flushed == 0;
            let written = self.ensure_destination(session).and_then(|()| {
                self.sink
                    .write_batch(&session.buffer, batch_number, is_first_batch)
            });
            match written {
                Ok(()) => {
                    tracing::info!(
                        batch = batch_number,
                        results = session.buffer.len(),
                        first = is_first_batch,
                        "Batch flushed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        batch = batch_number,
                        sink = self.sink.name(),
                        error = %e,
                        "Sink write failed, switching to local fallback"
                    );
                    session.state.sink_degraded = true;
                    session.fallback_used = true;
                    session
                        .fallback
                        .save_all(&format!("{} failed: {e}", self.sink.name()), &session.all_results)?;
                }
            }
        } else {
            session.fallback.append_batch(&session.buffer)?;
            tracing::info!(
                batch = batch_number,
                results = session.buffer.len(),
                path = %session.fallback.path().display(),
                "Batch written to local fallback"
            );
        }

        session.state.batches_flushed = batch_number;
        emit(
            progress,
            ProgressEvent::BatchFlushed {
                batch_number,
                results: session.buffer.len(),
                fallback: session.state.sink_degraded,
            },
        );
        session.buffer.clear();
        Ok(())
    }

    fn finalize(&mut self, session: &mut Session) -> Result<RunSummary, PipelineError> {
        session.state.transition(RunPhase::Finalizing);

        if !session.state.sink_degraded {
            let finalized = self.ensure_destination(session).and_then(|()| {
                let summary = session.metrics.summary(CompletionStatus::Completed);
                self.sink.finalize(&session.all_results, &summary)
            });
            match finalized {
                Ok(()) => return Ok(session.metrics.summary(CompletionStatus::Completed)),
                Err(e) => {
                    tracing::error!(error = %e, "Finalize failed, writing summary to local fallback");
                    session.state.sink_degraded = true;
                    session.fallback_used = true;
                    session
                        .fallback
                        .save_all(&format!("{} finalize failed: {e}", self.sink.name()), &session.all_results)?;
                }
            }
        }

        let summary = session.metrics.summary(CompletionStatus::CompletedWithFallback);
        session.fallback.append_summary(&summary)?;
        Ok(summary)
    }

    fn complete(&self, mut session: Session, summary: RunSummary, progress: ProgressFn<'_>) -> RunReport {
        session.state.transition(RunPhase::Done);
        let hint = retry_hint(&session.state);

        tracing::info!(
            status = summary.completion_status.as_str(),
            processed = summary.processed_count,
            failed = summary.failed_count,
            prompt_tokens = summary.total_tokens_by_category.prompt,
            completion_tokens = summary.total_tokens_by_category.completion,
            cost_usd = summary.estimated_cost_usd,
            elapsed_s = summary.elapsed_seconds,
            destination = session.destination.as_ref().map(|d| d.location.as_str()),
            "Run complete"
        );
        if let Some(hint) = &hint {
            tracing::warn!(failed = hint.retry_names.len(), "{}", hint.message);
        }
        if session.fallback_used {
            tracing::warn!(path = %session.fallback.path().display(), "Output was saved to the local fallback");
        }

        emit(
            progress,
            ProgressEvent::Completed {
                processed: summary.processed_count,
                failed: summary.failed_count,
                status: summary.completion_status,
                elapsed_seconds: summary.elapsed_seconds,
            },
        );

        RunReport {
            run_id: session.state.run_id,
            summary,
            results: session.all_results,
            destination: session.destination,
            fallback_path: session
                .fallback_used
                .then(|| session.fallback.path().to_path_buf()),
            retry_hint: hint,
        }
    }

    /// Abort path: flush what is buffered, save everything locally, report resume point.
    fn abort(
        &mut self,
        cause: PipelineError,
        reason: &str,
        session: &mut Session,
        progress: ProgressFn<'_>,
    ) -> PipelineError {
        tracing::error!(error = %cause, class = cause.class().as_str(), "Run-fatal error");

        if !session.buffer.is_empty() {
            if let Err(e) = self.flush(session, progress) {
                tracing::warn!(error = %e, "Best-effort flush failed");
            }
        }
        if !session.all_results.is_empty() {
            match session
                .fallback
                .save_all(&format!("{reason}: {cause}"), &session.all_results)
            {
                Ok(()) => session.fallback_used = true,
                Err(e) => tracing::warn!(error = %e, "Best-effort fallback save failed"),
            }
        }
        session.state.transition(RunPhase::Failed);

        let resume = compute_resume(&session.state);
        tracing::error!(
            next_ordinal = resume.next_ordinal,
            processed = session.state.processed_count,
            failed = session.state.failed_count,
            "{}",
            resume.message
        );
        emit(
            progress,
            ProgressEvent::Failed {
                error: cause.to_string(),
                resume: Some(resume.message.clone()),
            },
        );

        PipelineError::RunFailed {
            cause: Box::new(cause),
            resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::pipeline::retry::AttemptPlan;
    use crate::pipeline::sinks::{MemorySink, SinkCall};
    use crate::pipeline::sources::MemoryImageSource;
    use crate::pipeline::traits::Credential;
    use crate::pipeline::vision::MockAiClient;
    use std::cell::RefCell;
    use std::sync::Mutex;

    struct Harness {
        orchestrator: BatchOrchestrator,
        source: Arc<MemoryImageSource>,
        ai: Arc<MockAiClient>,
        log: Arc<Mutex<Vec<SinkCall>>>,
        dir: tempfile::TempDir,
    }

    fn instant() -> RetryPolicy {
        RetryPolicy::with_schedule("test", vec![AttemptPlan::new(1, 0); 3])
    }

    fn names(count: usize) -> Vec<String> {
        (1..=count).map(|n| format!("scan_{n}.png")).collect()
    }

    fn harness_with(
        source: MemoryImageSource,
        ai: MockAiClient,
        sink: MemorySink,
        auth: StaticAuth,
        batch_size: usize,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(source);
        let ai = Arc::new(ai);
        let log = sink.log();
        let bundle = StrategyBundle {
            auth: Arc::new(auth),
            source: source.clone(),
            ai: ai.clone(),
            sink: Box::new(sink),
        };
        let config = OrchestratorConfig {
            mode: Mode::Cloud,
            batch_size,
            instructions: "Transcribe".into(),
            filter: FilterSpec::default(),
            fallback_dir: dir.path().to_path_buf(),
        };
        Harness {
            orchestrator: BatchOrchestrator::new(bundle, config).with_retry_policies(instant(), instant()),
            source,
            ai,
            log,
            dir,
        }
    }

    fn harness(count: usize, ai: MockAiClient, sink: MemorySink, batch_size: usize) -> Harness {
        harness_with(
            MemoryImageSource::new(&names(count)),
            ai,
            sink,
            StaticAuth::new(Credential::Bearer("t".into())),
            batch_size,
        )
    }

    fn calls(h: &Harness) -> Vec<SinkCall> {
        h.log.lock().unwrap().clone()
    }

    fn initialize_count(calls: &[SinkCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, SinkCall::Initialize { .. }))
            .count()
    }

    fn batches(calls: &[SinkCall]) -> Vec<(u32, bool, Vec<String>)> {
        calls
            .iter()
            .filter_map(|c| match c {
                SinkCall::WriteBatch {
                    batch_number,
                    is_first_batch,
                    names,
                    ..
                } => Some((*batch_number, *is_first_batch, names.clone())),
                _ => None,
            })
            .collect()
    }

    fn fallback_text(h: &Harness) -> Option<String> {
        std::fs::read_dir(h.dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .find(|e| e.file_name().to_string_lossy().ends_with("-fallback.txt"))
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
    }

    #[test]
    fn happy_path_single_batch() {
        let mut h = harness(3, MockAiClient::new("gemini-2.5-flash"), MemorySink::new(FlushPolicy::EveryBatch), 3);
        let report = h.orchestrator.run(None).unwrap();

        let calls = calls(&h);
        assert_eq!(initialize_count(&calls), 1);
        assert_eq!(batches(&calls), vec![(1, true, names(3))]);
        assert_eq!(
            calls.last(),
            Some(&SinkCall::Finalize {
                result_count: 3,
                processed: 3,
                failed: 0,
                status: CompletionStatus::Completed,
            })
        );
        assert_eq!(report.summary.processed_count, 3);
        assert_eq!(report.summary.failed_count, 0);
        assert_eq!(report.summary.total_tokens_by_category.prompt, 300);
        assert!(report.summary.estimated_cost_usd.is_some());
        assert!(report.fallback_path.is_none());
        assert!(report.retry_hint.is_none());
        assert_eq!(report.destination.unwrap().id, "memory-doc-1");
    }

    #[test]
    fn destination_is_created_once_across_batches() {
        let mut h = harness(7, MockAiClient::new("m"), MemorySink::new(FlushPolicy::EveryBatch), 3);
        h.orchestrator.run(None).unwrap();

        let calls = calls(&h);
        assert_eq!(initialize_count(&calls), 1);
        let written = batches(&calls);
        let flags: Vec<_> = written.iter().map(|(n, first, names)| (*n, *first, names.len())).collect();
        assert_eq!(flags, vec![(1, true, 3), (2, false, 3), (3, false, 1)]);
    }

    #[test]
    fn output_order_matches_enumeration_order() {
        let source = MemoryImageSource::new(&["scan_10.png", "scan_9.png", "scan_1.png"]);
        let mut h = harness_with(
            source,
            MockAiClient::new("m"),
            MemorySink::new(FlushPolicy::EveryBatch),
            StaticAuth::new(Credential::Anonymous),
            2,
        );
        let report = h.orchestrator.run(None).unwrap();

        let expected = vec!["scan_1.png", "scan_9.png", "scan_10.png"];
        let written: Vec<String> = batches(&calls(&h)).into_iter().flat_map(|(_, _, n)| n).collect();
        assert_eq!(written, expected);
        assert_eq!(h.ai.calls(), expected);
        assert_eq!(h.source.fetched(), expected);
        let reported: Vec<_> = report.results.iter().map(|r| r.image.display_name.as_str()).collect();
        assert_eq!(reported, expected);
    }

    #[test]
    fn mid_run_fatal_keeps_flushed_batch_and_points_resume_at_failed_image() {
        let ai = MockAiClient::new("m").failing("scan_4.png", || PipelineError::Auth("token revoked".into()));
        let mut h = harness(5, ai, MemorySink::new(FlushPolicy::EveryBatch), 3);
        let events = RefCell::new(Vec::new());
        let record = |e: ProgressEvent| events.borrow_mut().push(e);

        let err = h.orchestrator.run(Some(&record)).unwrap_err();

        let resume = err.resume_guidance().expect("resume guidance").clone();
        assert_eq!(resume.next_ordinal, 4);
        assert!(resume.message.contains("start_ordinal = 4"));
        assert!(matches!(err, PipelineError::RunFailed { ref cause, .. } if matches!(**cause, PipelineError::Auth(_))));

        let calls = calls(&h);
        assert_eq!(batches(&calls), vec![(1, true, names(3))]);
        assert!(!calls.iter().any(|c| matches!(c, SinkCall::Finalize { .. })));
        assert_eq!(h.ai.call_count("scan_4.png"), 1);
        assert_eq!(h.ai.call_count("scan_5.png"), 0);

        let fallback = fallback_text(&h).expect("fallback file");
        assert!(fallback.contains("run aborted at scan_4.png"));
        assert!(fallback.contains("Transcription of scan_3.png"));

        assert!(matches!(events.borrow().last(), Some(ProgressEvent::Failed { resume: Some(_), .. })));
    }

    #[test]
    fn named_retry_runs_in_page_order_and_resumes_by_name() {
        let source = MemoryImageSource::new(&["scan_9.png", "scan_10.png", "scan_11.png"]);
        let ai = MockAiClient::new("m").failing("scan_10.png", || PipelineError::Auth("token revoked".into()));
        let mut h = harness_with(
            source,
            ai,
            MemorySink::new(FlushPolicy::EveryBatch),
            StaticAuth::new(Credential::Anonymous),
            5,
        );
        h.orchestrator.config.filter.explicit_name_list =
            Some(vec!["scan_10.png".into(), "scan_9.png".into()]);

        let err = h.orchestrator.run(None).unwrap_err();

        assert_eq!(h.ai.calls(), vec!["scan_9.png", "scan_10.png"]);
        let resume = err.resume_guidance().expect("resume guidance");
        assert_eq!(resume.next_ordinal, 10);
        assert_eq!(resume.retry_names, vec!["scan_10.png".to_string()]);
        assert!(resume.message.contains("retry_images"), "{}", resume.message);
        assert_eq!(h.ai.call_count("scan_11.png"), 0);
    }

    #[test]
    fn positional_resume_after_item_failure_does_not_repeat_work() {
        let source = MemoryImageSource::new(&["alpha.png", "bravo.png", "charlie.png", "delta.png"]);
        let ai = MockAiClient::new("m")
            .failing("bravo.png", || PipelineError::Rejected {
                status: 400,
                message: "unsupported image".into(),
            })
            .failing("delta.png", || PipelineError::Auth("token revoked".into()));
        let mut h = harness_with(
            source,
            ai,
            MemorySink::new(FlushPolicy::EveryBatch),
            StaticAuth::new(Credential::Anonymous),
            10,
        );

        let err = h.orchestrator.run(None).unwrap_err();

        let resume = err.resume_guidance().expect("resume guidance");
        assert!(!resume.ordinal_based);
        assert_eq!(resume.next_ordinal, 4);
        assert_eq!(resume.retry_names, vec!["bravo.png".to_string()]);
    }

    #[test]
    fn per_item_failure_leaves_placeholder_in_position() {
        let ai = MockAiClient::new("m").failing("scan_2.png", || PipelineError::Rejected {
            status: 400,
            message: "unsupported image".into(),
        });
        let mut h = harness(3, ai, MemorySink::new(FlushPolicy::EveryBatch), 3);
        let report = h.orchestrator.run(None).unwrap();

        assert_eq!(report.summary.processed_count, 2);
        assert_eq!(report.summary.failed_count, 1);
        assert_eq!(report.summary.completion_status, CompletionStatus::Completed);
        assert_eq!(h.ai.call_count("scan_2.png"), 1);

        let texts = calls(&h)
            .into_iter()
            .find_map(|c| match c {
                SinkCall::WriteBatch { texts, .. } => Some(texts),
                _ => None,
            })
            .unwrap();
        assert_eq!(texts[0], "Transcription of scan_1.png");
        assert!(texts[1].starts_with("[Error: "), "{}", texts[1]);
        assert_eq!(texts[2], "Transcription of scan_3.png");

        let hint = report.retry_hint.expect("retry hint");
        assert_eq!(hint.retry_names, vec!["scan_2.png".to_string()]);
    }

    #[test]
    fn transient_failures_are_retried_three_times_then_recorded() {
        let ai = MockAiClient::new("m").failing("scan_2.png", || PipelineError::Timeout(60));
        let mut h = harness(3, ai, MemorySink::new(FlushPolicy::EveryBatch), 3);
        let report = h.orchestrator.run(None).unwrap();
        assert_eq!(h.ai.call_count("scan_2.png"), 3);
        assert_eq!(report.summary.failed_count, 1);
    }

    #[test]
    fn flaky_model_recovers_within_retry_budget() {
        let ai = MockAiClient::new("m").flaky("scan_2.png", 2, || PipelineError::Network("reset".into()));
        let mut h = harness(3, ai, MemorySink::new(FlushPolicy::EveryBatch), 3);
        let report = h.orchestrator.run(None).unwrap();
        assert_eq!(h.ai.call_count("scan_2.png"), 3);
        assert_eq!(report.summary.processed_count, 3);
        assert_eq!(report.summary.failed_count, 0);
    }

    #[test]
    fn unreadable_image_is_skipped_without_model_call() {
        let source = MemoryImageSource::new(&names(3))
            .failing_fetch("scan_2.png", || PipelineError::ImageUnreadable("corrupt".into()));
        let mut h = harness_with(
            source,
            MockAiClient::new("m"),
            MemorySink::new(FlushPolicy::EveryBatch),
            StaticAuth::new(Credential::Anonymous),
            3,
        );
        let report = h.orchestrator.run(None).unwrap();
        assert_eq!(h.ai.call_count("scan_2.png"), 0);
        assert!(report.results[1].is_error());
        assert_eq!(report.summary.processed_count, 2);
    }

    #[test]
    fn sink_failure_moves_remaining_output_to_fallback() {
        let sink = MemorySink::new(FlushPolicy::EveryBatch).failing_from_batch(2);
        let mut h = harness(7, MockAiClient::new("m"), sink, 3);
        let report = h.orchestrator.run(None).unwrap();

        assert_eq!(report.summary.processed_count, 7);
        assert_eq!(report.summary.completion_status, CompletionStatus::CompletedWithFallback);
        assert!(report.fallback_path.is_some());

        let calls = calls(&h);
        let attempted: Vec<u32> = batches(&calls).iter().map(|(n, _, _)| *n).collect();
        assert_eq!(attempted, vec![1, 2]);
        assert!(!calls.iter().any(|c| matches!(c, SinkCall::Finalize { .. })));

        let fallback = fallback_text(&h).unwrap();
        for name in names(7) {
            assert!(fallback.contains(&format!("Transcription of {name}")), "{name} missing");
        }
        assert!(fallback.contains("Status: completed_with_fallback"));
    }

    #[test]
    fn unreachable_destination_still_processes_every_image() {
        let sink = MemorySink::new(FlushPolicy::EveryBatch).failing_initialize();
        let mut h = harness(4, MockAiClient::new("m"), sink, 2);
        let report = h.orchestrator.run(None).unwrap();

        assert_eq!(h.ai.calls().len(), 4);
        assert_eq!(report.summary.completion_status, CompletionStatus::CompletedWithFallback);
        let calls = calls(&h);
        assert_eq!(initialize_count(&calls), 1);
        assert!(batches(&calls).is_empty());
        assert!(fallback_text(&h).unwrap().contains("Transcription of scan_4.png"));
    }

    #[test]
    fn end_of_run_sinks_get_a_single_write() {
        let mut h = harness(5, MockAiClient::new("m"), MemorySink::new(FlushPolicy::EndOfRun), 2);
        h.orchestrator.run(None).unwrap();
        assert_eq!(batches(&calls(&h)), vec![(1, true, names(5))]);
    }

    #[test]
    fn rejected_credential_fails_before_any_model_call() {
        let mut h = harness_with(
            MemoryImageSource::new(&names(3)),
            MockAiClient::new("m"),
            MemorySink::new(FlushPolicy::EveryBatch),
            StaticAuth::rejecting(),
            3,
        );
        let err = h.orchestrator.run(None).unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
        assert!(h.ai.calls().is_empty());
        assert!(calls(&h).is_empty());
        assert!(fallback_text(&h).is_none());
    }

    #[test]
    fn empty_selection_is_pre_flight_error() {
        let mut h = harness(0, MockAiClient::new("m"), MemorySink::new(FlushPolicy::EveryBatch), 3);
        let err = h.orchestrator.run(None).unwrap_err();
        assert!(matches!(err, PipelineError::NoImages(_)));
        assert!(h.ai.calls().is_empty());
    }

    #[test]
    fn progress_events_bracket_the_run() {
        let mut h = harness(3, MockAiClient::new("m"), MemorySink::new(FlushPolicy::EveryBatch), 2);
        let events = RefCell::new(Vec::new());
        let record = |e: ProgressEvent| events.borrow_mut().push(e);
        h.orchestrator.run(Some(&record)).unwrap();

        let events = events.into_inner();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { total: 3, .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { processed: 3, .. })));
        let done = events.iter().filter(|e| matches!(e, ProgressEvent::ImageDone { .. })).count();
        let flushed = events.iter().filter(|e| matches!(e, ProgressEvent::BatchFlushed { .. })).count();
        assert_eq!(done, 3);
        assert_eq!(flushed, 2);
        let last_eta = events.iter().rev().find_map(|e| match e {
            ProgressEvent::ImageDone { eta_seconds, .. } => Some(*eta_seconds),
            _ => None,
        });
        assert_eq!(last_eta, Some(0.0));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut h = harness(3, MockAiClient::new("m"), MemorySink::new(FlushPolicy::EveryBatch), 0);
        assert!(matches!(h.orchestrator.run(None), Err(PipelineError::Config(_))));
    }
}
