//! Bounded retry with escalating timeouts for remote calls.
//!
//! The same fixed schedule is used for model calls and document-service calls:
//!
//! | Attempt | Timeout | Delay before |
//! |---------|---------|--------------|
//! | 1       | 60s     | 0s           |
//! | 2       | 120s    | 30s          |
//! | 3       | 300s    | 60s          |
//!
//! Timeouts escalate faster than linearly because the first call against a
//! freshly started backend is the slow one. Only `ErrorClass::Transient`
//! errors consume another attempt; anything else returns immediately.

use std::time::{Duration, Instant};

use super::error::{ErrorClass, PipelineError};

/// One row of the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPlan {
    pub timeout: Duration,
    pub delay_before: Duration,
}

impl AttemptPlan {
    pub const fn new(timeout_secs: u64, delay_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            delay_before: Duration::from_secs(delay_secs),
        }
    }
}

const DEFAULT_SCHEDULE: [AttemptPlan; 3] = [
    AttemptPlan::new(60, 0),
    AttemptPlan::new(120, 30),
    AttemptPlan::new(300, 60),
];

/// Snapshot of the attempt in progress, handed to the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub timeout: Duration,
    pub delay_before: Duration,
    /// Error kind that caused this retry; `None` on the first attempt.
    pub exception_class: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    call_class: &'static str,
    schedule: Vec<AttemptPlan>,
}

impl RetryPolicy {
    /// Policy for AI model calls.
    pub fn model_calls() -> Self {
        Self {
            call_class: "model",
            schedule: DEFAULT_SCHEDULE.to_vec(),
        }
    }

    /// Policy for document-service and storage calls.
    pub fn document_calls() -> Self {
        Self {
            call_class: "document",
            schedule: DEFAULT_SCHEDULE.to_vec(),
        }
    }

    /// Custom schedule (tests use zero delays). An empty schedule still makes one attempt.
    pub fn with_schedule(call_class: &'static str, schedule: Vec<AttemptPlan>) -> Self {
        let schedule = if schedule.is_empty() {
            vec![DEFAULT_SCHEDULE[0]]
        } else {
            schedule
        };
        Self {
            call_class,
            schedule,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.schedule.len() as u32
    }

    /// Upper bound on time spent before the failure surfaces.
    pub fn worst_case(&self) -> Duration {
        self.schedule
            .iter()
            .map(|p| p.timeout + p.delay_before)
            .sum()
    }

    /// Run `operation`, retrying transient `PipelineError`s.
    pub fn execute<T, F>(&self, operation_name: &str, operation: F) -> Result<T, PipelineError>
    where
        F: FnMut(&RetryAttempt) -> Result<T, PipelineError>,
    {
        self.execute_classified(operation_name, operation, |e: &PipelineError| e.class(), |e| {
            e.kind_name()
        })
    }

    /// Run `operation` with a caller-supplied classifier.
    ///
    /// `classify` decides transient vs fatal; `kind` names the error for logs.
    pub fn execute_classified<T, E, F, C, K>(
        &self,
        operation_name: &str,
        mut operation: F,
        classify: C,
        kind: K,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(&RetryAttempt) -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
        K: Fn(&E) -> &'static str,
    {
        let mut previous_kind: Option<&'static str> = None;
        let mut last_error: Option<E> = None;
        let total = self.schedule.len();

        for (idx, plan) in self.schedule.iter().enumerate() {
            let attempt = RetryAttempt {
                attempt_number: idx as u32 + 1,
                timeout: plan.timeout,
                delay_before: plan.delay_before,
                exception_class: previous_kind,
            };

            if idx > 0 && !plan.delay_before.is_zero() {
                tracing::info!(
                    call_class = self.call_class,
                    operation = operation_name,
                    attempt = attempt.attempt_number,
                    delay_secs = plan.delay_before.as_secs(),
                    "Waiting before retry"
                );
                std::thread::sleep(plan.delay_before);
            }

            let start = Instant::now();
            let outcome = operation(&attempt);
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    tracing::info!(
                        call_class = self.call_class,
                        operation = operation_name,
                        attempt = attempt.attempt_number,
                        timeout_secs = plan.timeout.as_secs(),
                        elapsed_ms,
                        "Call succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    let class = classify(&e);
                    let last = idx + 1 == total;
                    tracing::warn!(
                        call_class = self.call_class,
                        operation = operation_name,
                        attempt = attempt.attempt_number,
                        max_attempts = total,
                        timeout_secs = plan.timeout.as_secs(),
                        elapsed_ms,
                        class = class.as_str(),
                        error = %e,
                        "Call failed"
                    );
                    if !class.is_retryable() {
                        return Err(e);
                    }
                    if last {
                        tracing::error!(
                            call_class = self.call_class,
                            operation = operation_name,
                            attempts = total,
                            error = %e,
                            "Retries exhausted"
                        );
                    }
                    previous_kind = Some(kind(&e));
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            // Empty schedule: a single attempt on the first default plan.
            None => operation(&RetryAttempt {
                attempt_number: 1,
                timeout: DEFAULT_SCHEDULE[0].timeout,
                delay_before: Duration::ZERO,
                exception_class: None,
            }),
        }
    }
}
