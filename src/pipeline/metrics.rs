//! Run-level accounting: token totals, timings and estimated cost.

use super::types::{CompletionStatus, RunSummary, TokenUsage, TranscriptionResult};

// ═══════════════════════════════════════════════════════════
// Rate table
// ═══════════════════════════════════════════════════════════

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
    pub cached_per_million: f64,
}

/// Known model families, matched by name prefix (longest prefix first).
const RATE_TABLE: &[(&str, ModelRates)] = &[
    (
        "gemini-2.5-flash-lite",
        ModelRates {
            prompt_per_million: 0.10,
            completion_per_million: 0.40,
            cached_per_million: 0.025,
        },
    ),
    (
        "gemini-2.5-flash",
        ModelRates {
            prompt_per_million: 0.30,
            completion_per_million: 2.50,
            cached_per_million: 0.075,
        },
    ),
    (
        "gemini-2.5-pro",
        ModelRates {
            prompt_per_million: 1.25,
            completion_per_million: 10.00,
            cached_per_million: 0.31,
        },
    ),
    (
        "gemini-2.0-flash",
        ModelRates {
            prompt_per_million: 0.10,
            completion_per_million: 0.40,
            cached_per_million: 0.025,
        },
    ),
];

/// Rates for `model`, or `None` if the model is not in the table.
pub fn rates_for(model: &str) -> Option<ModelRates> {
    let lowered = model.trim().to_ascii_lowercase();
    // "models/gemini-2.5-pro" and "publishers/google/models/..." name the same model.
    let name = lowered.rsplit('/').next().unwrap_or(&lowered);
    RATE_TABLE
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, rates)| *rates)
}

/// Rates for models served from local hardware.
pub const FREE: ModelRates = ModelRates {
    prompt_per_million: 0.0,
    completion_per_million: 0.0,
    cached_per_million: 0.0,
};

/// Estimated cost of `usage` at `rates`. Cached tokens are billed at the
/// cached rate instead of the prompt rate.
pub fn estimate_cost(usage: &TokenUsage, rates: &ModelRates) -> f64 {
    let fresh_prompt = usage.prompt.saturating_sub(usage.cached) as f64;
    (fresh_prompt * rates.prompt_per_million
        + usage.cached as f64 * rates.cached_per_million
        + usage.completion as f64 * rates.completion_per_million)
        / 1_000_000.0
}

// ═══════════════════════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════════════════════

/// Accumulates per-image results. Pure aggregation, no I/O.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    model_name: String,
    rates: Option<ModelRates>,
    tokens: TokenUsage,
    processed: u32,
    failed: u32,
    elapsed_seconds: f64,
}

impl MetricsAggregator {
    pub fn new(model_name: &str, rates: Option<ModelRates>) -> Self {
        if rates.is_none() {
            tracing::debug!(model = model_name, "No rate known for model, cost will not be estimated");
        }
        Self {
            model_name: model_name.to_string(),
            rates,
            tokens: TokenUsage::default(),
            processed: 0,
            failed: 0,
            elapsed_seconds: 0.0,
        }
    }

    pub fn record(&mut self, result: &TranscriptionResult) {
        if result.is_error() {
            self.failed += 1;
        } else {
            self.processed += 1;
        }
        self.tokens.add(&result.usage);
        self.elapsed_seconds += result.elapsed_seconds.max(0.0);
    }

    pub fn attempted(&self) -> u32 {
        self.processed + self.failed
    }

    pub fn average_seconds(&self) -> f64 {
        match self.attempted() {
            0 => 0.0,
            n => self.elapsed_seconds / n as f64,
        }
    }

    /// Estimated seconds left for `remaining` images at the current pace.
    pub fn eta_seconds(&self, remaining: usize) -> f64 {
        self.average_seconds() * remaining as f64
    }

    pub fn summary(&self, status: CompletionStatus) -> RunSummary {
        RunSummary {
            model_name: self.model_name.clone(),
            processed_count: self.processed,
            failed_count: self.failed,
            total_tokens_by_category: self.tokens,
            estimated_cost_usd: self.rates.map(|r| estimate_cost(&self.tokens, &r)),
            elapsed_seconds: self.elapsed_seconds,
            average_seconds_per_image: self.average_seconds(),
            completion_status: status,
        }
    }
}
