//! Plain-text rendering shared by the log file, document and fallback sinks.

use crate::pipeline::types::{RunContext, RunSummary, TranscriptionResult};

const RULE: &str = "────────────────────────────────────────";

pub fn header(ctx: &RunContext) -> String {
    format!(
        "Transcription run {}\nStarted: {}\nMode: {}\nModel: {}\nSource: {}\nImages: {}\n{RULE}\n\n",
        ctx.run_id,
        ctx.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ctx.mode,
        ctx.model_name,
        ctx.source_description,
        ctx.image_count,
    )
}

/// One image: heading with page number and link, then the text.
pub fn result(result: &TranscriptionResult) -> String {
    let image = &result.image;
    let heading = match image.ordinal {
        Some(n) => format!("Page {n}: {}", image.display_name),
        None => image.display_name.clone(),
    };
    let mut out = format!("## {heading}\n");
    if !image.source_link.is_empty() {
        out.push_str(&format!("Source: {}\n", image.source_link));
    }
    out.push('\n');
    out.push_str(&result.text);
    out.push_str("\n\n");
    out
}

pub fn batch(results: &[TranscriptionResult]) -> String {
    results.iter().map(result).collect()
}

pub fn summary(summary: &RunSummary) -> String {
    let tokens = &summary.total_tokens_by_category;
    let cost = match summary.estimated_cost_usd {
        Some(c) => format!("${c:.4}"),
        None => "unavailable (no rate for model)".to_string(),
    };
    format!(
        "{RULE}\nRun summary\n\
         Status: {}\n\
         Model: {}\n\
         Processed: {}\n\
         Failed: {}\n\
         Tokens: prompt {} / completion {} / cached {}\n\
         Estimated cost: {cost}\n\
         Total time: {}\n\
         Average per image: {:.1}s\n",
        summary.completion_status.as_str(),
        summary.model_name,
        summary.processed_count,
        summary.failed_count,
        tokens.prompt,
        tokens.completion,
        tokens.cached,
        format_duration(summary.elapsed_seconds),
        summary.average_seconds_per_image,
    )
}

/// `"1h 02m 05s"`, `"3m 20s"` or `"12.4s"`.
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else {
        format!("{m}m {s:02}s")
    }
}
