use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::render;
use crate::pipeline::traits::{FlushPolicy, OutputSink};
use crate::pipeline::types::{DestinationHandle, RunContext, RunSummary, TranscriptionResult};
use crate::pipeline::PipelineError;

/// Plain-text transcription log for local runs, written once at end of run.
///
/// Produces `transcription_<timestamp>_<run>.txt` and a matching `_summary.txt`.
pub struct LogFileSink {
    output_dir: PathBuf,
    log_path: Option<PathBuf>,
}

impl LogFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            log_path: None,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn require_log(&self) -> Result<&Path, PipelineError> {
        self.log_path
            .as_deref()
            .ok_or_else(|| PipelineError::Config("log file written before initialize".into()))
    }

    fn append(path: &Path, text: &str) -> Result<(), PipelineError> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}

fn summary_path(log_path: &Path) -> PathBuf {
    let stem = log_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcription".into());
    log_path.with_file_name(format!("{stem}_summary.txt"))
}

impl OutputSink for LogFileSink {
    fn initialize(&mut self, ctx: &RunContext) -> Result<DestinationHandle, PipelineError> {
        let existing = ctx
            .existing_destination
            .clone()
            .or_else(|| self.log_path.as_ref().map(|p| p.to_string_lossy().into_owned()));
        if let Some(existing) = existing {
            let path = PathBuf::from(&existing);
            let location = path.display().to_string();
            self.log_path = Some(path);
            return Ok(DestinationHandle {
                id: existing,
                location,
            });
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let run = ctx.run_id.simple().to_string();
        let name = format!(
            "transcription_{}_{}.txt",
            ctx.started_at.format("%Y%m%d_%H%M%S"),
            &run[..8]
        );
        let path = self.output_dir.join(name);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(render::header(ctx).as_bytes())?;

        tracing::info!(path = %path.display(), "Created transcription log");
        let id = path.to_string_lossy().into_owned();
        self.log_path = Some(path.clone());
        Ok(DestinationHandle {
            id,
            location: path.display().to_string(),
        })
    }

    fn write_batch(
        &mut self,
        results: &[TranscriptionResult],
        batch_number: u32,
        _is_first_batch: bool,
    ) -> Result<(), PipelineError> {
        let path = self.require_log()?;
        Self::append(path, &render::batch(results))?;
        tracing::debug!(batch = batch_number, results = results.len(), "Wrote results to log");
        Ok(())
    }

    fn finalize(
        &mut self,
        _all_results: &[TranscriptionResult],
        summary: &RunSummary,
    ) -> Result<(), PipelineError> {
        let path = self.require_log()?;
        let text = render::summary(summary);
        Self::append(path, &text)?;
        let summary_file = summary_path(path);
        std::fs::write(&summary_file, &text)?;
        tracing::info!(path = %summary_file.display(), "Wrote run summary");
        Ok(())
    }

    fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::EndOfRun
    }

    fn name(&self) -> &'static str {
        "log_file"
    }
}
