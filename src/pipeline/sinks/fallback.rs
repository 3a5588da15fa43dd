use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::render;
use crate::pipeline::types::{RunSummary, TranscriptionResult};
use crate::pipeline::PipelineError;

/// Local plain-text copy of a run, used when the primary sink is unusable.
///
/// The file is `<dir>/<run_id>-fallback.txt`. Every failure here is
/// `PipelineError::Fallback`, which aborts the run.
#[derive(Debug, Clone)]
pub struct FallbackWriter {
    path: PathBuf,
}

impl FallbackWriter {
    pub fn new(dir: &Path, run_id: Uuid) -> Self {
        Self {
            path: dir.join(format!("{run_id}-fallback.txt")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with every result known so far.
    pub fn save_all(&self, reason: &str, results: &[TranscriptionResult]) -> Result<(), PipelineError> {
        self.ensure_dir()?;
        let mut content = format!("Local fallback copy ({reason})\n\n");
        content.push_str(&render::batch(results));
        std::fs::write(&self.path, content).map_err(|e| self.error(e))?;
        tracing::warn!(
            path = %self.path.display(),
            results = results.len(),
            reason,
            "Saved results to local fallback"
        );
        Ok(())
    }

    pub fn append_batch(&self, results: &[TranscriptionResult]) -> Result<(), PipelineError> {
        self.append(&render::batch(results))
    }

    pub fn append_summary(&self, summary: &RunSummary) -> Result<(), PipelineError> {
        self.append(&render::summary(summary))
    }

    fn append(&self, text: &str) -> Result<(), PipelineError> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        file.write_all(text.as_bytes()).map_err(|e| self.error(e))
    }

    fn ensure_dir(&self) -> Result<(), PipelineError> {
        match self.path.parent() {
            Some(dir) => std::fs::create_dir_all(dir).map_err(|e| self.error(e)),
            None => Ok(()),
        }
    }

    fn error(&self, e: std::io::Error) -> PipelineError {
        PipelineError::Fallback(format!("{}: {e}", self.path.display()))
    }
}
