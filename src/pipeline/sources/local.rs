use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::filter::{is_supported_image, select_images};
use crate::pipeline::traits::ImageSource;
use crate::pipeline::types::{FilterSpec, ImageRecord};
use crate::pipeline::PipelineError;

/// Images in one local folder (non-recursive).
pub struct LocalFolderSource {
    dir: PathBuf,
}

impl LocalFolderSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All supported image filenames in the folder, unsorted.
    pub fn image_names(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.scan()?.into_iter().map(|r| r.display_name).collect())
    }

    fn scan(&self) -> Result<Vec<ImageRecord>, PipelineError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::SourceUnreachable(format!("{}: {e}", self.dir.display()))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "Skipping file with non-UTF-8 name");
                continue;
            };
            if !is_supported_image(&name) {
                continue;
            }
            let path = entry.path();
            records.push(
                ImageRecord::new(path.to_string_lossy(), name).with_source_link(file_uri(&path)),
            );
        }
        Ok(records)
    }
}

/// `file://` URI for a local path, with spaces escaped.
pub fn file_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let text = absolute.to_string_lossy().replace('\\', "/").replace(' ', "%20");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

impl ImageSource for LocalFolderSource {
    fn list(&self, filter: &FilterSpec) -> Result<Vec<ImageRecord>, PipelineError> {
        let records = self.scan()?;
        tracing::debug!(dir = %self.dir.display(), found = records.len(), "Scanned local folder");
        select_images(records, filter)
    }

    fn fetch(&self, record: &ImageRecord, _timeout: Duration) -> Result<Vec<u8>, PipelineError> {
        let bytes = std::fs::read(&record.identity).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                PipelineError::ImageUnreadable(format!("{}: {e}", record.display_name))
            }
            _ => PipelineError::Io(e),
        })?;
        if bytes.is_empty() {
            return Err(PipelineError::ImageUnreadable(format!(
                "{} is empty",
                record.display_name
            )));
        }
        Ok(bytes)
    }

    fn display_link(&self, record: &ImageRecord) -> String {
        if record.source_link.is_empty() {
            file_uri(Path::new(&record.identity))
        } else {
            record.source_link.clone()
        }
    }

    fn describe(&self) -> String {
        format!("local folder {}", self.dir.display())
    }
}
