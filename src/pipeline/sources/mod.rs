//! Image sources: enumerate and fetch the images of one run.

pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub use local::LocalFolderSource;
pub use remote::RemoteStorageSource;

use super::filter::select_images;
use super::traits::ImageSource;
use super::types::{FilterSpec, ImageRecord};
use super::PipelineError;

/// In-memory source for tests. Images are named, bytes are synthetic.
pub struct MemoryImageSource {
    images: Vec<(ImageRecord, Vec<u8>)>,
    fetch_failures: HashMap<String, fn() -> PipelineError>,
    fetched: Mutex<Vec<String>>,
}

impl MemoryImageSource {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let images = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let record = ImageRecord::new(format!("mem:{name}"), name)
                    .with_source_link(format!("memory://{name}"));
                (record, name.as_bytes().to_vec())
            })
            .collect();
        Self {
            images,
            fetch_failures: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch of `name` fails with `make()`.
    pub fn failing_fetch(mut self, name: &str, make: fn() -> PipelineError) -> Self {
        self.fetch_failures.insert(name.to_string(), make);
        self
    }

    /// Display names in fetch order, one entry per attempt.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl ImageSource for MemoryImageSource {
    fn list(&self, filter: &FilterSpec) -> Result<Vec<ImageRecord>, PipelineError> {
        select_images(self.images.iter().map(|(r, _)| r.clone()).collect(), filter)
    }

    fn fetch(&self, record: &ImageRecord, _timeout: Duration) -> Result<Vec<u8>, PipelineError> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(record.display_name.clone());
        }
        if let Some(make) = self.fetch_failures.get(&record.display_name) {
            return Err(make());
        }
        self.images
            .iter()
            .find(|(r, _)| r.identity == record.identity)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| PipelineError::ImageUnreadable(record.display_name.clone()))
    }

    fn display_link(&self, record: &ImageRecord) -> String {
        record.source_link.clone()
    }

    fn describe(&self) -> String {
        format!("memory ({} images)", self.images.len())
    }
}
