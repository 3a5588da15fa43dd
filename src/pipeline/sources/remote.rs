use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::http;
use crate::pipeline::filter::{is_supported_image, select_images};
use crate::pipeline::traits::{AuthenticationProvider, ImageSource};
use crate::pipeline::types::{FilterSpec, ImageRecord};
use crate::pipeline::PipelineError;

const LIST_TIMEOUT: Duration = Duration::from_secs(60);
/// Guard against a service that keeps returning page tokens.
const MAX_LIST_PAGES: usize = 1000;

/// Images in a folder of a remote storage service.
///
/// - listing: `GET {storage}/folders/{folder_id}/files?page_token=...`
/// - content: `GET {storage}/files/{file_id}/content`
pub struct RemoteStorageSource {
    storage_url: String,
    folder_id: String,
    client: reqwest::blocking::Client,
    auth: Arc<dyn AuthenticationProvider>,
}

#[derive(Deserialize)]
struct FileListing {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RemoteFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    web_link: Option<String>,
}

impl RemoteFile {
    fn is_image(&self) -> bool {
        match self.mime_type.as_deref() {
            Some(mime) => mime.starts_with("image/"),
            None => is_supported_image(&self.name),
        }
    }
}

impl RemoteStorageSource {
    pub fn new(
        storage_url: &str,
        folder_id: &str,
        auth: Arc<dyn AuthenticationProvider>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            storage_url: storage_url.trim_end_matches('/').to_string(),
            folder_id: folder_id.to_string(),
            client: http::build_client()?,
            auth,
        })
    }

    fn listing_url(&self) -> String {
        format!("{}/folders/{}/files", self.storage_url, self.folder_id)
    }

    fn content_url(&self, file_id: &str) -> String {
        format!("{}/files/{}/content", self.storage_url, file_id)
    }

    fn view_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.storage_url, file_id)
    }

    fn to_record(&self, file: RemoteFile) -> ImageRecord {
        let link = file.web_link.unwrap_or_else(|| self.view_url(&file.id));
        ImageRecord::new(file.id, file.name).with_source_link(link)
    }

    fn list_all(&self) -> Result<Vec<RemoteFile>, PipelineError> {
        let credential = self.auth.acquire()?;
        let url = self.listing_url();
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 0..MAX_LIST_PAGES {
            let mut request = self.client.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token)]);
            }
            let request = http::authorize(request, &credential);
            let listing: FileListing = http::json(http::send(request, &url, LIST_TIMEOUT)?)?;
            tracing::debug!(page, files = listing.files.len(), "Listed remote folder page");
            files.extend(listing.files);

            match listing.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
        Err(PipelineError::SourceUnreachable(format!(
            "folder {} listing did not terminate after {MAX_LIST_PAGES} pages",
            self.folder_id
        )))
    }
}

impl ImageSource for RemoteStorageSource {
    fn list(&self, filter: &FilterSpec) -> Result<Vec<ImageRecord>, PipelineError> {
        let files = self.list_all()?;
        let total = files.len();
        let records: Vec<ImageRecord> = files
            .into_iter()
            .filter(RemoteFile::is_image)
            .map(|f| self.to_record(f))
            .collect();
        tracing::debug!(
            folder = %self.folder_id,
            total,
            images = records.len(),
            "Scanned remote folder"
        );
        select_images(records, filter)
    }

    fn fetch(&self, record: &ImageRecord, timeout: Duration) -> Result<Vec<u8>, PipelineError> {
        let credential = self.auth.acquire()?;
        let url = self.content_url(&record.identity);
        let request = http::authorize(self.client.get(&url), &credential);
        let response = http::send(request, &url, timeout)?;
        let bytes = response
            .bytes()
            .map_err(|e| http::map_transport_error(&e, &url, timeout))?;
        if bytes.is_empty() {
            return Err(PipelineError::ImageUnreadable(format!(
                "{} downloaded as zero bytes",
                record.display_name
            )));
        }
        Ok(bytes.to_vec())
    }

    fn display_link(&self, record: &ImageRecord) -> String {
        if record.source_link.is_empty() {
            self.view_url(&record.identity)
        } else {
            record.source_link.clone()
        }
    }

    fn describe(&self) -> String {
        format!("remote folder {} at {}", self.folder_id, self.storage_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::pipeline::traits::Credential;

    fn source() -> RemoteStorageSource {
        RemoteStorageSource::new(
            "https://storage.example.test/v1/",
            "folder-42",
            Arc::new(StaticAuth::new(Credential::Bearer("t".into()))),
        )
        .unwrap()
    }

    #[test]
    fn urls_follow_rest_layout() {
        let s = source();
        assert_eq!(s.listing_url(), "https://storage.example.test/v1/folders/folder-42/files");
        assert_eq!(s.content_url("abc"), "https://storage.example.test/v1/files/abc/content");
    }

    #[test]
    fn listing_parses_and_filters_images() {
        let listing: FileListing = serde_json::from_str(
            r#"{
                "files": [
                    {"id": "1", "name": "scan_002.jpg", "mime_type": "image/jpeg"},
                    {"id": "2", "name": "readme.pdf", "mime_type": "application/pdf"},
                    {"id": "3", "name": "scan_001.png", "web_link": "https://view.example.test/3"}
                ],
                "next_page_token": ""
            }"#,
        )
        .unwrap();
        let s = source();
        let records: Vec<_> = listing
            .files
            .into_iter()
            .filter(RemoteFile::is_image)
            .map(|f| s.to_record(f))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ordinal, Some(2));
        assert_eq!(records[0].source_link, "https://storage.example.test/v1/files/1");
        assert_eq!(s.display_link(&records[1]), "https://view.example.test/3");
    }

    #[test]
    fn rejected_credential_fails_before_any_request() {
        let s = RemoteStorageSource::new(
            "https://storage.example.test",
            "f",
            Arc::new(StaticAuth::rejecting()),
        )
        .unwrap();
        let err = s.list(&FilterSpec::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }
}
