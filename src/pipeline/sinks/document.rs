use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::render;
use crate::http;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::traits::{AuthenticationProvider, FlushPolicy, OutputSink};
use crate::pipeline::types::{DestinationHandle, RunContext, RunSummary, TranscriptionResult};
use crate::pipeline::PipelineError;

/// Remote structured document, appended to every batch.
///
/// - create: `POST {docs}/documents` → `{ "id": ... }`
/// - append: `POST {docs}/documents/{id}/append`
/// - view:   `{docs}/documents/{id}`
///
/// Each request carries an `Idempotency-Key` so a retried append that did
/// reach the service is not applied twice.
pub struct DocumentServiceSink {
    docs_url: String,
    title: String,
    client: reqwest::blocking::Client,
    auth: Arc<dyn AuthenticationProvider>,
    retry: RetryPolicy,
    document_id: Option<String>,
    run_key: String,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    title: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AppendRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

impl DocumentServiceSink {
    pub fn new(
        docs_url: &str,
        title: &str,
        auth: Arc<dyn AuthenticationProvider>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            docs_url: docs_url.trim_end_matches('/').to_string(),
            title: title.to_string(),
            client: http::build_client()?,
            auth,
            retry: RetryPolicy::document_calls(),
            document_id: None,
            run_key: String::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn view_url(&self, document_id: &str) -> String {
        format!("{}/documents/{}", self.docs_url, document_id)
    }

    fn append_url(&self, document_id: &str) -> String {
        format!("{}/documents/{}/append", self.docs_url, document_id)
    }

    fn create(&self, content: &str) -> Result<CreateResponse, PipelineError> {
        let url = format!("{}/documents", self.docs_url);
        let body = CreateRequest {
            title: &self.title,
            content,
        };
        let key = format!("{}-create", self.run_key);
        self.retry.execute("create_document", |attempt| {
            let credential = self.auth.acquire()?;
            let request = self
                .client
                .post(&url)
                .header("Idempotency-Key", key.as_str())
                .json(&body);
            let response = http::send(http::authorize(request, &credential), &url, attempt.timeout)?;
            http::json(response)
        })
    }

    fn append(&self, operation: &str, key: String, content: &str) -> Result<(), PipelineError> {
        let document_id = self.document_id.as_deref().ok_or_else(|| {
            PipelineError::Config("append attempted before the document was created".into())
        })?;
        let url = self.append_url(document_id);
        let body = AppendRequest { content };
        self.retry.execute(operation, |attempt| {
            let credential = self.auth.acquire()?;
            let request = self
                .client
                .post(&url)
                .header("Idempotency-Key", key.as_str())
                .json(&body);
            http::send(http::authorize(request, &credential), &url, attempt.timeout)?;
            Ok(())
        })
    }
}

impl OutputSink for DocumentServiceSink {
    fn initialize(&mut self, ctx: &RunContext) -> Result<DestinationHandle, PipelineError> {
        self.run_key = ctx.run_id.simple().to_string();
        if let Some(id) = ctx
            .existing_destination
            .clone()
            .or_else(|| self.document_id.clone())
        {
            tracing::debug!(document_id = %id, "Reusing existing document");
            self.document_id = Some(id.clone());
            return Ok(DestinationHandle {
                location: self.view_url(&id),
                id,
            });
        }

        let created = self.create(&render::header(ctx))?;
        let location = created.url.unwrap_or_else(|| self.view_url(&created.id));
        tracing::info!(document_id = %created.id, location = %location, "Created document");
        self.document_id = Some(created.id.clone());
        Ok(DestinationHandle {
            id: created.id,
            location,
        })
    }

    fn write_batch(
        &mut self,
        results: &[TranscriptionResult],
        batch_number: u32,
        is_first_batch: bool,
    ) -> Result<(), PipelineError> {
        let mut content = String::new();
        if !is_first_batch {
            content.push_str(&format!("<!-- batch {batch_number} -->\n"));
        }
        content.push_str(&render::batch(results));
        self.append(
            "append_batch",
            format!("{}-batch-{batch_number}", self.run_key),
            &content,
        )
    }

    fn finalize(
        &mut self,
        _all_results: &[TranscriptionResult],
        summary: &RunSummary,
    ) -> Result<(), PipelineError> {
        self.append(
            "append_summary",
            format!("{}-summary", self.run_key),
            &render::summary(summary),
        )
    }

    fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::EveryBatch
    }

    fn name(&self) -> &'static str {
        "document_service"
    }
}
