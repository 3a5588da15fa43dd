//! Blocking HTTP plumbing shared by every remote strategy.
//!
//! All remote calls go through `send`, so transport failures and HTTP status
//! codes map onto `PipelineError` the same way everywhere.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::pipeline::traits::Credential;
use crate::pipeline::PipelineError;

/// Header used for API-key credentials.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Build the blocking client. Per-request timeouts come from the retry policy.
pub fn build_client() -> Result<Client, PipelineError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("pagescribe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {e}")))
}

/// Attach the credential to a request.
pub fn authorize(builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
    match credential {
        Credential::Anonymous => builder,
        Credential::ApiKey(key) => builder.header(API_KEY_HEADER, key),
        Credential::Bearer(token) => builder.bearer_auth(token),
    }
}

/// Send with `timeout` and turn failures into classified errors.
pub fn send(builder: RequestBuilder, endpoint: &str, timeout: Duration) -> Result<Response, PipelineError> {
    let response = builder
        .timeout(timeout)
        .send()
        .map_err(|e| map_transport_error(&e, endpoint, timeout))?;
    check_status(response)
}

/// Map a reqwest transport error.
pub fn map_transport_error(e: &reqwest::Error, endpoint: &str, timeout: Duration) -> PipelineError {
    if e.is_timeout() {
        PipelineError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        PipelineError::Network(format!("cannot connect to {endpoint}"))
    } else if e.is_builder() {
        PipelineError::Config(format!("invalid request for {endpoint}: {e}"))
    } else {
        PipelineError::Network(e.to_string())
    }
}

fn check_status(response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(PipelineError::from_status(status.as_u16(), truncate(&body, 500)))
}

/// Decode a JSON body, mapping failures to `ResponseParsing`.
pub fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PipelineError> {
    response
        .json()
        .map_err(|e| PipelineError::ResponseParsing(e.to_string()))
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
