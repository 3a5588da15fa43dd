use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::http;
use crate::pipeline::traits::{AiClient, AuthenticationProvider};
use crate::pipeline::types::{TokenUsage, Transcription};
use crate::pipeline::PipelineError;

pub const DEFAULT_GENERATIVE_URL: &str = "https://generativelanguage.googleapis.com";

/// Hosted multimodal model reached through a `generateContent` endpoint.
pub struct GenerativeApiClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    auth: Arc<dyn AuthenticationProvider>,
}

impl GenerativeApiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        auth: Arc<dyn AuthenticationProvider>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.trim_start_matches("models/").to_string(),
            client: http::build_client()?,
            auth,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// MIME type for the inline image part, from the file extension.
fn image_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}

/// Join candidate text, or explain why there is none.
fn extract_text(response: &GenerateResponse) -> Result<String, PipelineError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(PipelineError::Rejected {
            status: 200,
            message: format!("prompt blocked: {reason}"),
        });
    }
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| PipelineError::ResponseParsing("response has no candidates".into()))?;

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    if text.trim().is_empty() {
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| *r != "STOP") {
            return Err(PipelineError::Rejected {
                status: 200,
                message: format!("generation stopped: {reason}"),
            });
        }
    }
    Ok(text.trim().to_string())
}

impl AiClient for GenerativeApiClient {
    fn transcribe(
        &self,
        image_bytes: &[u8],
        filename: &str,
        instructions: &str,
        timeout: Duration,
    ) -> Result<Transcription, PipelineError> {
        if image_bytes.is_empty() {
            return Err(PipelineError::ImageUnreadable(format!("{filename} is empty")));
        }
        let credential = self.auth.acquire()?;
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: instructions },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: image_mime(filename),
                            data: base64::engine::general_purpose::STANDARD.encode(image_bytes),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let start = Instant::now();
        let request = http::authorize(self.client.post(self.endpoint()).json(&body), &credential);
        let response = http::send(request, &self.base_url, timeout)?;
        let parsed: GenerateResponse = http::json(response)?;
        let elapsed_seconds = start.elapsed().as_secs_f64();

        let text = extract_text(&parsed)?;
        let usage = TokenUsage {
            prompt: parsed.usage_metadata.prompt_token_count,
            completion: parsed.usage_metadata.candidates_token_count,
            cached: parsed.usage_metadata.cached_content_token_count,
        };
        tracing::debug!(
            model = %self.model,
            image = filename,
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            cached_tokens = usage.cached,
            elapsed_ms = (elapsed_seconds * 1000.0) as u64,
            "Generative transcription complete"
        );

        Ok(Transcription {
            text,
            elapsed_seconds,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::pipeline::traits::Credential;

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn endpoint_uses_bare_model_name() {
        let client = GenerativeApiClient::new(
            "https://example.test/",
            "models/gemini-2.5-flash",
            Arc::new(StaticAuth::new(Credential::ApiKey("k".into()))),
        )
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(client.rates().is_some());
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(image_mime("scan_001.PNG"), "image/png");
        assert_eq!(image_mime("scan_001.jpeg"), "image/jpeg");
        assert_eq!(image_mime("no_extension"), "image/jpeg");
    }

    #[test]
    fn request_serializes_inline_image() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: "Transcribe" },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "image/png".into(),
                            data: "AAAA".into(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Transcribe");
        assert_eq!(json["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn joins_candidate_parts_and_reads_usage() {
        let response = parse(
            r#"{
                "candidates": [{"content": {"parts": [{"text": "Line one\n"}, {"text": "Line two"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 1290, "candidatesTokenCount": 85, "cachedContentTokenCount": 12}
            }"#,
        );
        assert_eq!(extract_text(&response).unwrap(), "Line one\nLine two");
        assert_eq!(response.usage_metadata.prompt_token_count, 1290);
        assert_eq!(response.usage_metadata.candidates_token_count, 85);
        assert_eq!(response.usage_metadata.cached_content_token_count, 12);
    }

    #[test]
    fn blocked_prompt_is_item_fatal() {
        let response = parse(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#);
        let err = extract_text(&response).unwrap_err();
        assert!(matches!(err, PipelineError::Rejected { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_candidates_is_a_parse_error() {
        let err = extract_text(&parse("{}")).unwrap_err();
        assert!(matches!(err, PipelineError::ResponseParsing(_)));
    }

    #[test]
    fn blank_page_with_normal_stop_is_empty_text() {
        let response = parse(r#"{"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}"#);
        assert_eq!(extract_text(&response).unwrap(), "");
    }
}
