use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::http;
use crate::pipeline::metrics::{ModelRates, FREE};
use crate::pipeline::traits::{AiClient, AuthenticationProvider};
use crate::pipeline::types::{TokenUsage, Transcription};
use crate::pipeline::PipelineError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Vision transcription through a local Ollama server.
///
/// Uses `/api/chat` with the image attached to the user message; chat-template
/// vision models reject images on `/api/generate`.
pub struct OllamaVisionClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    auth: Arc<dyn AuthenticationProvider>,
}

impl OllamaVisionClient {
    pub fn new(
        base_url: &str,
        model: &str,
        auth: Arc<dyn AuthenticationProvider>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http::build_client()?,
            auth,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl AiClient for OllamaVisionClient {
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
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: instructions,
                images: vec![encoded],
            }],
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };

        let url = self.chat_url();
        let start = Instant::now();
        let request = http::authorize(self.client.post(&url).json(&body), &credential);
        let response = http::send(request, &self.base_url, timeout)?;
        let parsed: ChatResponse = http::json(response)?;
        let elapsed_seconds = start.elapsed().as_secs_f64();

        tracing::debug!(
            model = %self.model,
            image = filename,
            prompt_tokens = parsed.prompt_eval_count,
            completion_tokens = parsed.eval_count,
            elapsed_ms = (elapsed_seconds * 1000.0) as u64,
            "Ollama transcription complete"
        );

        Ok(Transcription {
            text: parsed.message.content.trim().to_string(),
            elapsed_seconds,
            usage: TokenUsage {
                prompt: parsed.prompt_eval_count,
                completion: parsed.eval_count,
                cached: 0,
            },
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn rates(&self) -> Option<ModelRates> {
        Some(FREE)
    }
}
