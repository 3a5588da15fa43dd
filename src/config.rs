//! Run configuration: JSON file, then environment, then command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::types::{FilterSpec, Mode};
use crate::pipeline::vision::generative::DEFAULT_GENERATIVE_URL;
use crate::pipeline::vision::ollama::DEFAULT_OLLAMA_URL;
use crate::pipeline::vision::resolve_instructions;
use crate::pipeline::PipelineError;

/// Application-level constants
pub const APP_NAME: &str = "pagescribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fallback variable for the log filter when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "PAGESCRIBE_LOG";
pub const START_ORDINAL_ENV: &str = "PAGESCRIBE_START_ORDINAL";
pub const BATCH_SIZE_ENV: &str = "PAGESCRIBE_BATCH_SIZE";
pub const MODEL_ENV: &str = "PAGESCRIBE_MODEL";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BATCH_SIZE: usize = 10;

pub fn default_log_filter() -> &'static str {
    "pagescribe=info"
}

/// Per-user data directory, `<data_local_dir>/pagescribe`.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Where local-mode transcription logs go by default.
pub fn default_output_dir() -> PathBuf {
    app_data_dir().join("output")
}

/// Where fallback copies go by default.
pub fn default_fallback_dir() -> PathBuf {
    app_data_dir().join("fallback")
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiBackend {
    /// Hosted multimodal model with an API key.
    #[default]
    GenerativeApi,
    /// Local Ollama server.
    Ollama,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub storage_url: String,
    pub folder_id: String,
    pub document_url: String,
    pub document_title: String,
    pub token_file: Option<PathBuf>,
    pub token_env: Option<String>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            storage_url: String::new(),
            folder_id: String::new(),
            document_url: String::new(),
            document_title: "Transcription".into(),
            token_file: None,
            token_env: Some("PAGESCRIBE_SERVICE_TOKEN".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeSettings {
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for GenerativeSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATIVE_URL.into(),
            api_key_env: "GEMINI_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.into(),
        }
    }
}

/// Everything needed to run one batch. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: Mode,
    pub ai_backend: AiBackend,
    pub model: String,
    pub batch_size: usize,
    /// First page number (or position) to process.
    pub start_ordinal: u64,
    /// Maximum images to process; 0 means all.
    pub count: usize,
    /// When non-empty, exactly these images are processed.
    pub retry_images: Vec<String>,
    pub instructions: Option<String>,
    pub instructions_file: Option<PathBuf>,
    pub fallback_dir: Option<PathBuf>,
    pub local: LocalSettings,
    pub cloud: CloudSettings,
    pub generative: GenerativeSettings,
    pub ollama: OllamaSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            ai_backend: AiBackend::default(),
            model: DEFAULT_MODEL.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            start_ordinal: 1,
            count: 0,
            retry_images: Vec::new(),
            instructions: None,
            instructions_file: None,
            fallback_dir: None,
            local: LocalSettings::default(),
            cloud: CloudSettings::default(),
            generative: GenerativeSettings::default(),
            ollama: OllamaSettings::default(),
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub start_ordinal: Option<u64>,
    pub count: Option<usize>,
    pub batch_size: Option<usize>,
    pub model: Option<String>,
    pub retry_images: Vec<String>,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), mode = %config.mode, "Loaded run configuration");
        Ok(config)
    }

    /// Apply `PAGESCRIBE_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), PipelineError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(START_ORDINAL_ENV) {
            self.start_ordinal = parse_env(START_ORDINAL_ENV, &value)?;
        }
        if let Some(value) = lookup(BATCH_SIZE_ENV) {
            self.batch_size = parse_env(BATCH_SIZE_ENV, &value)?;
        }
        if let Some(value) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model = value.trim().to_string();
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(start) = overrides.start_ordinal {
            self.start_ordinal = start;
        }
        if let Some(count) = overrides.count {
            self.count = count;
        }
        if let Some(size) = overrides.batch_size {
            self.batch_size = size;
        }
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if !overrides.retry_images.is_empty() {
            self.retry_images = overrides.retry_images.clone();
        }
    }

    /// Pre-flight checks that need no network access.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if self.start_ordinal == 0 {
            return fail("start_ordinal starts at 1".into());
        }
        if self.model.trim().is_empty() {
            return fail("model is empty".into());
        }
        if self.count > 0 && !self.retry_images.is_empty() {
            return fail("count and retry_images cannot be combined; retry_images selects images by name".into());
        }
        if let Some(path) = &self.instructions_file {
            if self.instructions.is_none() && !path.is_file() {
                return fail(format!("instructions_file {} does not exist", path.display()));
            }
        }

        match self.mode {
            Mode::Local => match &self.local.input_dir {
                None => return fail("local.input_dir is required in local mode".into()),
                Some(dir) if !dir.is_dir() => {
                    return Err(PipelineError::SourceUnreachable(format!(
                        "input directory {} does not exist",
                        dir.display()
                    )))
                }
                Some(_) => {}
            },
            Mode::Cloud => {
                for (field, value) in [
                    ("cloud.storage_url", &self.cloud.storage_url),
                    ("cloud.document_url", &self.cloud.document_url),
                ] {
                    if !is_http_url(value) {
                        return fail(format!("{field} must be an http(s) URL"));
                    }
                }
                if self.cloud.folder_id.trim().is_empty() {
                    return fail("cloud.folder_id is required in cloud mode".into());
                }
                if self.cloud.token_file.is_none() && self.cloud.token_env.is_none() {
                    return fail("cloud mode needs cloud.token_file or cloud.token_env".into());
                }
            }
        }

        let backend_url = match self.ai_backend {
            AiBackend::GenerativeApi => &self.generative.base_url,
            AiBackend::Ollama => &self.ollama.base_url,
        };
        if !is_http_url(backend_url) {
            return fail(format!("AI backend URL {backend_url:?} must be an http(s) URL"));
        }
        Ok(())
    }

    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec {
            start_ordinal: self.start_ordinal.max(1),
            count: self.count,
            explicit_name_list: (!self.retry_images.is_empty()).then(|| self.retry_images.clone()),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.local.output_dir.clone().unwrap_or_else(default_output_dir)
    }

    pub fn fallback_dir(&self) -> PathBuf {
        self.fallback_dir.clone().unwrap_or_else(default_fallback_dir)
    }

    pub fn instructions_text(&self) -> Result<String, PipelineError> {
        resolve_instructions(self.instructions.as_deref(), self.instructions_file.as_deref())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{key}={value:?} is not a valid number")))
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}
