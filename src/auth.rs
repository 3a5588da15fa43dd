//! Credential providers, one per deployment shape.
//!
//! - `NoAuth`: local files and a local model server
//! - `ApiKeyAuth`: API key from an environment variable (hosted model in local mode)
//! - `ServiceTokenAuth`: bearer token from a token file or environment variable (cloud mode)
//! - `StaticAuth`: fixed credential for tests

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::pipeline::traits::{AuthenticationProvider, Credential};
use crate::pipeline::PipelineError;

pub struct NoAuth;

impl AuthenticationProvider for NoAuth {
    fn acquire(&self) -> Result<Credential, PipelineError> {
        Ok(Credential::Anonymous)
    }

    fn validate(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

// ──────────────────────────────────────────────
// API key
// ──────────────────────────────────────────────

pub struct ApiKeyAuth {
    key: Option<String>,
    env_var: String,
}

impl ApiKeyAuth {
    /// Read the key from `env_var` once, at construction.
    pub fn from_env(env_var: &str) -> Self {
        let key = std::env::var(env_var)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Self {
            key,
            env_var: env_var.to_string(),
        }
    }

    pub fn new(key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            env_var: String::new(),
        }
    }
}

impl AuthenticationProvider for ApiKeyAuth {
    fn acquire(&self) -> Result<Credential, PipelineError> {
        match &self.key {
            Some(key) => Ok(Credential::ApiKey(key.clone())),
            None => Err(PipelineError::Auth(format!(
                "no API key found; set the {} environment variable",
                self.env_var
            ))),
        }
    }

    fn validate(&self) -> bool {
        self.key
            .as_deref()
            .is_some_and(|k| !k.is_empty() && !k.chars().any(char::is_whitespace))
    }

    fn name(&self) -> &'static str {
        "api_key"
    }
}

// ──────────────────────────────────────────────
// Service token
// ──────────────────────────────────────────────

/// JSON token file as written by a service-account login helper.
#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Bearer token, re-read on every `acquire` so an external refresher can rotate it.
pub struct ServiceTokenAuth {
    token_file: Option<PathBuf>,
    token_env: Option<String>,
}

impl ServiceTokenAuth {
    pub fn new(token_file: Option<PathBuf>, token_env: Option<String>) -> Self {
        Self {
            token_file,
            token_env,
        }
    }

    fn read_token_file(path: &Path) -> Result<(String, Option<DateTime<Utc>>), PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Auth(format!("cannot read token file {}: {e}", path.display()))
        })?;
        let raw = raw.trim();
        if raw.starts_with('{') {
            let parsed: TokenFile = serde_json::from_str(raw).map_err(|e| {
                PipelineError::Auth(format!("malformed token file {}: {e}", path.display()))
            })?;
            Ok((parsed.access_token, parsed.expires_at))
        } else {
            Ok((raw.to_string(), None))
        }
    }

    fn token(&self) -> Result<(String, Option<DateTime<Utc>>), PipelineError> {
        if let Some(path) = &self.token_file {
            return Self::read_token_file(path);
        }
        if let Some(var) = &self.token_env {
            return std::env::var(var)
                .map(|t| (t.trim().to_string(), None))
                .map_err(|_| PipelineError::Auth(format!("environment variable {var} is not set")));
        }
        Err(PipelineError::Auth(
            "no service token configured (token_file or token_env)".into(),
        ))
    }
}

impl AuthenticationProvider for ServiceTokenAuth {
    fn acquire(&self) -> Result<Credential, PipelineError> {
        let (token, expires_at) = self.token()?;
        if token.is_empty() {
            return Err(PipelineError::Auth("service token is empty".into()));
        }
        if let Some(expiry) = expires_at {
            if expiry <= Utc::now() {
                return Err(PipelineError::Auth(format!(
                    "service token expired at {}",
                    expiry.to_rfc3339()
                )));
            }
        }
        Ok(Credential::Bearer(token))
    }

    fn validate(&self) -> bool {
        match self.acquire() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Service token failed validation");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "service_token"
    }
}

// ──────────────────────────────────────────────
// StaticAuth
// ──────────────────────────────────────────────

/// Fixed credential, or a fixed failure when built with `rejecting`.
pub struct StaticAuth {
    credential: Option<Credential>,
}

impl StaticAuth {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    pub fn rejecting() -> Self {
        Self { credential: None }
    }
}

impl AuthenticationProvider for StaticAuth {
    fn acquire(&self) -> Result<Credential, PipelineError> {
        self.credential
            .clone()
            .ok_or_else(|| PipelineError::Auth("credential rejected".into()))
    }

    fn validate(&self) -> bool {
        self.credential.is_some()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
