//! Text generation backends
//!
//! Provides a `GenerationBackend` trait with implementations for:
//! - **Gemini** — `generateContent` on the Gemini API
//! - **Ollama** — a local model behind `/api/generate`
//!
//! Backends make exactly one attempt per call. Retries, caching and rate
//! limiting live in `GenerationCache`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

// ============================================================================
// GenerationBackend trait
// ============================================================================

/// Sampling parameters passed with every prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Abstraction over text generation providers.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for `prompt`. One attempt, no retries.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no text")]
    EmptyResponse,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Unknown generation backend: {0}")]
    UnknownBackend(String),

    #[error("Generation disabled: {0}")]
    Disabled(String),
}

/// Create the configured backend.
pub fn create_backend(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationBackend>, GenerationError> {
    match config.backend.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerationClient::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerationClient::new(config)?)),
        other => Err(GenerationError::UnknownBackend(other.to_string())),
    }
}

/// Stand-in used when no backend could be configured. Every call fails, so
/// callers degrade to the fallback message.
#[derive(Debug, Clone)]
pub struct DisabledBackend {
    reason: String,
}

impl DisabledBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for DisabledBackend {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

fn http_client(timeout_seconds: u64) -> Result<Client, GenerationError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_seconds.max(1)))
        .build()?)
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiGenerationClient
// ============================================================================

/// Gemini client for `models/{model}:generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiGenerationClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiGenerationClient {
    /// The API key comes from config, falling back to `GOOGLE_API_KEY`.
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: &GenerationConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        if api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        Ok(Self {
            client: http_client(config.request_timeout_seconds)?,
            model: config.model.clone(),
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl GenerationBackend for GeminiGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
                top_p: options.top_p,
                top_k: options.top_k,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code, message = %message, "Gemini generation error");
            return Err(GenerationError::Api { code, message });
        }

        let body: GeminiResponse = response.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// OllamaGenerationClient
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Local model served by Ollama. No API key.
#[derive(Debug, Clone)]
pub struct OllamaGenerationClient {
    client: Client,
    model: String,
    base_url: String,
}

impl OllamaGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
        Self::with_base_url(config, base_url)
    }

    pub fn with_base_url(
        config: &GenerationConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client(config.request_timeout_seconds)?,
            model: config.model.clone(),
            base_url,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_output_tokens,
                top_p: options.top_p,
                top_k: options.top_k,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(code = status.as_u16(), message = %message, "Ollama generation error");
            return Err(GenerationError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: OllamaResponse = response.json().await?;
        if body.response.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(body.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// TESTS
// ============================================================================
