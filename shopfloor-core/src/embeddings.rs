//! Question embeddings
//!
//! Free-text questions are embedded into the same space as the stored event
//! embeddings so they can be matched with `VectorIndexClient::nearest_to_vector`.
//! The only provider is Gemini (`embedContent` with the `RETRIEVAL_QUERY` task
//! type); `backend = "none"` disables question embedding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EmbeddingConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a search query. `None` means no embedding is available for it.
    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;

    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

/// `Ok(None)` when question embedding is switched off.
pub fn create_backend(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingBackend>>, EmbeddingError> {
    match config.backend.as_str() {
        "none" | "" => Ok(None),
        "gemini" => Ok(Some(Arc::new(GeminiEmbeddingClient::new(config)?))),
        other => Err(EmbeddingError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
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
// GeminiEmbeddingClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
    retry_delay_ms: u64,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &EmbeddingConfig, base_url: String) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        if api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries.max(1),
            retry_delay_ms: config.retry_delay_ms,
            base_url,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GeminiRequest {
            model: format!("models/{}", self.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_QUERY",
            output_dimensionality: self.dimensions,
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

            tracing::warn!(code, message = %message, "Gemini embedding error");
            return Err(EmbeddingError::Api { code, message });
        }

        let values = response.json::<GeminiResponse>().await?.embedding.values;
        if values.len() != self.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.dimensions,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        // max_retries attempts in total
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries - 1);

        match Retry::spawn(retry_strategy, || self.embed_once(text)).await {
            Ok(values) => Ok(Some(values)),
            Err(e) => {
                tracing::error!(attempts = self.max_retries, error = %e, "All embedding attempts failed");
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.max_retries,
                })
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: Option<&str>) -> EmbeddingConfig {
        EmbeddingConfig {
            backend: "gemini".to_string(),
            api_key: api_key.map(str::to_string),
            dimensions: 4,
            max_retries: 2,
            retry_delay_ms: 1,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_query_uses_retrieval_query_task() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(&test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/models/gemini-embedding-001:embedContent"))
            .and(body_partial_json(serde_json::json!({
                "model": "models/gemini-embedding-001",
                "content": { "parts": [{ "text": "spindle overheating" }] },
                "taskType": "RETRIEVAL_QUERY",
                "outputDimensionality": 4
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": { "values": [0.5, 0.5, 0.5, 0.5] }
            })))
            .mount(&mock_server)
            .await;

        let values = client.embed_query("spindle overheating").await.unwrap().unwrap();
        assert_eq!(values, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_embed_query_retries_then_gives_up() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(&test_config(Some("k")), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "boom" }
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        match client.embed_query("anything").await {
            Err(EmbeddingError::RetryExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_dimensions_are_rejected() {
        let mock_server = MockServer::start().await;
        let config = EmbeddingConfig {
            max_retries: 1,
            ..test_config(Some("k"))
        };
        let client = GeminiEmbeddingClient::with_base_url(&config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": { "values": [0.1, 0.2] }
            })))
            .mount(&mock_server)
            .await;

        assert!(client.embed_query("x").await.is_err());
    }

    #[test]
    fn test_none_backend_disables_embedding() {
        let config = EmbeddingConfig::default();
        assert!(create_backend(&config).unwrap().is_none());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let config = EmbeddingConfig {
            backend: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_backend(&config), Err(EmbeddingError::UnknownBackend(_))));
    }
}
