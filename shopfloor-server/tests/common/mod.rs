//! Shared fixtures: a small in-memory event store and scripted backends.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pgvector::Vector;
use shopfloor_core::embeddings::EmbeddingError;
use shopfloor_core::{
    EmbeddingBackend, Event, ExternalKnowledge, GenerationBackend, GenerationError,
    GenerationOptions, MemoryEventStore, ShopfloorConfig,
};
use shopfloor_server::state::HttpState;

pub fn event(
    id: i64,
    category: &str,
    source: &str,
    minutes: f64,
    embedding: Option<Vec<f32>>,
) -> Event {
    Event {
        id,
        category: category.to_string(),
        source: source.to_string(),
        notes: format!("note for event {}", id),
        timestamp: Utc.with_ymd_and_hms(2024, 4, 2, 7, 0, 0).unwrap() + chrono::Duration::hours(id),
        duration_minutes: minutes,
        embedding: embedding.map(Vector::from),
    }
}

/// 1 and 2 share an embedding, 3 is orthogonal to both, 4 has none.
pub fn plant_events() -> Vec<Event> {
    vec![
        event(1, "Breakdown", "M1", 10.0, Some(vec![1.0, 0.0, 0.0])),
        event(2, "Breakdown", "M1", 12.0, Some(vec![1.0, 0.0, 0.0])),
        event(3, "Production", "M2", 5.0, Some(vec![0.0, 1.0, 0.0])),
        event(4, "Production", "M2", 7.0, None),
    ]
}

/// Config with no retry delay and a roomy rate limit.
pub fn test_config() -> ShopfloorConfig {
    let mut config = ShopfloorConfig::default();
    config.generation.retry_base_delay_ms = 0;
    config.generation.max_retries = 2;
    config.rate_limit.max_requests = 100;
    config.embedding.dimensions = 3;
    config
}

/// Replies with the first line of the prompt, or fails every call.
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            return Err(GenerationError::Api {
                code: 503,
                message: "model overloaded".to_string(),
            });
        }
        Ok(format!("reply to: {}", prompt.lines().next().unwrap_or_default()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Embeds every question to the same fixed vector.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FixedEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.vector.clone()))
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub fn state_with(
    config: ShopfloorConfig,
    events: Vec<Event>,
    generator: Arc<ScriptedGenerator>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    knowledge: Option<ExternalKnowledge>,
) -> HttpState {
    let store = Arc::new(MemoryEventStore::new(events, 3));
    HttpState::from_parts(config, None, store, generator, embedder, knowledge)
}

pub fn plant_state(generator: Arc<ScriptedGenerator>) -> HttpState {
    state_with(test_config(), plant_events(), generator, None, None)
}
