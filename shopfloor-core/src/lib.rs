pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod knowledge;
pub mod local;
pub mod models;
pub mod rate_limit;
pub mod similarity;
pub mod stats;
pub mod store;

pub use cache::{is_fallback, CacheSettings, CacheStats, GenerationCache, FALLBACK_MESSAGE};
pub use config::ShopfloorConfig;
pub use context::{ContextAssembler, ContextMode};
pub use embeddings::{EmbeddingBackend, EmbeddingError, GeminiEmbeddingClient};
pub use error::ShopfloorError;
pub use generation::{
    DisabledBackend, GeminiGenerationClient, GenerationBackend, GenerationError,
    GenerationOptions, OllamaGenerationClient,
};
pub use index::VectorIndexClient;
pub use knowledge::{ExternalKnowledge, KnowledgeBundle, KnowledgeSource, Snippet, SnippetOrigin};
pub use models::{Event, SimilarityResult};
pub use rate_limit::RateLimiter;
pub use stats::EventSummary;
pub use store::{EventStore, MemoryEventStore, PgEventStore};
