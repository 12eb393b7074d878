//! Process-wide state shared by all HTTP handlers.
//!
//! Built once at startup; the rate limiter and generation cache inside the
//! pipeline are the only mutable shared pieces.

use std::sync::Arc;

use shopfloor_core::{
    embeddings, generation, ContextAssembler, DisabledBackend, EmbeddingBackend, EventStore,
    ExternalKnowledge, GenerationBackend, GenerationCache, PgEventStore, RateLimiter,
    ShopfloorConfig, VectorIndexClient,
};
use sqlx::PgPool;

use crate::subsystems::answer::AnswerPipeline;

pub struct HttpState {
    pub config: ShopfloorConfig,
    /// Present when the store is PostgreSQL; used by the health check.
    pub pool: Option<PgPool>,
    pub pipeline: AnswerPipeline,
}

impl HttpState {
    /// Wire the pipeline from already constructed collaborators.
    pub fn from_parts(
        config: ShopfloorConfig,
        pool: Option<PgPool>,
        store: Arc<dyn EventStore>,
        generator: Arc<dyn GenerationBackend>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        knowledge: Option<ExternalKnowledge>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let cache = Arc::new(GenerationCache::from_config(generator, limiter, &config.generation));

        let pipeline = AnswerPipeline::new(
            VectorIndexClient::new(store),
            ContextAssembler::from_config(&config.context),
            cache,
            embedder,
            knowledge,
            config.retrieval.clone(),
        );

        Self {
            config,
            pool,
            pipeline,
        }
    }

    /// Connect to PostgreSQL and build every collaborator from config.
    ///
    /// Only the database is mandatory. A generation backend that cannot be
    /// built is replaced by one that always falls back; a missing embedding
    /// backend or knowledge client disables that step.
    pub async fn connect(config: ShopfloorConfig) -> anyhow::Result<Self> {
        let pool = shopfloor_core::db::create_pool(&config.database).await?;
        let store: Arc<dyn EventStore> =
            Arc::new(PgEventStore::new(pool.clone(), config.embedding.dimensions));

        let generator: Arc<dyn GenerationBackend> = match generation::create_backend(&config.generation) {
            Ok(backend) => {
                tracing::info!(backend = backend.name(), model = %config.generation.model, "Generation backend ready");
                backend
            }
            Err(e) => {
                tracing::warn!(error = %e, "Generation backend unavailable, answers will fall back");
                Arc::new(DisabledBackend::new(e.to_string()))
            }
        };

        let embedder = match embeddings::create_backend(&config.embedding) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(error = %e, "Question embedding disabled");
                None
            }
        };

        let knowledge = if config.knowledge.enabled {
            match ExternalKnowledge::from_config(&config.knowledge) {
                Ok(k) => Some(k),
                Err(e) => {
                    tracing::warn!(error = %e, "External knowledge disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::from_parts(config, Some(pool), store, generator, embedder, knowledge))
    }
}
