//! Event store access — the fixed query contract the pipeline reads through
//!
//! Provides an `EventStore` trait with implementations for:
//! - **PostgreSQL** — `manufacturing_events` with a pgvector `embedding` column
//! - **In-memory** — a fixed event list, ranked in Rust (tests, offline use)
//!
//! Expected table shape:
//! `manufacturing_events(id, event_type, machine_name, notes, timestamp,
//! duration_minutes, embedding vector(N))`

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;

use crate::error::ShopfloorError;
use crate::models::{Event, SimilarityResult};
use crate::similarity;

/// Read-only access to stored events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch one event by id.
    async fn event_by_id(&self, id: i64) -> Result<Option<Event>, ShopfloorError>;

    /// Events with a non-null embedding, nearest to `vector` first.
    /// Scores are `1 - cosine_distance`; ties are ordered by ascending id.
    async fn similar_events(
        &self,
        vector: &[f32],
        category: Option<&str>,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError>;

    /// Most recent events first.
    async fn recent_events(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, ShopfloorError>;

    /// Fixed embedding dimensionality of the store.
    fn dimensions(&self) -> usize;

    /// Store name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// PgEventStore
// ============================================================================

const EVENT_COLUMNS: &str = r#"
    id::bigint AS id,
    event_type,
    machine_name,
    COALESCE(notes, '') AS notes,
    timestamp::timestamptz AS timestamp,
    COALESCE(duration_minutes, 0)::float8 AS duration_minutes,
    embedding
"#;

#[derive(sqlx::FromRow)]
struct ScoredEventRow {
    #[sqlx(flatten)]
    event: Event,
    score: Option<f64>,
}

/// PostgreSQL + pgvector event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    dimensions: usize,
}

impl PgEventStore {
    pub fn new(pool: PgPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn event_by_id(&self, id: i64) -> Result<Option<Event>, ShopfloorError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM manufacturing_events WHERE id = $1");
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn similar_events(
        &self,
        vector: &[f32],
        category: Option<&str>,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError> {
        let reference = Vector::from(vector.to_vec());

        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS},
                1 - (embedding <=> $1::vector) AS score
            FROM manufacturing_events
            WHERE embedding IS NOT NULL
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::bigint IS NULL OR id <> $3)
            ORDER BY embedding <=> $1::vector, id ASC
            LIMIT $4
            "#
        );

        let rows = sqlx::query_as::<_, ScoredEventRow>(&sql)
            .bind(&reference)
            .bind(category)
            .bind(exclude_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| SimilarityResult {
                event: row.event,
                // zero-norm vectors score NaN; VectorIndexClient sanitizes
                score: row.score.unwrap_or(0.0),
            })
            .collect())
    }

    async fn recent_events(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, ShopfloorError> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM manufacturing_events
            WHERE ($1::text IS NULL OR event_type = $1)
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
            "#
        );

        let events = sqlx::query_as::<_, Event>(&sql)
            .bind(category)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// MemoryEventStore
// ============================================================================

/// Fixed in-memory event list with the same ordering guarantees as Postgres.
#[derive(Debug, Clone)]
pub struct MemoryEventStore {
    events: Vec<Event>,
    dimensions: usize,
}

impl MemoryEventStore {
    pub fn new(events: Vec<Event>, dimensions: usize) -> Self {
        Self { events, dimensions }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn event_by_id(&self, id: i64) -> Result<Option<Event>, ShopfloorError> {
        Ok(self.events.iter().find(|e| e.id == id).cloned())
    }

    async fn similar_events(
        &self,
        vector: &[f32],
        category: Option<&str>,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError> {
        let candidates = self
            .events
            .iter()
            .filter(|e| Some(e.id) != exclude_id)
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter_map(|e| {
                let embedding = e.embedding_slice()?;
                Some(SimilarityResult {
                    event: e.clone(),
                    score: similarity::cosine_similarity(vector, embedding),
                })
            })
            .collect();

        Ok(similarity::rank(candidates, limit))
    }

    async fn recent_events(
        &self,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>, ShopfloorError> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        events.truncate(limit);
        Ok(events)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "memory"
    }
}
