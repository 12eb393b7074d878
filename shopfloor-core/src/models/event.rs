use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};

/// A row of `manufacturing_events`. Read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    #[sqlx(rename = "event_type")]
    pub category: String,
    #[sqlx(rename = "machine_name")]
    pub source: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
    pub duration_minutes: f64,
    pub embedding: Option<Vector>,
}

impl Event {
    /// Embedding components, if the event has one.
    pub fn embedding_slice(&self) -> Option<&[f32]> {
        self.embedding.as_ref().map(|v| v.as_slice())
    }
}

/// An event paired with its cosine similarity to a reference vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub event: Event,
    pub score: f64,
}
