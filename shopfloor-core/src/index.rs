//! Vector index client — nearest-neighbour and pairwise similarity over stored events
//!
//! Validation (unknown ids, missing embeddings, wrong dimensionality) happens
//! here so every store implementation reports the same errors. Scores coming
//! back from a store are re-ranked with the canonical total order, which keeps
//! results reproducible even when the database hands back NaN or ties.

use std::sync::Arc;

use crate::error::ShopfloorError;
use crate::models::{Event, SimilarityResult};
use crate::similarity;
use crate::store::EventStore;

#[derive(Clone)]
pub struct VectorIndexClient {
    store: Arc<dyn EventStore>,
}

impl VectorIndexClient {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Nearest events to a stored event, excluding the event itself.
    ///
    /// Fails with `NotFound` when the reference event is absent or has no
    /// embedding.
    pub async fn nearest_to(
        &self,
        reference_id: i64,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError> {
        let reference = self
            .store
            .event_by_id(reference_id)
            .await?
            .ok_or(ShopfloorError::NotFound(reference_id))?;

        let vector = reference
            .embedding_slice()
            .ok_or(ShopfloorError::NotFound(reference_id))?;

        self.ranked(vector, category, Some(reference_id), limit).await
    }

    /// Nearest events to an externally supplied vector.
    pub async fn nearest_to_vector(
        &self,
        vector: &[f32],
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError> {
        let expected = self.store.dimensions();
        if vector.len() != expected || vector.iter().any(|x| !x.is_finite()) {
            return Err(ShopfloorError::InvalidVector {
                expected,
                actual: vector.len(),
            });
        }

        self.ranked(vector, category, None, limit).await
    }

    /// Cosine similarity between two stored events.
    pub async fn pairwise_similarity(&self, id_a: i64, id_b: i64) -> Result<f64, ShopfloorError> {
        let a = self.require_event(id_a).await?;
        let b = self.require_event(id_b).await?;

        let va = a
            .embedding_slice()
            .ok_or(ShopfloorError::MissingEmbedding(id_a))?;
        let vb = b
            .embedding_slice()
            .ok_or(ShopfloorError::MissingEmbedding(id_b))?;

        Ok(similarity::cosine_similarity(va, vb))
    }

    /// Fetch an event or fail with `NotFound`.
    pub async fn require_event(&self, id: i64) -> Result<Event, ShopfloorError> {
        self.store
            .event_by_id(id)
            .await?
            .ok_or(ShopfloorError::NotFound(id))
    }

    async fn ranked(
        &self,
        vector: &[f32],
        category: Option<&str>,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, ShopfloorError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self
            .store
            .similar_events(vector, category, exclude_id, limit)
            .await?;

        let mut results = similarity::rank(rows, limit);

        // A zero-norm reference has no direction; every candidate scores 0.
        if similarity::norm(vector) == 0.0 {
            for r in results.iter_mut() {
                r.score = 0.0;
            }
            results.sort_by(similarity::ranking_order);
        }

        tracing::debug!(
            store = self.store.name(),
            returned = results.len(),
            limit,
            "Ranked similar events"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use pgvector::Vector;

    fn event(id: i64, category: &str, source: &str, minutes: f64, embedding: Option<Vec<f32>>) -> Event {
        Event {
            id,
            category: category.to_string(),
            source: source.to_string(),
            notes: format!("event {}", id),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, id as u32, 0).unwrap(),
            duration_minutes: minutes,
            embedding: embedding.map(Vector::from),
        }
    }

    /// 1 and 2 share an embedding, 3 is orthogonal to both, 4 has none.
    fn client() -> VectorIndexClient {
        let store = MemoryEventStore::new(
            vec![
                event(1, "Breakdown", "M1", 10.0, Some(vec![1.0, 0.0, 0.0])),
                event(2, "Breakdown", "M1", 12.0, Some(vec![1.0, 0.0, 0.0])),
                event(3, "Production", "M2", 5.0, Some(vec![0.0, 1.0, 0.0])),
                event(4, "Production", "M2", 7.0, None),
            ],
            3,
        );
        VectorIndexClient::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_pairwise_self_similarity_is_one() {
        let client = client();
        for id in [1, 2, 3] {
            let score = client.pairwise_similarity(id, id).await.unwrap();
            assert_relative_eq!(score, 1.0, epsilon = 1e-9);
        }
    }

    #[tokio::test]
    async fn test_pairwise_identical_and_orthogonal() {
        let client = client();
        assert_relative_eq!(client.pairwise_similarity(1, 2).await.unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(client.pairwise_similarity(1, 3).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_pairwise_errors() {
        let client = client();
        assert!(matches!(
            client.pairwise_similarity(1, 99).await,
            Err(ShopfloorError::NotFound(99))
        ));
        assert!(matches!(
            client.pairwise_similarity(4, 1).await,
            Err(ShopfloorError::MissingEmbedding(4))
        ));
    }

    #[tokio::test]
    async fn test_nearest_to_ranks_identical_first_and_excludes_reference() {
        let results = client().nearest_to(1, None, 10).await.unwrap();
        let ids: Vec<i64> = results.iter().map(|r| r.event.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_nearest_to_category_and_limit() {
        let client = client();
        let results = client.nearest_to(1, Some("Production"), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event.id, 3);

        assert_eq!(client.nearest_to(3, None, 1).await.unwrap().len(), 1);
        assert!(client.nearest_to(3, None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nearest_to_without_embedding_is_not_found() {
        let client = client();
        assert!(matches!(client.nearest_to(4, None, 5).await, Err(ShopfloorError::NotFound(4))));
        assert!(matches!(client.nearest_to(77, None, 5).await, Err(ShopfloorError::NotFound(77))));
    }

    #[tokio::test]
    async fn test_nearest_to_vector_dimension_mismatch() {
        let result = client().nearest_to_vector(&[1.0, 0.0], None, 5).await;
        match result {
            Err(ShopfloorError::InvalidVector { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected InvalidVector, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_nearest_to_zero_vector_scores_zero_ordered_by_id() {
        let results = client().nearest_to_vector(&[0.0, 0.0, 0.0], None, 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.score == 0.0));
        let ids: Vec<i64> = results.iter().map(|r| r.event.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let client = client();
        let first = client.nearest_to_vector(&[0.5, 0.5, 0.0], None, 10).await.unwrap();
        let second = client.nearest_to_vector(&[0.5, 0.5, 0.0], None, 10).await.unwrap();
        let a: Vec<(i64, f64)> = first.iter().map(|r| (r.event.id, r.score)).collect();
        let b: Vec<(i64, f64)> = second.iter().map(|r| (r.event.id, r.score)).collect();
        assert_eq!(a, b);
        // ties on equal scores resolve by ascending id
        assert_eq!(a[0].0, 1);
        assert_eq!(a[1].0, 2);
    }
}
