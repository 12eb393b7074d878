//! Similarity subsystem — the caller-facing similarity operations
//!
//! - `find_similar`: neighbours of a stored event
//! - `similar_to_vector`: neighbours of a caller-supplied vector
//! - `cosine_similarity`: pairwise score between two stored events
//!
//! Caller-supplied limits default to `similar_limit` and are clamped to
//! `[1, max_limit]`.

use shopfloor_core::config::RetrievalConfig;
use shopfloor_core::{ShopfloorError, SimilarityResult, VectorIndexClient};

/// Clamp an optional caller limit to `[1, max_limit]`.
pub fn clamp_limit(limit: Option<usize>, config: &RetrievalConfig) -> usize {
    let max = config.max_limit.max(1);
    limit.unwrap_or(config.similar_limit).clamp(1, max)
}

pub async fn find_similar(
    index: &VectorIndexClient,
    event_id: i64,
    category: Option<&str>,
    limit: Option<usize>,
    config: &RetrievalConfig,
) -> Result<Vec<SimilarityResult>, ShopfloorError> {
    let limit = clamp_limit(limit, config);
    let results = index.nearest_to(event_id, category, limit).await?;

    tracing::info!(
        event_id,
        category = category.unwrap_or("*"),
        limit,
        count = results.len(),
        "Similar events"
    );
    Ok(results)
}

pub async fn similar_to_vector(
    index: &VectorIndexClient,
    vector: &[f32],
    category: Option<&str>,
    limit: Option<usize>,
    config: &RetrievalConfig,
) -> Result<Vec<SimilarityResult>, ShopfloorError> {
    let limit = clamp_limit(limit, config);
    index.nearest_to_vector(vector, category, limit).await
}

pub async fn cosine_similarity(
    index: &VectorIndexClient,
    id_a: i64,
    id_b: i64,
) -> Result<f64, ShopfloorError> {
    index.pairwise_similarity(id_a, id_b).await
}

/// Round a score to four decimals for display.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}
