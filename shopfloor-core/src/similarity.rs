//! Cosine similarity and the canonical ranking order for similarity results.

use std::cmp::Ordering;

use crate::models::SimilarityResult;

/// Euclidean norm, accumulated in f64.
pub fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity in [-1, 1].
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    sanitize_score(dot / (norm_a * norm_b))
}

/// Maps NaN to 0 and clamps into [-1, 1].
pub fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(-1.0, 1.0)
    }
}

/// Descending score, ties broken by ascending event id.
pub fn ranking_order(a: &SimilarityResult, b: &SimilarityResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.event.id.cmp(&b.event.id))
}

/// Sanitize every score, sort into ranking order and truncate to `limit`.
pub fn rank(mut results: Vec<SimilarityResult>, limit: usize) -> Vec<SimilarityResult> {
    for r in results.iter_mut() {
        r.score = sanitize_score(r.score);
    }
    results.sort_by(ranking_order);
    results.truncate(limit);
    results
}

/// Qualitative band used by the local explanations.
pub fn similarity_band(score: f64) -> &'static str {
    if score > 0.8 {
        "very similar"
    } else if score > 0.5 {
        "somewhat similar"
    } else {
        "not very similar"
    }
}
