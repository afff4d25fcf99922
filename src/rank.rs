//! Similarity ranking of chunks against a query embedding.
//!
//! Scores are cosine similarities. Ranking is a stable sort by descending
//! score, so chunks with equal scores keep their store order.
//!
//! `k == 0` is a sentinel meaning "every chunk, ranked"; the answerer
//! relies on it to walk the whole index in relevance order.

use anyhow::Result;

use crate::error::IndexError;
use crate::models::Chunk;

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty or zero-magnitude vectors. Callers must pass
/// vectors of equal length; [`rank_chunks`] checks this before scoring.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Rank `chunks` by similarity to `query`, most similar first.
///
/// Returns the top `k` chunks, or all of them when `k == 0`.
///
/// # Errors
///
/// [`IndexError::DimensionMismatch`] if any chunk's embedding length
/// differs from the query's.
pub fn rank_chunks<'a, I>(query: &[f32], chunks: I, k: usize) -> Result<Vec<ScoredChunk<'a>>>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut scored = Vec::new();
    for chunk in chunks {
        if chunk.embedding.len() != query.len() {
            return Err(IndexError::DimensionMismatch {
                expected: chunk.embedding.len(),
                found: query.len(),
            }
            .into());
        }
        scored.push(ScoredChunk {
            chunk,
            score: cosine_similarity(query, &chunk.embedding),
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if k > 0 {
        scored.truncate(k);
    }
    tracing::debug!("ranked {} chunks", scored.len());
    Ok(scored)
}
