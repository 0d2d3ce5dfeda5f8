//! Exact cosine-similarity retrieval over an [`IndexSnapshot`].
//!
//! # Ranking
//!
//! 1. Embed the query against the snapshot's vocabulary.
//! 2. Score every entry with cosine similarity (`[0, 1]`).
//! 3. Keep entries with `score >= min_score` and `score > 0`.
//! 4. Sort by score (desc), then `pack_id` (asc), then `sequence_no` (asc).
//! 5. Truncate to `top_k`.

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::EmbeddingError;
use crate::index::IndexSnapshot;
use crate::models::RetrievedChunk;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MIN_SCORE: f64 = 0.3;
pub const MAX_TOP_K: usize = 10;

/// Per-query retrieval parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub top_k: usize,
    pub min_score: f64,
}

impl SearchParams {
    pub fn new(top_k: usize, min_score: f64) -> Self {
        Self { top_k, min_score }
    }

    /// `top_k` into `1..=10`, `min_score` into `0.0..=1.0` (NaN becomes the default).
    pub fn clamped(&self) -> Self {
        let min_score = if self.min_score.is_nan() {
            DEFAULT_MIN_SCORE
        } else {
            self.min_score.clamp(0.0, 1.0)
        };
        Self {
            top_k: self.top_k.clamp(1, MAX_TOP_K),
            min_score,
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

/// Rank the snapshot's chunks against `query`.
///
/// `params` are used as given; callers that accept user input should pass
/// [`SearchParams::clamped`]. A blank query or empty snapshot yields no
/// results.
///
/// A chunk sharing no term with the query scores exactly `0.0` and is
/// dropped even when `min_score` is `0.0`.
///
/// # Errors
///
/// [`EmbeddingError::GenerationMismatch`] if any entry was embedded against
/// a different vocabulary generation than the snapshot's.
pub fn search(
    snapshot: &IndexSnapshot,
    query: &str,
    params: SearchParams,
) -> Result<Vec<RetrievedChunk>, EmbeddingError> {
    if query.trim().is_empty() || snapshot.is_empty() || params.top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vec = snapshot.vocabulary().transform(query);
    if query_vec.is_zero() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    for entry in snapshot.entries() {
        let score = cosine_similarity(&query_vec, &entry.vector)?;
        if score > 0.0 && score >= params.min_score {
            results.push(RetrievedChunk {
                chunk_id: entry.chunk.id.clone(),
                text: entry.chunk.text.clone(),
                score,
                source_title: entry.chunk.source_title.clone(),
                pack_id: entry.chunk.pack_id.clone(),
                sequence_no: entry.chunk.sequence_no,
            });
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.pack_id.cmp(&b.pack_id))
            .then(a.sequence_no.cmp(&b.sequence_no))
    });
    results.truncate(params.top_k);

    Ok(results)
}
