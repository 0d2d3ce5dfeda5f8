//! TF-IDF embedding model and sparse vector utilities.
//!
//! A [`Vocabulary`] is produced by [`fit`] over a corpus of chunks and is
//! immutable afterwards. Every `fit` call stamps a fresh [`Generation`];
//! vectors produced by [`Vocabulary::transform`] carry the generation of
//! the vocabulary that made them, and [`cosine_similarity`] refuses to
//! compare vectors from two different generations.
//!
//! # Weighting
//!
//! - `tf(term)`: raw count of the term in the text.
//! - `idf(term) = ln((1 + N) / (1 + df(term))) + 1`, where `N` is the number
//!   of documents in the fitted corpus. Strictly positive, so terms that
//!   occur in every document still contribute.
//! - `weight = tf × idf`. Out-of-vocabulary terms are dropped.
//!
//! All weights are non-negative, so cosine similarity lies in `[0, 1]`.
//!
//! # Example
//!
//! ```rust
//! use lorekeeper_core::embedding::{cosine_similarity, fit};
//!
//! let vocab = fit([("c1", "The boss fights with fire"), ("c2", "Water beats fire")]);
//! let doc = vocab.transform("The boss fights with fire");
//! let query = vocab.transform("boss");
//! let score = cosine_similarity(&query, &doc).unwrap();
//! assert!(score > 0.0 && score <= 1.0);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Identifier of one vocabulary generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(String);

impl Generation {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sparse, non-negative vector in one vocabulary's space.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    generation: Generation,
    /// Sorted by dimension, no duplicates, all weights `> 0`.
    weights: Vec<(u32, f32)>,
    norm: f32,
}

impl Vector {
    /// Build a vector from `(dim, weight)` pairs.
    ///
    /// Pairs are sorted, duplicate dimensions are summed, and non-positive
    /// or non-finite weights are discarded.
    pub fn from_weights<I>(generation: Generation, weights: I) -> Self
    where
        I: IntoIterator<Item = (u32, f32)>,
    {
        let mut pairs: Vec<(u32, f32)> = weights
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();
        pairs.sort_by_key(|(dim, _)| *dim);
        let mut merged: Vec<(u32, f32)> = Vec::with_capacity(pairs.len());
        for (dim, w) in pairs {
            match merged.last_mut() {
                Some((last, acc)) if *last == dim => *acc += w,
                _ => merged.push((dim, w)),
            }
        }
        let norm = merged.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        Self {
            generation,
            weights: merged,
            norm,
        }
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn weights(&self) -> &[(u32, f32)] {
        &self.weights
    }

    pub fn norm(&self) -> f32 {
        self.norm
    }

    pub fn is_zero(&self) -> bool {
        self.weights.is_empty()
    }

    /// Largest dimension referenced, if any.
    pub fn max_dim(&self) -> Option<u32> {
        self.weights.last().map(|(dim, _)| *dim)
    }
}

/// Term → dimension map plus document frequencies for one fitted corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    generation: Generation,
    terms: HashMap<String, u32>,
    /// Indexed by dimension.
    document_frequency: Vec<u32>,
    /// Indexed by dimension; cached from `document_frequency`.
    idf: Vec<f32>,
    total_documents: u32,
}

impl Vocabulary {
    /// Reassemble a vocabulary from its stored parts.
    ///
    /// `terms` must map onto `0..document_frequency.len()` exactly once.
    pub fn from_parts(
        generation: Generation,
        terms: HashMap<String, u32>,
        document_frequency: Vec<u32>,
        total_documents: u32,
    ) -> Result<Self, EmbeddingError> {
        let dims = document_frequency.len();
        if terms.len() != dims {
            return Err(EmbeddingError::InvalidVocabulary(format!(
                "{} terms but {} document frequencies",
                terms.len(),
                dims
            )));
        }
        let mut seen = vec![false; dims];
        for (term, &dim) in &terms {
            match seen.get_mut(dim as usize) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(EmbeddingError::InvalidVocabulary(format!(
                        "dimension {} assigned twice (term {:?})",
                        dim, term
                    )))
                }
                None => {
                    return Err(EmbeddingError::InvalidVocabulary(format!(
                        "term {:?} has out-of-range dimension {}",
                        term, dim
                    )))
                }
            }
        }
        let idf = document_frequency
            .iter()
            .map(|&df| smoothed_idf(total_documents, df))
            .collect();
        Ok(Self {
            generation,
            terms,
            document_frequency,
            idf,
            total_documents,
        })
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn len(&self) -> usize {
        self.document_frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_frequency.is_empty()
    }

    pub fn total_documents(&self) -> u32 {
        self.total_documents
    }

    pub fn dimension(&self, term: &str) -> Option<u32> {
        self.terms.get(term).copied()
    }

    pub fn terms(&self) -> &HashMap<String, u32> {
        &self.terms
    }

    pub fn document_frequency(&self, dim: u32) -> Option<u32> {
        self.document_frequency.get(dim as usize).copied()
    }

    pub fn document_frequencies(&self) -> &[u32] {
        &self.document_frequency
    }

    pub fn idf(&self, dim: u32) -> Option<f32> {
        self.idf.get(dim as usize).copied()
    }

    pub fn idf_table(&self) -> &[f32] {
        &self.idf
    }

    /// Embed `text` against this vocabulary.
    ///
    /// Tokens go through [`tokenize`], so `"boss,"` and `"Boss"` both hit
    /// the `boss` dimension.
    pub fn transform(&self, text: &str) -> Vector {
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for token in tokenize(text) {
            if let Some(dim) = self.dimension(&token) {
                *counts.entry(dim).or_insert(0) += 1;
            }
        }
        let weights = counts
            .into_iter()
            .map(|(dim, tf)| (dim, tf as f32 * self.idf[dim as usize]));
        Vector::from_weights(self.generation.clone(), weights)
    }
}

/// Fit a new vocabulary generation over `(chunk_id, text)` pairs.
///
/// Dimensions are assigned in first-seen order across the corpus. Terms
/// are [`tokenize`]d: lowercased, with punctuation trimmed from both ends,
/// so `"fire."` and `"fire"` share one dimension.
pub fn fit<'a, I, K>(corpus: I) -> Vocabulary
where
    I: IntoIterator<Item = (K, &'a str)>,
    K: AsRef<str>,
{
    let mut terms: HashMap<String, u32> = HashMap::new();
    let mut document_frequency: Vec<u32> = Vec::new();
    let mut total_documents = 0u32;

    for (_chunk_id, text) in corpus {
        total_documents += 1;
        let mut seen_in_doc: HashSet<u32> = HashSet::new();
        for token in tokenize(text) {
            let next_dim = document_frequency.len() as u32;
            let dim = *terms.entry(token).or_insert_with(|| {
                document_frequency.push(0);
                next_dim
            });
            if seen_in_doc.insert(dim) {
                document_frequency[dim as usize] += 1;
            }
        }
    }

    let idf = document_frequency
        .iter()
        .map(|&df| smoothed_idf(total_documents, df))
        .collect();

    Vocabulary {
        generation: Generation::new(),
        terms,
        document_frequency,
        idf,
        total_documents,
    }
}

/// Split on whitespace, case-fold, and trim surrounding punctuation.
///
/// Tokens that are pure punctuation are dropped.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().filter_map(|raw| {
        let token = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    })
}

fn smoothed_idf(total_documents: u32, document_frequency: u32) -> f32 {
    (((1.0 + total_documents as f64) / (1.0 + document_frequency as f64)).ln() + 1.0) as f32
}

/// Cosine similarity between two vectors of the same generation.
///
/// Returns a value in `[0.0, 1.0]`; `0.0` when either vector is zero.
///
/// # Errors
///
/// [`EmbeddingError::GenerationMismatch`] when the vectors were produced by
/// different vocabulary generations.
pub fn cosine_similarity(a: &Vector, b: &Vector) -> Result<f64, EmbeddingError> {
    if a.generation != b.generation {
        return Err(EmbeddingError::GenerationMismatch {
            expected: a.generation.to_string(),
            found: b.generation.to_string(),
        });
    }
    if a.is_zero() || b.is_zero() {
        return Ok(0.0);
    }

    let mut dot = 0.0f64;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.weights.len() && j < b.weights.len() {
        let (da, wa) = a.weights[i];
        let (db, wb) = b.weights[j];
        match da.cmp(&db) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += wa as f64 * wb as f64;
                i += 1;
                j += 1;
            }
        }
    }

    let denom = a.norm as f64 * b.norm as f64;
    if denom < f64::EPSILON {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(0.0, 1.0))
}
