//! Word-boundary text chunker with overlap.
//!
//! Splits normalized text into chunks that respect a character budget.
//! A chunk boundary never falls inside a word, and each new chunk starts
//! with the tail of the previous one so that context spanning a boundary
//! is retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Split text on whitespace into words.
//! 2. Every word costs its character count plus one separator.
//! 3. Accumulate words until adding the next one would exceed `chunk_size`,
//!    then emit the buffer as a chunk.
//! 4. Seed the next chunk with the longest suffix of the emitted chunk whose
//!    cost is `<= overlap`. Seed words are dropped from the front while
//!    seed + next word would still overflow, so every chunk makes progress.
//! 5. A single word longer than `chunk_size` forms its own chunk; it is
//!    never cut.
//!
//! # Example
//!
//! ```rust
//! use lorekeeper_core::chunk::chunk;
//!
//! let chunks = chunk("a b c d e f g h i j", 5, 2);
//! assert_eq!(chunks[0], "a b");
//! assert_eq!(chunks[1], "b c");
//! assert_eq!(chunks.last().map(String::as_str), Some("i j"));
//! ```

use serde::Deserialize;

/// Chunk budget in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// `chunk_size >= 1` and `overlap <= chunk_size - 1`.
    pub fn clamped(&self) -> Self {
        let chunk_size = self.chunk_size.max(1);
        Self {
            chunk_size,
            overlap: self.overlap.min(chunk_size - 1),
        }
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
        }
    }
}

/// Word range `[start, end)` of one chunk within the whitespace-split input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Split `text` into overlapping, word-aligned chunks.
///
/// Pure and deterministic. Empty or whitespace-only input yields no chunks.
/// `overlap >= chunk_size` is clamped to `chunk_size - 1`.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    chunk_spans(text, chunk_size, overlap)
        .into_iter()
        .map(|span| span.text)
        .collect()
}

/// Like [`chunk`], but also reports which words each chunk covers.
pub fn chunk_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    let params = ChunkingParams::new(chunk_size, overlap).clamped();
    let words: Vec<&str> = text.split_whitespace().collect();
    let costs: Vec<usize> = words.iter().map(|w| w.chars().count() + 1).collect();

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut cost = 0usize;

    for (i, &word_cost) in costs.iter().enumerate() {
        if cost + word_cost > params.chunk_size && i > start {
            spans.push(make_span(&words, start, i));
            let carry = overlap_start(&costs, start, i, params.overlap);
            cost = costs[carry..i].iter().sum();
            start = carry;
            while start < i && cost + word_cost > params.chunk_size {
                cost -= costs[start];
                start += 1;
            }
        }
        cost += word_cost;
    }

    if start < words.len() {
        spans.push(make_span(&words, start, words.len()));
    }

    spans
}

/// First index of the longest suffix of `costs[start..end]` costing `<= overlap`.
fn overlap_start(costs: &[usize], start: usize, end: usize, overlap: usize) -> usize {
    let mut carry = end;
    let mut total = 0usize;
    while carry > start && total + costs[carry - 1] <= overlap {
        total += costs[carry - 1];
        carry -= 1;
    }
    carry
}

fn make_span(words: &[&str], start: usize, end: usize) -> ChunkSpan {
    ChunkSpan {
        start,
        end,
        text: words[start..end].join(" "),
    }
}
