//! Immutable, internally consistent index snapshots.
//!
//! An [`IndexSnapshot`] pairs one [`Vocabulary`] generation with the
//! vectors of every chunk embedded against it. Snapshots are never
//! modified; the index service builds a new one off to the side and swaps
//! it in, so concurrent readers always see a matching vocabulary/vector set.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::embedding::{fit, Vector, Vocabulary};
use crate::error::EmbeddingError;
use crate::models::Chunk;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vector,
}

/// Vocabulary + entries for one game context.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    context_id: String,
    vocabulary: Arc<Vocabulary>,
    entries: Vec<IndexEntry>,
    /// Enabled packs that were indexed, including ones with zero chunks.
    pack_ids: BTreeSet<String>,
}

impl IndexSnapshot {
    /// Fit a fresh vocabulary over `chunks` and embed each of them.
    ///
    /// Entries are ordered by `(pack_id, sequence_no)`.
    pub fn build(
        context_id: impl Into<String>,
        mut chunks: Vec<Chunk>,
        pack_ids: BTreeSet<String>,
    ) -> Self {
        chunks.sort_by(|a, b| {
            a.pack_id
                .cmp(&b.pack_id)
                .then(a.sequence_no.cmp(&b.sequence_no))
        });
        let vocabulary = fit(chunks.iter().map(|c| (c.id.as_str(), c.text.as_str())));
        let entries = chunks
            .into_iter()
            .map(|chunk| {
                let vector = vocabulary.transform(&chunk.text);
                IndexEntry { chunk, vector }
            })
            .collect();
        Self {
            context_id: context_id.into(),
            vocabulary: Arc::new(vocabulary),
            entries,
            pack_ids,
        }
    }

    /// Reassemble a snapshot from restored parts, checking that every
    /// vector belongs to `vocabulary` and stays inside its dimensions.
    pub fn from_parts(
        context_id: impl Into<String>,
        vocabulary: Vocabulary,
        entries: Vec<IndexEntry>,
        pack_ids: BTreeSet<String>,
    ) -> Result<Self, EmbeddingError> {
        let dims = vocabulary.len() as u64;
        for entry in &entries {
            if entry.vector.generation() != vocabulary.generation() {
                return Err(EmbeddingError::GenerationMismatch {
                    expected: vocabulary.generation().to_string(),
                    found: entry.vector.generation().to_string(),
                });
            }
            if let Some(max) = entry.vector.max_dim() {
                if max as u64 >= dims {
                    return Err(EmbeddingError::InvalidVocabulary(format!(
                        "chunk {} references dimension {} of {}",
                        entry.chunk.id, max, dims
                    )));
                }
            }
        }
        let mut pack_ids = pack_ids;
        pack_ids.extend(entries.iter().map(|e| e.chunk.pack_id.clone()));
        Ok(Self {
            context_id: context_id.into(),
            vocabulary: Arc::new(vocabulary),
            entries,
            pack_ids,
        })
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pack_ids(&self) -> &BTreeSet<String> {
        &self.pack_ids
    }

    pub fn contains_pack(&self, pack_id: &str) -> bool {
        self.pack_ids.contains(pack_id)
    }

    /// Chunks of every pack except `pack_id`, for reuse in the next build.
    pub fn chunks_except(&self, pack_id: &str) -> Vec<Chunk> {
        self.entries
            .iter()
            .filter(|e| e.chunk.pack_id != pack_id)
            .map(|e| e.chunk.clone())
            .collect()
    }

    pub fn chunks_of(&self, pack_id: &str) -> Vec<&Chunk> {
        self.entries
            .iter()
            .filter(|e| e.chunk.pack_id == pack_id)
            .map(|e| &e.chunk)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Generation;
    use crate::models::KnowledgeSource;

    fn chunks() -> Vec<Chunk> {
        let src = KnowledgeSource::note("tips", "");
        vec![
            Chunk::new("p2", &src, 0, "ice golems shatter"),
            Chunk::new("p1", &src, 1, "fire magic burns"),
            Chunk::new("p1", &src, 0, "the boss uses fire"),
        ]
    }

    fn packs(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_orders_entries_and_shares_generation() {
        let snap = IndexSnapshot::build("ctx", chunks(), packs(&["p1", "p2"]));
        let order: Vec<(&str, u32)> = snap
            .entries()
            .iter()
            .map(|e| (e.chunk.pack_id.as_str(), e.chunk.sequence_no))
            .collect();
        assert_eq!(order, vec![("p1", 0), ("p1", 1), ("p2", 0)]);
        for e in snap.entries() {
            assert_eq!(e.vector.generation(), snap.vocabulary().generation());
        }
        assert_eq!(snap.vocabulary().total_documents(), 3);
    }

    #[test]
    fn test_chunks_except_drops_pack() {
        let snap = IndexSnapshot::build("ctx", chunks(), packs(&["p1", "p2"]));
        let rest = snap.chunks_except("p1");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].pack_id, "p2");
        assert_eq!(snap.chunks_of("p1").len(), 2);
    }

    #[test]
    fn test_from_parts_rejects_foreign_vectors() {
        let snap = IndexSnapshot::build("ctx", chunks(), packs(&["p1", "p2"]));
        let mut entries = snap.entries().to_vec();
        entries[0].vector = Vector::from_weights(Generation::from_string("other"), vec![(0, 1.0)]);
        let err = IndexSnapshot::from_parts(
            "ctx",
            (**snap.vocabulary()).clone(),
            entries,
            BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EmbeddingError::GenerationMismatch { .. }));
    }

    #[test]
    fn test_from_parts_rejects_out_of_range_dimension() {
        let snap = IndexSnapshot::build("ctx", chunks(), packs(&["p1", "p2"]));
        let vocab = (**snap.vocabulary()).clone();
        let mut entries = snap.entries().to_vec();
        entries[0].vector =
            Vector::from_weights(vocab.generation().clone(), vec![(vocab.len() as u32, 1.0)]);
        let err = IndexSnapshot::from_parts("ctx", vocab, entries, BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidVocabulary(_)));
    }

    #[test]
    fn test_empty_build() {
        let snap = IndexSnapshot::build("ctx", Vec::new(), packs(&["p1"]));
        assert!(snap.is_empty());
        assert!(snap.vocabulary().is_empty());
        assert!(snap.contains_pack("p1"));
    }
}
