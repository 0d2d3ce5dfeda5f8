//! Core data models used throughout Lorekeeper.
//!
//! Packs and sources are the user-facing metadata kept by a
//! [`PackStore`](crate::store::PackStore); chunks are derived from them at
//! (re)index time and retrieved chunks are the output of a query.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a [`KnowledgeSource`] gets its text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A local file or directory; `origin` is the path.
    File,
    /// A web page; `origin` is the URL.
    Url,
    /// Free-form text; `origin` is the text itself.
    Note,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Url => "url",
            SourceKind::Note => "note",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(SourceKind::File),
            "url" => Some(SourceKind::Url),
            "note" => Some(SourceKind::Note),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One imported source inside a pack. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: String,
    pub kind: SourceKind,
    pub title: String,
    /// Path, URL, or inline note text depending on `kind`.
    pub origin: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl KnowledgeSource {
    /// Build a source with a fresh UUID.
    pub fn new(kind: SourceKind, title: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            origin: origin.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn note(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(SourceKind::Note, title, text)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// A named bundle of sources owned by exactly one game context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub game_context_id: String,
    /// Ordered; chunk sequence numbers follow this order.
    pub sources: Vec<KnowledgeSource>,
    pub enabled: bool,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Unix seconds.
    #[serde(default)]
    pub updated_at: i64,
}

impl KnowledgePack {
    /// Build an enabled, empty pack with a fresh UUID.
    pub fn new(name: impl Into<String>, game_context_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            game_context_id: game_context_id.into(),
            sources: Vec::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_source(mut self, source: KnowledgeSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source(&self, source_id: &str) -> Option<&KnowledgeSource> {
        self.sources.iter().find(|s| s.id == source_id)
    }
}

/// A word-aligned slice of a source's text; the unit of retrieval.
///
/// Never mutated. A rebuild replaces a pack's chunks wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub pack_id: String,
    pub source_id: String,
    /// Pack-wide position, contiguous from 0 across the pack's sources.
    #[serde(rename = "seq")]
    pub sequence_no: u32,
    pub text: String,
    /// Length of `text` in characters.
    #[serde(default)]
    pub char_len: usize,
    #[serde(default)]
    pub source_title: String,
}

impl Chunk {
    pub fn new(
        pack_id: &str,
        source: &KnowledgeSource,
        sequence_no: u32,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pack_id: pack_id.to_string(),
            source_id: source.id.clone(),
            sequence_no,
            char_len: text.chars().count(),
            text,
            source_title: source.title.clone(),
        }
    }
}

/// A ranked query hit. Output-only; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    /// Cosine similarity in `[0.0, 1.0]`.
    pub score: f64,
    pub source_title: String,
    pub pack_id: String,
    pub sequence_no: u32,
}
