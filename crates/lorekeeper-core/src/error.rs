//! Error taxonomy shared by the core pipeline.
//!
//! Ingestion errors are per-source and recovered by the caller. Store
//! errors surface to whoever requested the write. Embedding errors are
//! internal: the index answers a generation mismatch by rebuilding.

use thiserror::Error;

/// Failure to turn one [`KnowledgeSource`](crate::models::KnowledgeSource) into text.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error reading {origin}: {message}")]
    Io { origin: String, message: String },
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("unsupported content in {origin}: {content_type}")]
    Unsupported {
        origin: String,
        content_type: String,
    },
    #[error("extraction failed for {origin}: {message}")]
    Extract { origin: String, message: String },
    #[error("{origin} exceeds the size limit of {limit} bytes")]
    TooLarge { origin: String, limit: u64 },
    #[error("no text content in {origin}")]
    Empty { origin: String },
}

/// Pack metadata persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(String),
    #[error("corrupt pack record {id}: {message}")]
    Corrupt { id: String, message: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Vector-space errors.
#[derive(Debug, Error, PartialEq)]
pub enum EmbeddingError {
    /// Two vectors from different vocabulary generations were compared.
    #[error("vocabulary generation mismatch: expected {expected}, found {found}")]
    GenerationMismatch { expected: String, found: String },
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),
}
