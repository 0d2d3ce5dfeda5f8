//! # Lorekeeper Core
//!
//! Shared, runtime-agnostic logic for Lorekeeper: knowledge-pack models,
//! the word-boundary chunker, the TF-IDF embedding model, immutable index
//! snapshots with exact cosine retrieval, and the storage and ingestion
//! traits the index service is built on.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod search;
pub mod store;

pub use error::{EmbeddingError, IngestError, StoreError};
pub use models::{Chunk, KnowledgePack, KnowledgeSource, RetrievedChunk, SourceKind};
