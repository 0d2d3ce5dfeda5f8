//! Errors raised by the index service and its persistence layer.

use std::path::PathBuf;

use lorekeeper_core::StoreError;
use thiserror::Error;

/// Index file save/load failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("index file I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("index serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a write operation on the [`VectorIndex`](crate::index::VectorIndex).
///
/// Queries never return this; they degrade to an empty result.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("unknown pack: {0}")]
    UnknownPack(String),
}
