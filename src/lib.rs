//! # Lorekeeper
//!
//! Per-game knowledge packs with TF-IDF semantic search, for augmenting
//! chat prompts with relevant excerpts from imported guides, wiki pages,
//! and notes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Pack Store  │──▶│  Ingest +    │──▶│ VectorIndex  │──▶ index/*.json
//! │  (SQLite)    │   │  Chunk       │   │ per context  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ query
//!                                       ┌──────▼───────┐
//!                                       │  Knowledge   │──▶ prompt block
//!                                       │  Integration │
//!                                       └──────────────┘
//! ```
//!
//! Pure logic (models, chunker, TF-IDF, search) lives in
//! [`lorekeeper_core`]; this crate adds storage, ingestion I/O,
//! persistence, and the concurrent index service.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite [`PackStore`](lorekeeper_core::store::PackStore) |
//! | [`extract`] | PDF / DOCX text extraction |
//! | [`ingest`] | File, directory, URL, and note ingestion |
//! | [`persistence`] | Versioned JSON index files |
//! | [`index`] | Per-context snapshot-and-swap index |
//! | [`knowledge`] | Prompt context facade |
//! | [`analytics`] | Query log sinks |
//! | [`app`] | Wiring everything from a [`config::Config`] |

pub mod analytics;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod knowledge;
pub mod logging;
pub mod migrate;
pub mod persistence;
pub mod sqlite_store;

pub use lorekeeper_core;
