//! Storage abstraction for knowledge-pack metadata.
//!
//! The [`PackStore`] trait is the only way the index learns which packs
//! exist. It is passed into the index explicitly so tests and production
//! never share a backing store by accident.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::KnowledgePack;

/// Abstract pack metadata backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_pack`](PackStore::save_pack) | Insert or replace a pack and its sources |
/// | [`load_packs`](PackStore::load_packs) | All packs of one game context, sorted by id |
/// | [`get_pack`](PackStore::get_pack) | One pack by id |
/// | [`delete_pack`](PackStore::delete_pack) | Remove a pack; `false` if it did not exist |
/// | [`list_contexts`](PackStore::list_contexts) | Every game context that owns a pack |
#[async_trait]
pub trait PackStore: Send + Sync {
    /// Insert or replace a pack. Source order is preserved.
    async fn save_pack(&self, pack: &KnowledgePack) -> Result<(), StoreError>;

    /// Load every pack (enabled or not) owned by `game_context_id`.
    async fn load_packs(&self, game_context_id: &str) -> Result<Vec<KnowledgePack>, StoreError>;

    /// Retrieve a pack by id.
    async fn get_pack(&self, id: &str) -> Result<Option<KnowledgePack>, StoreError>;

    /// Delete a pack and its sources.
    async fn delete_pack(&self, id: &str) -> Result<bool, StoreError>;

    /// Distinct game context ids, sorted.
    async fn list_contexts(&self) -> Result<Vec<String>, StoreError>;
}
