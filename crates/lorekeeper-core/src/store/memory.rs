//! In-memory [`PackStore`] implementation for tests and diskless use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` for thread safety.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::KnowledgePack;

use super::PackStore;

/// In-memory pack store.
pub struct InMemoryPackStore {
    packs: RwLock<HashMap<String, KnowledgePack>>,
}

impl InMemoryPackStore {
    pub fn new() -> Self {
        Self {
            packs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.packs.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryPackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackStore for InMemoryPackStore {
    async fn save_pack(&self, pack: &KnowledgePack) -> Result<(), StoreError> {
        let mut packs = self.packs.write().map_err(|_| StoreError::Poisoned)?;
        packs.insert(pack.id.clone(), pack.clone());
        Ok(())
    }

    async fn load_packs(&self, game_context_id: &str) -> Result<Vec<KnowledgePack>, StoreError> {
        let packs = self.packs.read().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<KnowledgePack> = packs
            .values()
            .filter(|p| p.game_context_id == game_context_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_pack(&self, id: &str) -> Result<Option<KnowledgePack>, StoreError> {
        let packs = self.packs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(packs.get(id).cloned())
    }

    async fn delete_pack(&self, id: &str) -> Result<bool, StoreError> {
        let mut packs = self.packs.write().map_err(|_| StoreError::Poisoned)?;
        Ok(packs.remove(id).is_some())
    }

    async fn list_contexts(&self) -> Result<Vec<String>, StoreError> {
        let packs = self.packs.read().map_err(|_| StoreError::Poisoned)?;
        let contexts: BTreeSet<String> =
            packs.values().map(|p| p.game_context_id.clone()).collect();
        Ok(contexts.into_iter().collect())
    }
}
