//! Concurrent per-context vector index service.
//!
//! Each game context owns a slot holding its current state behind an
//! [`ArcSwap`]. Readers load the state without locking and search the
//! immutable [`IndexSnapshot`] inside it. Writers serialize on the slot's
//! async mutex, build a complete replacement snapshot, and swap it in with
//! one store, so a concurrent query sees either the old or the new index.
//!
//! # Lifecycle
//!
//! ```text
//! Unloaded ──load──▶ Empty | Ready | Stale
//! Stale ──rebuild──▶ Ready | Empty
//! Empty | Ready ──add/remove/enable/disable──▶ Building ──▶ Ready | Empty
//! ```
//!
//! Contexts are loaded lazily from [`IndexPersistence`] on first use. A
//! stale context is rebuilt from the [`PackStore`] before it answers a
//! query. Any pack change refits the vocabulary over every enabled pack of
//! the context.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, info, warn};

use lorekeeper_core::chunk::ChunkingParams;
use lorekeeper_core::index::IndexSnapshot;
use lorekeeper_core::ingest::{ingest_pack, IngestAdapter, PackIngestReport};
use lorekeeper_core::models::{Chunk, KnowledgePack, RetrievedChunk};
use lorekeeper_core::search::{search, SearchParams};
use lorekeeper_core::store::PackStore;

use crate::error::IndexError;
use crate::persistence::{IndexPersistence, LoadOutcome};

/// Externally visible state of one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ContextStatus {
    Empty,
    Building,
    Ready {
        chunks: usize,
        packs: usize,
        generation: String,
    },
    Stale {
        reason: String,
    },
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::Empty => write!(f, "empty"),
            ContextStatus::Building => write!(f, "building"),
            ContextStatus::Ready {
                chunks,
                packs,
                generation,
            } => write!(
                f,
                "ready ({} chunks from {} packs, vocabulary {})",
                chunks, packs, generation
            ),
            ContextStatus::Stale { reason } => write!(f, "stale ({})", reason),
        }
    }
}

#[derive(Debug)]
enum IndexState {
    Unloaded,
    Empty,
    Ready(Arc<IndexSnapshot>),
    Stale(String),
}

struct ContextSlot {
    state: ArcSwap<IndexState>,
    writer: tokio::sync::Mutex<()>,
    building: AtomicBool,
}

impl ContextSlot {
    fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(IndexState::Unloaded),
            writer: tokio::sync::Mutex::new(()),
            building: AtomicBool::new(false),
        }
    }
}

/// Clears the building flag however the rebuild exits.
struct BuildingGuard<'a>(&'a AtomicBool);

impl<'a> BuildingGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A pack ingested before the writer lock was taken.
struct Prefetched {
    chunks: Vec<Chunk>,
    report: PackIngestReport,
}

/// Per-context TF-IDF index over the packs in a [`PackStore`].
pub struct VectorIndex {
    store: Arc<dyn PackStore>,
    ingestor: Arc<dyn IngestAdapter>,
    chunking: ChunkingParams,
    persistence: Option<IndexPersistence>,
    autosave: bool,
    slots: RwLock<HashMap<String, Arc<ContextSlot>>>,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn PackStore>,
        ingestor: Arc<dyn IngestAdapter>,
        chunking: ChunkingParams,
    ) -> Self {
        Self {
            store,
            ingestor,
            chunking: chunking.clamped(),
            persistence: None,
            autosave: true,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_persistence(mut self, persistence: IndexPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Whether every swap is written to disk. Defaults to `true`.
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn store(&self) -> &Arc<dyn PackStore> {
        &self.store
    }

    fn existing_slot(&self, context_id: &str) -> Option<Arc<ContextSlot>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(context_id).map(Arc::clone)
    }

    fn slot(&self, context_id: &str) -> Arc<ContextSlot> {
        if let Some(slot) = self.existing_slot(context_id) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(context_id.to_string())
                .or_insert_with(|| Arc::new(ContextSlot::new())),
        )
    }

    /// Slot for a read. A context never touched before gets one only when
    /// the store holds an enabled pack for it; otherwise it reads as empty.
    async fn read_slot(&self, context_id: &str) -> Option<Arc<ContextSlot>> {
        if let Some(slot) = self.existing_slot(context_id) {
            return Some(slot);
        }
        match self.store.load_packs(context_id).await {
            Ok(packs) if !packs.iter().any(|p| p.enabled) => None,
            _ => Some(self.slot(context_id)),
        }
    }

    /// Take the writer lock once to resolve an `Unloaded` slot.
    async fn ensure_loaded(&self, context_id: &str) {
        let slot = self.slot(context_id);
        let _writer = slot.writer.lock().await;
        self.load_locked(context_id, &slot).await;
    }

    /// Insert or replace `pack` and re-index its context.
    ///
    /// Sources that fail to ingest are reported, not fatal. A pack that
    /// moved from another context is removed from that context's index.
    pub async fn add_pack(&self, pack: KnowledgePack) -> Result<PackIngestReport, IndexError> {
        if let Some(earlier) = self.store.get_pack(&pack.id).await? {
            if earlier.game_context_id != pack.game_context_id {
                self.ensure_loaded(&earlier.game_context_id).await;
            }
        }
        let (chunks, report) = ingest_pack(&pack, self.ingestor.as_ref(), self.chunking).await;

        let context_id = pack.game_context_id.clone();
        let slot = self.slot(&context_id);
        let previous = {
            let _writer = slot.writer.lock().await;
            // load against the store as it was before this write
            self.load_locked(&context_id, &slot).await;
            let previous = self.store.get_pack(&pack.id).await?;
            self.store.save_pack(&pack).await?;

            let current = slot.state.load_full();
            match &*current {
                IndexState::Ready(_) | IndexState::Empty => {
                    let (mut all, mut pack_ids) = match &*current {
                        IndexState::Ready(snapshot) => {
                            (snapshot.chunks_except(&pack.id), snapshot.pack_ids().clone())
                        }
                        _ => (Vec::new(), BTreeSet::new()),
                    };
                    pack_ids.remove(&pack.id);
                    if pack.enabled {
                        pack_ids.insert(pack.id.clone());
                        all.extend(chunks);
                    }
                    self.refit(&slot, &context_id, all, pack_ids);
                }
                _ => {
                    let prefetched = Prefetched {
                        chunks,
                        report: report.clone(),
                    };
                    self.rebuild_locked(&context_id, &slot, Some(prefetched))
                        .await?;
                }
            }
            previous
        };

        if let Some(previous) = previous {
            if previous.game_context_id != context_id {
                let old = self.slot(&previous.game_context_id);
                let _writer = old.writer.lock().await;
                self.load_locked(&previous.game_context_id, &old).await;
                self.drop_pack_locked(&previous.game_context_id, &old, &pack.id)
                    .await?;
            }
        }

        info!(
            context = %context_id,
            pack_id = %pack.id,
            chunks = report.chunks,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Delete a pack from the store and drop its chunks from the index.
    ///
    /// Returns `false` if neither the store nor any loaded index knew it.
    pub async fn remove_pack(&self, pack_id: &str) -> Result<bool, IndexError> {
        let context_id = match self.store.get_pack(pack_id).await? {
            Some(pack) => Some(pack.game_context_id),
            None => self.context_holding(pack_id),
        };
        let Some(context_id) = context_id else {
            return Ok(self.store.delete_pack(pack_id).await?);
        };

        let slot = self.slot(&context_id);
        let _writer = slot.writer.lock().await;
        self.load_locked(&context_id, &slot).await;
        let deleted = self.store.delete_pack(pack_id).await?;
        let dropped = self.drop_pack_locked(&context_id, &slot, pack_id).await?;
        info!(context = %context_id, pack_id = %pack_id, "pack removed");
        Ok(deleted || dropped)
    }

    /// Persist the enabled flag and re-index the pack's context.
    ///
    /// Returns `None` when the flag already had that value.
    pub async fn set_pack_enabled(
        &self,
        pack_id: &str,
        enabled: bool,
    ) -> Result<Option<PackIngestReport>, IndexError> {
        let mut pack = self
            .store
            .get_pack(pack_id)
            .await?
            .ok_or_else(|| IndexError::UnknownPack(pack_id.to_string()))?;
        if pack.enabled == enabled {
            return Ok(None);
        }
        pack.enabled = enabled;
        pack.updated_at = chrono::Utc::now().timestamp();
        self.add_pack(pack).await.map(Some)
    }

    /// Re-ingest every enabled pack of the context and swap in a fresh index.
    pub async fn rebuild(&self, context_id: &str) -> Result<Vec<PackIngestReport>, IndexError> {
        let slot = self.slot(context_id);
        let _writer = slot.writer.lock().await;
        self.rebuild_locked(context_id, &slot, None).await
    }

    /// [`add_pack`](Self::add_pack) on a background task.
    pub fn spawn_add_pack(
        self: &Arc<Self>,
        pack: KnowledgePack,
    ) -> tokio::task::JoinHandle<Result<PackIngestReport, IndexError>> {
        let index = Arc::clone(self);
        tokio::spawn(async move { index.add_pack(pack).await })
    }

    /// [`rebuild`](Self::rebuild) on a background task.
    pub fn spawn_rebuild(
        self: &Arc<Self>,
        context_id: impl Into<String>,
    ) -> tokio::task::JoinHandle<Result<Vec<PackIngestReport>, IndexError>> {
        let index = Arc::clone(self);
        let context_id = context_id.into();
        tokio::spawn(async move { index.rebuild(&context_id).await })
    }

    /// Top-ranked chunks for `query` in `context_id`.
    ///
    /// Never fails: an empty, disabled-only, or unrebuildable context
    /// yields an empty result. A stale context is rebuilt first.
    pub async fn query(
        &self,
        context_id: &str,
        query: &str,
        params: SearchParams,
    ) -> Vec<RetrievedChunk> {
        let params = params.clamped();
        let Some(slot) = self.read_slot(context_id).await else {
            return Vec::new();
        };
        for _ in 0..2 {
            let state = self.readable_state(context_id, &slot).await;
            let IndexState::Ready(snapshot) = &*state else {
                return Vec::new();
            };
            match search(snapshot, query, params) {
                Ok(results) => {
                    debug!(context = %context_id, hits = results.len(), "query served");
                    return results;
                }
                Err(e) => {
                    warn!(context = %context_id, error = %e, "index inconsistent; rebuilding");
                    let _writer = slot.writer.lock().await;
                    if Arc::ptr_eq(&slot.state.load_full(), &state) {
                        slot.state.store(Arc::new(IndexState::Stale(e.to_string())));
                    }
                }
            }
        }
        Vec::new()
    }

    pub async fn status(&self, context_id: &str) -> ContextStatus {
        let Some(slot) = self.read_slot(context_id).await else {
            return ContextStatus::Empty;
        };
        if matches!(&**slot.state.load(), IndexState::Unloaded) {
            let _writer = slot.writer.lock().await;
            self.load_locked(context_id, &slot).await;
        }
        if slot.building.load(Ordering::SeqCst) {
            return ContextStatus::Building;
        }
        match &**slot.state.load() {
            IndexState::Unloaded | IndexState::Empty => ContextStatus::Empty,
            IndexState::Ready(snapshot) => ContextStatus::Ready {
                chunks: snapshot.len(),
                packs: snapshot.pack_ids().len(),
                generation: snapshot.vocabulary().generation().to_string(),
            },
            IndexState::Stale(reason) => ContextStatus::Stale {
                reason: reason.clone(),
            },
        }
    }

    /// Whether any enabled pack exists for the context.
    pub async fn has_enabled_packs(&self, context_id: &str) -> bool {
        if let Some(slot) = self.existing_slot(context_id) {
            if let IndexState::Ready(snapshot) = &**slot.state.load() {
                if !snapshot.pack_ids().is_empty() {
                    return true;
                }
            }
        }
        match self.store.load_packs(context_id).await {
            Ok(packs) => packs.iter().any(|p| p.enabled),
            Err(e) => {
                warn!(context = %context_id, error = %e, "pack store unavailable");
                false
            }
        }
    }

    /// Current in-memory snapshot, without loading or rebuilding.
    pub fn snapshot(&self, context_id: &str) -> Option<Arc<IndexSnapshot>> {
        let slot = self.existing_slot(context_id)?;
        let state = slot.state.load();
        match &**state {
            IndexState::Ready(snapshot) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Write the context's current snapshot. `false` without persistence
    /// or a ready index.
    pub async fn save(&self, context_id: &str) -> Result<bool, IndexError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        match self.snapshot(context_id) {
            Some(snapshot) => {
                persistence.save(&snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn context_holding(&self, pack_id: &str) -> Option<String> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.iter().find_map(|(ctx, slot)| match &**slot.state.load() {
            IndexState::Ready(snap) if snap.contains_pack(pack_id) => Some(ctx.clone()),
            _ => None,
        })
    }

    /// Remove a pack's chunks from a loaded context. Caller holds the
    /// writer lock.
    async fn drop_pack_locked(
        &self,
        context_id: &str,
        slot: &ContextSlot,
        pack_id: &str,
    ) -> Result<bool, IndexError> {
        let current = slot.state.load_full();
        match &*current {
            IndexState::Ready(snapshot) if snapshot.contains_pack(pack_id) => {
                let chunks = snapshot.chunks_except(pack_id);
                let mut pack_ids = snapshot.pack_ids().clone();
                pack_ids.remove(pack_id);
                self.refit(slot, context_id, chunks, pack_ids);
                Ok(true)
            }
            IndexState::Stale(_) => {
                self.rebuild_locked(context_id, slot, None).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Refit over already-chunked text and swap it in. Caller holds the
    /// writer lock.
    fn refit(
        &self,
        slot: &ContextSlot,
        context_id: &str,
        chunks: Vec<Chunk>,
        pack_ids: BTreeSet<String>,
    ) {
        let _building = BuildingGuard::start(&slot.building);
        self.install(slot, IndexSnapshot::build(context_id, chunks, pack_ids));
    }

    /// State safe to search: loads an unloaded context and rebuilds a
    /// stale one. On rebuild failure the stale state is returned.
    async fn readable_state(&self, context_id: &str, slot: &ContextSlot) -> Arc<IndexState> {
        let current = slot.state.load_full();
        if !matches!(&*current, IndexState::Unloaded | IndexState::Stale(_)) {
            return current;
        }
        let _writer = slot.writer.lock().await;
        self.load_locked(context_id, slot).await;
        let current = slot.state.load_full();
        if let IndexState::Stale(reason) = &*current {
            info!(context = %context_id, reason = %reason, "rebuilding stale index before query");
            if let Err(e) = self.rebuild_locked(context_id, slot, None).await {
                warn!(context = %context_id, error = %e, "rebuild failed; returning no results");
                return current;
            }
            return slot.state.load_full();
        }
        current
    }

    /// Resolve an `Unloaded` slot. Caller holds the writer lock.
    async fn load_locked(&self, context_id: &str, slot: &ContextSlot) {
        if !matches!(&**slot.state.load(), IndexState::Unloaded) {
            return;
        }

        let enabled: BTreeSet<String> = match self.store.load_packs(context_id).await {
            Ok(packs) => packs
                .into_iter()
                .filter(|p| p.enabled)
                .map(|p| p.id)
                .collect(),
            Err(e) => {
                warn!(context = %context_id, error = %e, "pack store unavailable during load");
                slot.state
                    .store(Arc::new(IndexState::Stale(format!("pack store: {}", e))));
                return;
            }
        };

        let outcome = match &self.persistence {
            Some(persistence) => match persistence.load(context_id) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(context = %context_id, error = %e, "index file unreadable");
                    LoadOutcome::Invalid(e.to_string())
                }
            },
            None => LoadOutcome::NotFound,
        };

        let state = match outcome {
            LoadOutcome::Loaded(snapshot) => {
                if snapshot.pack_ids() != &enabled {
                    IndexState::Stale("index out of date with pack store".to_string())
                } else if enabled.is_empty() {
                    IndexState::Empty
                } else {
                    info!(
                        context = %context_id,
                        chunks = snapshot.len(),
                        generation = %snapshot.vocabulary().generation(),
                        "index loaded"
                    );
                    IndexState::Ready(Arc::new(snapshot))
                }
            }
            LoadOutcome::NotFound if enabled.is_empty() => IndexState::Empty,
            LoadOutcome::NotFound => IndexState::Stale("index missing".to_string()),
            LoadOutcome::Legacy(reason) => {
                info!(context = %context_id, reason = %reason, "legacy index file; will rebuild");
                IndexState::Stale(reason)
            }
            LoadOutcome::Invalid(reason) => {
                warn!(context = %context_id, reason = %reason, "discarding invalid index file");
                IndexState::Stale(reason)
            }
        };
        slot.state.store(Arc::new(state));
    }

    /// Full rebuild from the store. Caller holds the writer lock.
    ///
    /// On failure the previous state stays installed.
    async fn rebuild_locked(
        &self,
        context_id: &str,
        slot: &ContextSlot,
        mut prefetched: Option<Prefetched>,
    ) -> Result<Vec<PackIngestReport>, IndexError> {
        let _building = BuildingGuard::start(&slot.building);
        let packs = self.store.load_packs(context_id).await?;

        let mut chunks = Vec::new();
        let mut pack_ids = BTreeSet::new();
        let mut reports = Vec::new();
        for pack in packs.iter().filter(|p| p.enabled) {
            pack_ids.insert(pack.id.clone());
            let reuse = prefetched
                .as_ref()
                .map(|p| p.report.pack_id == pack.id)
                .unwrap_or(false);
            let fetched = if reuse { prefetched.take() } else { None };
            let (pack_chunks, report) = match fetched {
                Some(p) => (p.chunks, p.report),
                None => ingest_pack(pack, self.ingestor.as_ref(), self.chunking).await,
            };
            chunks.extend(pack_chunks);
            reports.push(report);
        }

        info!(
            context = %context_id,
            packs = pack_ids.len(),
            chunks = chunks.len(),
            "index rebuilt from pack store"
        );
        self.install(slot, IndexSnapshot::build(context_id, chunks, pack_ids));
        Ok(reports)
    }

    /// Swap in `snapshot` and autosave it. Caller holds the writer lock.
    fn install(&self, slot: &ContextSlot, snapshot: IndexSnapshot) {
        let snapshot = Arc::new(snapshot);
        debug!(
            context = %snapshot.context_id(),
            chunks = snapshot.len(),
            generation = %snapshot.vocabulary().generation(),
            "snapshot swapped"
        );
        let state = if snapshot.pack_ids().is_empty() {
            IndexState::Empty
        } else {
            IndexState::Ready(Arc::clone(&snapshot))
        };
        slot.state.store(Arc::new(state));

        if self.autosave {
            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.save(&snapshot) {
                    warn!(
                        context = %snapshot.context_id(),
                        error = %e,
                        "index save failed; in-memory index remains authoritative"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lorekeeper_core::models::{KnowledgeSource, SourceKind};
    use lorekeeper_core::store::memory::InMemoryPackStore;
    use lorekeeper_core::IngestError;

    struct NoteAdapter;

    #[async_trait]
    impl IngestAdapter for NoteAdapter {
        async fn ingest(&self, source: &KnowledgeSource) -> Result<String, IngestError> {
            match source.kind {
                SourceKind::Note => Ok(source.origin.clone()),
                _ => Err(IngestError::Io {
                    origin: source.origin.clone(),
                    message: "not available in tests".to_string(),
                }),
            }
        }
    }

    /// Notes only, counting every call.
    #[derive(Default)]
    struct CountingAdapter {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingAdapter {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IngestAdapter for CountingAdapter {
        async fn ingest(&self, source: &KnowledgeSource) -> Result<String, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            NoteAdapter.ingest(source).await
        }
    }

    fn persisted_index(
        store: Arc<InMemoryPackStore>,
        adapter: Arc<CountingAdapter>,
        dir: &std::path::Path,
    ) -> VectorIndex {
        VectorIndex::new(store, adapter, ChunkingParams::new(200, 20))
            .with_persistence(IndexPersistence::new(dir))
    }

    fn index() -> VectorIndex {
        VectorIndex::new(
            Arc::new(InMemoryPackStore::new()),
            Arc::new(NoteAdapter),
            ChunkingParams::new(200, 20),
        )
    }

    fn pack(ctx: &str, name: &str, text: &str) -> KnowledgePack {
        KnowledgePack::new(name, ctx).with_source(KnowledgeSource::note(name, text))
    }

    fn any_score() -> SearchParams {
        SearchParams::new(10, 0.0)
    }

    #[tokio::test]
    async fn test_unknown_context_is_empty() {
        let index = index();
        assert_eq!(index.status("nothing").await, ContextStatus::Empty);
        assert!(index.query("nothing", "boss", any_score()).await.is_empty());
        assert!(!index.has_enabled_packs("nothing").await);
    }

    #[tokio::test]
    async fn test_add_pack_then_query() {
        let index = index();
        let report = index
            .add_pack(pack("er", "Boss", "The strategy for defeating the boss involves dodging fire magic."))
            .await
            .unwrap();
        assert_eq!(report.summary(), "1 of 1 sources indexed");

        let hits = index.query("er", "boss strategy", any_score()).await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
        assert!(matches!(
            index.status("er").await,
            ContextStatus::Ready { chunks: 1, packs: 1, .. }
        ));
        assert!(index.has_enabled_packs("er").await);
    }

    #[tokio::test]
    async fn test_add_pack_refits_vocabulary() {
        let index = index();
        index.add_pack(pack("er", "a", "fire boss")).await.unwrap();
        let first = index.snapshot("er").unwrap();
        index.add_pack(pack("er", "b", "ice golem")).await.unwrap();
        let second = index.snapshot("er").unwrap();

        assert_ne!(first.vocabulary().generation(), second.vocabulary().generation());
        assert_eq!(second.vocabulary().total_documents(), 2);
        for entry in second.entries() {
            assert_eq!(entry.vector.generation(), second.vocabulary().generation());
        }
        // the old snapshot stays intact for readers still holding it
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sources_are_reported() {
        let index = index();
        let p = pack("er", "mix", "alpha beta")
            .with_source(KnowledgeSource::new(SourceKind::File, "gone", "/nope"));
        let report = index.add_pack(p).await.unwrap();
        assert_eq!(report.summary(), "1 of 2 sources indexed");
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_pack_drops_chunks() {
        let index = index();
        let keep = pack("er", "keep", "ice golem weakness");
        let gone = pack("er", "gone", "fire boss weakness");
        let gone_id = gone.id.clone();
        index.add_pack(keep).await.unwrap();
        index.add_pack(gone).await.unwrap();

        assert!(index.remove_pack(&gone_id).await.unwrap());
        let hits = index.query("er", "weakness fire", any_score()).await;
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.pack_id != gone_id));
        assert!(!index.remove_pack(&gone_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_removing_last_pack_empties_context() {
        let index = index();
        let p = pack("er", "only", "fire");
        let id = p.id.clone();
        index.add_pack(p).await.unwrap();
        index.remove_pack(&id).await.unwrap();
        assert_eq!(index.status("er").await, ContextStatus::Empty);
        assert!(index.query("er", "fire", any_score()).await.is_empty());
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let index = index();
        let p = pack("er", "toggle", "fire boss");
        let id = p.id.clone();
        index.add_pack(p).await.unwrap();

        assert!(index.set_pack_enabled(&id, false).await.unwrap().is_some());
        assert!(index.query("er", "fire", any_score()).await.is_empty());
        assert!(!index.has_enabled_packs("er").await);
        assert!(index.set_pack_enabled(&id, false).await.unwrap().is_none());

        index.set_pack_enabled(&id, true).await.unwrap();
        assert_eq!(index.query("er", "fire", any_score()).await.len(), 1);

        let err = index.set_pack_enabled("missing", true).await.unwrap_err();
        assert!(matches!(err, IndexError::UnknownPack(_)));
    }

    #[tokio::test]
    async fn test_moving_pack_between_contexts() {
        let index = index();
        let mut p = pack("er", "mover", "fire boss");
        index.add_pack(p.clone()).await.unwrap();
        p.game_context_id = "ds3".to_string();
        index.add_pack(p).await.unwrap();

        assert!(index.query("er", "fire", any_score()).await.is_empty());
        assert_eq!(index.query("ds3", "fire", any_score()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let index = index();
        index.add_pack(pack("er", "a", "fire boss")).await.unwrap();
        index.add_pack(pack("ds3", "b", "fire knight")).await.unwrap();
        let hits = index.query("er", "fire", any_score()).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_title, "a");
    }

    #[tokio::test]
    async fn test_store_without_index_is_stale_then_rebuilt_on_query() {
        let store = Arc::new(InMemoryPackStore::new());
        store.save_pack(&pack("er", "a", "fire boss")).await.unwrap();
        let index = VectorIndex::new(store, Arc::new(NoteAdapter), ChunkingParams::default());

        assert!(matches!(index.status("er").await, ContextStatus::Stale { .. }));
        assert_eq!(index.query("er", "fire", any_score()).await.len(), 1);
        assert!(matches!(index.status("er").await, ContextStatus::Ready { .. }));
    }

    #[tokio::test]
    async fn test_spawned_work_completes() {
        let index = Arc::new(index());
        let report = index
            .spawn_add_pack(pack("er", "bg", "fire boss"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.sources_indexed, 1);
        let reports = index.spawn_rebuild("er").await.unwrap().unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_reopened_index_ingests_only_the_new_pack() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryPackStore::new());
        let first = persisted_index(store.clone(), Arc::new(CountingAdapter::default()), dir.path());
        for name in ["a", "b", "c"] {
            first.add_pack(pack("er", name, "fire boss notes")).await.unwrap();
        }
        drop(first);

        let adapter = Arc::new(CountingAdapter::default());
        let reopened = persisted_index(store, adapter.clone(), dir.path());
        reopened.add_pack(pack("er", "d", "ice golem")).await.unwrap();

        assert_eq!(adapter.calls(), 1);
        assert!(matches!(
            reopened.status("er").await,
            ContextStatus::Ready { packs: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_reopened_index_removes_without_ingesting() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryPackStore::new());
        let first = persisted_index(store.clone(), Arc::new(CountingAdapter::default()), dir.path());
        let gone = pack("er", "gone", "fire boss");
        let gone_id = gone.id.clone();
        first.add_pack(gone).await.unwrap();
        first.add_pack(pack("er", "keep", "ice golem")).await.unwrap();
        drop(first);

        let adapter = Arc::new(CountingAdapter::default());
        let reopened = persisted_index(store, adapter.clone(), dir.path());
        assert!(reopened.remove_pack(&gone_id).await.unwrap());

        assert_eq!(adapter.calls(), 0);
        assert!(reopened.query("er", "fire", any_score()).await.is_empty());
        assert_eq!(reopened.query("er", "golem", any_score()).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_of_one_pack_agree_with_store() {
        let store = Arc::new(InMemoryPackStore::new());
        let index = Arc::new(VectorIndex::new(
            store.clone(),
            Arc::new(NoteAdapter),
            ChunkingParams::new(200, 20),
        ));
        let base = pack("er", "shared", "version zero");
        let id = base.id.clone();

        for round in 0..20 {
            let handles: Vec<_> = (0..4)
                .map(|writer| {
                    let mut p = base.clone();
                    p.sources = vec![KnowledgeSource::note("shared", format!("round{round} writer{writer}"))];
                    index.spawn_add_pack(p)
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let stored = store.get_pack(&id).await.unwrap().unwrap();
            let snapshot = index.snapshot("er").unwrap();
            let indexed: Vec<&str> = snapshot
                .chunks_of(&id)
                .into_iter()
                .map(|c| c.text.as_str())
                .collect();
            assert_eq!(indexed, vec![stored.sources[0].origin.as_str()], "round {round}");
        }
    }

    #[tokio::test]
    async fn test_wholly_failed_pack_keeps_other_packs_queryable() {
        let index = index();
        index.add_pack(pack("er", "guide", "fire boss weakness")).await.unwrap();

        let broken = KnowledgePack::new("broken", "er")
            .with_source(KnowledgeSource::new(SourceKind::File, "missing", "/nope"))
            .with_source(KnowledgeSource::new(SourceKind::Url, "down", "https://example.invalid"));
        let report = index.add_pack(broken).await.unwrap();
        assert_eq!(report.sources_indexed, 0);
        assert_eq!(report.chunks, 0);
        assert_eq!(report.failures.len(), 2);

        assert!(matches!(
            index.status("er").await,
            ContextStatus::Ready { chunks: 1, packs: 2, .. }
        ));
        let hits = index.query("er", "fire weakness", any_score()).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_title, "guide");
    }

    #[tokio::test]
    async fn test_status_reports_building_while_a_write_runs() {
        let index = index();
        index.add_pack(pack("er", "a", "fire boss")).await.unwrap();
        let slot = index.existing_slot("er").unwrap();

        let guard = BuildingGuard::start(&slot.building);
        assert_eq!(index.status("er").await, ContextStatus::Building);
        drop(guard);
        assert!(matches!(index.status("er").await, ContextStatus::Ready { .. }));

        index.refit(&slot, "er", Vec::new(), BTreeSet::new());
        assert!(!slot.building.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reads_of_unknown_contexts_allocate_nothing() {
        let index = index();
        for ctx in ["one", "two", "three"] {
            assert!(index.query(ctx, "fire", any_score()).await.is_empty());
            assert_eq!(index.status(ctx).await, ContextStatus::Empty);
            assert!(!index.has_enabled_packs(ctx).await);
            assert!(index.snapshot(ctx).is_none());
        }
        assert!(index.slots.read().unwrap().is_empty());
    }
}
