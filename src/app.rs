//! Builds the service stack described by a [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::analytics::JsonlQueryLog;
use crate::config::Config;
use crate::index::VectorIndex;
use crate::ingest::SourceIngestor;
use crate::knowledge::{KnowledgeIntegration, KnowledgeSettings};
use crate::persistence::IndexPersistence;
use crate::sqlite_store::SqlitePackStore;

pub struct Lorekeeper {
    pub store: Arc<SqlitePackStore>,
    pub index: Arc<VectorIndex>,
    pub knowledge: KnowledgeIntegration,
    pub settings: KnowledgeSettings,
}

impl Lorekeeper {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(
            SqlitePackStore::open(&config.store.path)
                .await
                .with_context(|| {
                    format!("Failed to open pack store {}", config.store.path.display())
                })?,
        );
        let ingestor = SourceIngestor::new(&config.ingest).context("Failed to build ingestor")?;

        let index = VectorIndex::new(store.clone(), Arc::new(ingestor), config.chunking.params())
            .with_persistence(IndexPersistence::new(&config.index.dir))
            .with_autosave(config.index.autosave);
        let index = Arc::new(index);

        let mut knowledge = KnowledgeIntegration::new(index.clone());
        if let Some(path) = &config.analytics.query_log {
            knowledge = knowledge.with_query_log(Arc::new(JsonlQueryLog::open(path)?));
        }

        Ok(Self {
            store,
            index,
            knowledge,
            settings: KnowledgeSettings::from(&config.retrieval).clamped(),
        })
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
