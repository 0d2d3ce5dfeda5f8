//! SQLite-backed [`PackStore`] implementation.
//!
//! Packs live in `packs`, their ordered sources in `pack_sources` (see
//! [`migrate`](crate::migrate)). Tags are stored as a JSON array.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use lorekeeper_core::models::{KnowledgePack, KnowledgeSource, SourceKind};
use lorekeeper_core::store::PackStore;
use lorekeeper_core::StoreError;

use crate::{db, migrate};

/// SQLite implementation of [`PackStore`].
pub struct SqlitePackStore {
    pool: SqlitePool,
}

impl SqlitePackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_sources(&self, pack_id: &str) -> Result<Vec<KnowledgeSource>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, title, origin, tags_json FROM pack_sources WHERE pack_id = ? ORDER BY position",
        )
        .bind(pack_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(|row| source_from_row(pack_id, row)).collect()
    }

    async fn pack_from_row(&self, row: &SqliteRow) -> Result<KnowledgePack, StoreError> {
        let id: String = row.try_get("id").map_err(backend)?;
        let sources = self.load_sources(&id).await?;
        Ok(KnowledgePack {
            name: row.try_get("name").map_err(backend)?,
            description: row.try_get("description").map_err(backend)?,
            game_context_id: row.try_get("game_context_id").map_err(backend)?,
            enabled: row.try_get::<i64, _>("enabled").map_err(backend)? != 0,
            created_at: row.try_get("created_at").map_err(backend)?,
            updated_at: row.try_get("updated_at").map_err(backend)?,
            sources,
            id,
        })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn source_from_row(pack_id: &str, row: &SqliteRow) -> Result<KnowledgeSource, StoreError> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    let kind = SourceKind::parse(&kind).ok_or_else(|| StoreError::Corrupt {
        id: pack_id.to_string(),
        message: format!("unknown source kind '{}'", kind),
    })?;
    let tags_json: String = row.try_get("tags_json").map_err(backend)?;
    let tags: BTreeSet<String> =
        serde_json::from_str(&tags_json).map_err(|e| StoreError::Corrupt {
            id: pack_id.to_string(),
            message: format!("bad tags: {}", e),
        })?;
    Ok(KnowledgeSource {
        id: row.try_get("id").map_err(backend)?,
        kind,
        title: row.try_get("title").map_err(backend)?,
        origin: row.try_get("origin").map_err(backend)?,
        tags,
    })
}

#[async_trait]
impl PackStore for SqlitePackStore {
    async fn save_pack(&self, pack: &KnowledgePack) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO packs (id, name, description, game_context_id, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                game_context_id = excluded.game_context_id,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pack.id)
        .bind(&pack.name)
        .bind(&pack.description)
        .bind(&pack.game_context_id)
        .bind(pack.enabled as i64)
        .bind(pack.created_at)
        .bind(pack.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM pack_sources WHERE pack_id = ?")
            .bind(&pack.id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (position, source) in pack.sources.iter().enumerate() {
            let tags_json =
                serde_json::to_string(&source.tags).map_err(|e| StoreError::Corrupt {
                    id: pack.id.clone(),
                    message: e.to_string(),
                })?;
            sqlx::query(
                r#"
                INSERT INTO pack_sources (id, pack_id, position, kind, title, origin, tags_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&source.id)
            .bind(&pack.id)
            .bind(position as i64)
            .bind(source.kind.as_str())
            .bind(&source.title)
            .bind(&source.origin)
            .bind(&tags_json)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn load_packs(&self, game_context_id: &str) -> Result<Vec<KnowledgePack>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, game_context_id, enabled, created_at, updated_at
            FROM packs WHERE game_context_id = ? ORDER BY id
            "#,
        )
        .bind(game_context_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut packs = Vec::with_capacity(rows.len());
        for row in &rows {
            packs.push(self.pack_from_row(row).await?);
        }
        Ok(packs)
    }

    async fn get_pack(&self, id: &str) -> Result<Option<KnowledgePack>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, game_context_id, enabled, created_at, updated_at
            FROM packs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(self.pack_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn delete_pack(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM pack_sources WHERE pack_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let result = sqlx::query("DELETE FROM packs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_contexts(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT game_context_id FROM packs ORDER BY game_context_id")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqlitePackStore {
        SqlitePackStore::open(&tmp.path().join("packs.sqlite"))
            .await
            .unwrap()
    }

    fn sample_pack(ctx: &str) -> KnowledgePack {
        KnowledgePack::new("Boss Guide", ctx)
            .with_source(KnowledgeSource::note("intro", "dodge the fire").with_tags(["boss"]))
            .with_source(KnowledgeSource::new(SourceKind::Url, "wiki", "https://x.test/a"))
            .with_source(KnowledgeSource::new(SourceKind::File, "notes", "/tmp/notes.md"))
    }

    #[tokio::test]
    async fn test_save_and_get_preserves_source_order() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let pack = sample_pack("elden-ring");
        store.save_pack(&pack).await.unwrap();

        let loaded = store.get_pack(&pack.id).await.unwrap().unwrap();
        assert_eq!(loaded, pack);
        let titles: Vec<&str> = loaded.sources.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["intro", "wiki", "notes"]);
        assert!(loaded.sources[0].tags.contains("boss"));
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let mut pack = sample_pack("ctx");
        store.save_pack(&pack).await.unwrap();

        pack.enabled = false;
        pack.sources.truncate(1);
        store.save_pack(&pack).await.unwrap();

        let loaded = store.get_pack(&pack.id).await.unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_load_packs_scoped_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        for _ in 0..3 {
            store.save_pack(&sample_pack("a")).await.unwrap();
        }
        store.save_pack(&sample_pack("b")).await.unwrap();

        let packs = store.load_packs("a").await.unwrap();
        assert_eq!(packs.len(), 3);
        for w in packs.windows(2) {
            assert!(w[0].id < w[1].id);
        }
        assert_eq!(store.list_contexts().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_cascades_sources() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let pack = sample_pack("ctx");
        store.save_pack(&pack).await.unwrap();

        assert!(store.delete_pack(&pack.id).await.unwrap());
        assert!(!store.delete_pack(&pack.id).await.unwrap());
        assert!(store.get_pack(&pack.id).await.unwrap().is_none());

        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pack_sources")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let tmp = TempDir::new().unwrap();
        let pack = sample_pack("ctx");
        {
            let store = store(&tmp).await;
            store.save_pack(&pack).await.unwrap();
            store.close().await;
        }
        let store = store(&tmp).await;
        assert_eq!(store.load_packs("ctx").await.unwrap().len(), 1);
    }
}
