use anyhow::Result;
use sqlx::SqlitePool;

/// Create the pack tables if they do not exist. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            game_context_id TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sources keep their position so rebuilds chunk them in the same order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pack_sources (
            id TEXT NOT NULL,
            pack_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            origin TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (pack_id, id),
            UNIQUE(pack_id, position),
            FOREIGN KEY (pack_id) REFERENCES packs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_packs_context ON packs(game_context_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pack_sources_pack ON pack_sources(pack_id)")
        .execute(pool)
        .await?;

    Ok(())
}
