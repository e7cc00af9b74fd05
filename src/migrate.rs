use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, StoreDriver};
use crate::db;

/// Create the record store and search index schemas. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    if config.store.driver == StoreDriver::Sqlite {
        let store = db::connect_store(config).await?;
        migrate_store(&store).await?;
        store.close().await;
    }

    let search = db::connect_search(config).await?;
    migrate_search(&search).await?;
    search.close().await;

    std::fs::create_dir_all(&config.state.dir)?;
    Ok(())
}

pub async fn migrate_store(pool: &SqlitePool) -> Result<()> {
    // record_key holds the primary-key tuple as a JSON array
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            model TEXT NOT NULL,
            record_key TEXT NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (model, record_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_model ON records(model)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_search(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_documents (
            index_name TEXT NOT NULL,
            culture TEXT NOT NULL,
            doc_key TEXT NOT NULL,
            tag TEXT NOT NULL,
            model TEXT NOT NULL,
            title TEXT,
            fields_json TEXT NOT NULL DEFAULT '{}',
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, culture, doc_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_documents_tag ON search_documents(index_name, culture, tag)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
