//! SQLite-backed [`RecordStore`] implementation.
//!
//! Rows live in the `records` table. The primary-key tuple is stored as a
//! JSON array and fields as a JSON object. Pages are read in `rowid` order,
//! which upserts preserve, so a paged scan sees each row once even while
//! live writes update existing rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use index_sync_core::models::{Record, RecordIdentity};
use index_sync_core::store::{RecordFilter, RecordStore};

/// SQLite implementation of the [`RecordStore`] trait.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn encode_key(key: &[String]) -> Result<String> {
    Ok(serde_json::to_string(key)?)
}

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let model: String = row.get("model");
    let raw_key: String = row.get("record_key");
    let raw_fields: String = row.get("fields_json");

    let key: Vec<String> = serde_json::from_str(&raw_key)
        .with_context(|| format!("corrupt record key for {}: {}", model, raw_key))?;
    let fields: Map<String, Value> = serde_json::from_str(&raw_fields)
        .with_context(|| format!("corrupt fields for {}[{}]", model, key.join(",")))?;

    Ok(Record::persisted(model, key, fields))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn driver(&self) -> &str {
        "sqlite"
    }

    fn supports_worker_rebuild(&self) -> bool {
        true
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64> {
        if filter.types.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM records WHERE model IN ({})",
            placeholders(filter.types.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for ty in &filter.types {
            query = query.bind(ty);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, filter: &RecordFilter, offset: u64, limit: u64) -> Result<Vec<Record>> {
        if filter.types.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT model, record_key, fields_json FROM records
            WHERE model IN ({})
            ORDER BY rowid
            LIMIT ? OFFSET ?
            "#,
            placeholders(filter.types.len())
        );
        let mut query = sqlx::query(&sql);
        for ty in &filter.types {
            query = query.bind(ty);
        }
        let rows = query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find(&self, identity: &RecordIdentity) -> Result<Option<Record>> {
        let row = sqlx::query(
            "SELECT model, record_key, fields_json FROM records WHERE model = ? AND record_key = ?",
        )
        .bind(&identity.model)
        .bind(encode_key(&identity.key)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO records (model, record_key, fields_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(model, record_key) DO UPDATE SET
                fields_json = excluded.fields_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.model)
        .bind(encode_key(&record.key)?)
        .bind(serde_json::to_string(&record.fields)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, identity: &RecordIdentity) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE model = ? AND record_key = ?")
            .bind(&identity.model)
            .bind(encode_key(&identity.key)?)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
