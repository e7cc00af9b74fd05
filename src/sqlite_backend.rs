//! SQLite-backed [`SearchBackend`] implementation.
//!
//! Documents live in the `search_documents` table of the search database,
//! keyed by (index, culture, document key). Writes are staged per target in
//! memory and applied in a single transaction on [`SearchBackend::commit`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use index_sync_core::backend::{PendingWrite, SearchBackend};
use index_sync_core::models::{Document, IndexTarget};

/// Number of committed documents under one (index, culture, tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub index: String,
    pub culture: String,
    pub tag: String,
    pub documents: i64,
    pub last_indexed: i64,
}

pub struct SqliteSearchBackend {
    pool: SqlitePool,
    staged: Mutex<HashMap<IndexTarget, Vec<PendingWrite>>>,
}

impl SqliteSearchBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn stage(&self, target: &IndexTarget, write: PendingWrite) -> Result<()> {
        self.staged
            .lock()
            .map_err(|_| anyhow!("staging lock poisoned"))?
            .entry(target.clone())
            .or_default()
            .push(write);
        Ok(())
    }

    /// Committed documents of one target, ordered by key.
    pub async fn documents(&self, target: &IndexTarget) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_key, tag, model, title, fields_json FROM search_documents
            WHERE index_name = ? AND culture = ?
            ORDER BY doc_key
            "#,
        )
        .bind(&target.index)
        .bind(&target.culture)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let fields_json: String = row.get("fields_json");
                let fields: BTreeMap<String, String> = serde_json::from_str(&fields_json)?;
                Ok(Document {
                    key: row.get("doc_key"),
                    tag: row.get("tag"),
                    model: row.get("model"),
                    title: row.get("title"),
                    fields,
                })
            })
            .collect()
    }

    /// Per-tag document counts across all targets.
    pub async fn tag_counts(&self) -> Result<Vec<TagCount>> {
        let rows = sqlx::query(
            r#"
            SELECT index_name, culture, tag, COUNT(*) AS documents, MAX(indexed_at) AS last_indexed
            FROM search_documents
            GROUP BY index_name, culture, tag
            ORDER BY index_name, culture, tag
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TagCount {
                index: row.get("index_name"),
                culture: row.get("culture"),
                tag: row.get("tag"),
                documents: row.get("documents"),
                last_indexed: row.get("last_indexed"),
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for SqliteSearchBackend {
    async fn upsert(&self, target: &IndexTarget, doc: &Document) -> Result<()> {
        self.stage(target, PendingWrite::Upsert(doc.clone()))
    }

    async fn delete(&self, target: &IndexTarget, key: &str) -> Result<()> {
        self.stage(target, PendingWrite::Delete(key.to_string()))
    }

    async fn delete_by_tag(&self, target: &IndexTarget, tag: &str) -> Result<()> {
        self.stage(target, PendingWrite::DeleteByTag(tag.to_string()))
    }

    async fn commit(&self, target: &IndexTarget) -> Result<u64> {
        let writes = self
            .staged
            .lock()
            .map_err(|_| anyhow!("staging lock poisoned"))?
            .remove(target)
            .unwrap_or_default();
        if writes.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for write in &writes {
            match write {
                PendingWrite::Upsert(doc) => {
                    sqlx::query(
                        r#"
                        INSERT INTO search_documents
                            (index_name, culture, doc_key, tag, model, title, fields_json, indexed_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(index_name, culture, doc_key) DO UPDATE SET
                            tag = excluded.tag,
                            model = excluded.model,
                            title = excluded.title,
                            fields_json = excluded.fields_json,
                            indexed_at = excluded.indexed_at
                        "#,
                    )
                    .bind(&target.index)
                    .bind(&target.culture)
                    .bind(&doc.key)
                    .bind(&doc.tag)
                    .bind(&doc.model)
                    .bind(&doc.title)
                    .bind(serde_json::to_string(&doc.fields)?)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                PendingWrite::Delete(key) => {
                    sqlx::query(
                        "DELETE FROM search_documents WHERE index_name = ? AND culture = ? AND doc_key = ?",
                    )
                    .bind(&target.index)
                    .bind(&target.culture)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                }
                PendingWrite::DeleteByTag(tag) => {
                    sqlx::query(
                        "DELETE FROM search_documents WHERE index_name = ? AND culture = ? AND tag = ?",
                    )
                    .bind(&target.index)
                    .bind(&target.culture)
                    .bind(tag)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;

        Ok(writes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use tempfile::TempDir;

    async fn backend(tmp: &TempDir) -> SqliteSearchBackend {
        let pool = db::connect_path(&tmp.path().join("search.sqlite")).await.unwrap();
        migrate::migrate_search(&pool).await.unwrap();
        SqliteSearchBackend::new(pool)
    }

    fn doc(key: &str, tag: &str) -> Document {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), format!("title of {key}"));
        Document {
            key: key.to_string(),
            tag: tag.to_string(),
            model: tag.to_string(),
            title: Some(format!("title of {key}")),
            fields,
        }
    }

    #[tokio::test]
    async fn test_staged_until_commit() {
        let tmp = TempDir::new().unwrap();
        let backend = backend(&tmp).await;
        let en = IndexTarget::new("catalog", "en");

        backend.upsert(&en, &doc("Article:1", "Content")).await.unwrap();
        assert!(backend.documents(&en).await.unwrap().is_empty());

        assert_eq!(backend.commit(&en).await.unwrap(), 1);
        let docs = backend.documents(&en).await.unwrap();
        assert_eq!(docs, vec![doc("Article:1", "Content")]);
    }

    #[tokio::test]
    async fn test_targets_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let backend = backend(&tmp).await;
        let en = IndexTarget::new("catalog", "en");
        let fr = IndexTarget::new("catalog", "fr");

        backend.upsert(&en, &doc("Article:1", "Content")).await.unwrap();
        backend.upsert(&fr, &doc("Article:1", "Content")).await.unwrap();
        backend.commit(&en).await.unwrap();

        assert_eq!(backend.documents(&en).await.unwrap().len(), 1);
        assert!(backend.documents(&fr).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_upsert_in_one_commit_and_tag_purge() {
        let tmp = TempDir::new().unwrap();
        let backend = backend(&tmp).await;
        let en = IndexTarget::new("catalog", "en");

        backend.upsert(&en, &doc("Article:1", "Content")).await.unwrap();
        backend.upsert(&en, &doc("Page:1", "Page")).await.unwrap();
        backend.commit(&en).await.unwrap();

        backend.delete(&en, "Article:1").await.unwrap();
        backend.upsert(&en, &doc("Article:1", "Content")).await.unwrap();
        backend.commit(&en).await.unwrap();
        assert_eq!(backend.documents(&en).await.unwrap().len(), 2);

        backend.delete_by_tag(&en, "Content").await.unwrap();
        backend.commit(&en).await.unwrap();
        let counts = backend.tag_counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].tag, "Page");
        assert_eq!(counts[0].documents, 1);
    }
}
