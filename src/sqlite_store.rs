//! SQLite-backed [`Index`] implementation.
//!
//! Each document row carries its embedding as a little-endian f32 BLOB.
//! Queries load every vector of the collection and rank them with cosine
//! similarity in Rust, which is plenty for a personal corpus.
//!
//! Writes embed the whole batch first, then commit it in one transaction,
//! so a failing embedder or a failing insert leaves the collection as it was.
//! A flush (`replace`) drops and refills the collection inside that same
//! transaction.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use memex_core::embedding::{
    blob_to_vec, cosine_similarity, embed_query, vec_to_blob, Embedder, EmbeddingSpec,
};
use memex_core::error::SyncError;
use memex_core::models::{Document, Metadata};
use memex_core::store::{rank_hits, CollectionInfo, Include, Index, QueryHit, StoredDocument};

use crate::config::Config;
use crate::{db, embedding, migrate};

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl SqliteIndex {
    /// Wrap an already migrated pool.
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            pool,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Connect, migrate, and wire up the configured embedding provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::new(pool, embedder, config.embedding.batch_size))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn collection_row(&self, name: &str) -> Result<Option<EmbeddingSpec>> {
        let row = sqlx::query("SELECT model, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let model: String = row.try_get("model")?;
                let dims: i64 = row.try_get("dims")?;
                Ok(Some(EmbeddingSpec::new(model, dims as usize)))
            }
            None => Ok(None),
        }
    }

    async fn count(&self, name: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    /// Embed every document, batch by batch, before anything is written.
    async fn embed_all(&self, name: &str, documents: &[Document]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(documents.len());
        for batch in documents.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Embedding batch for '{}' failed", name))?;
            if embedded.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} documents",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn require_collection(&self, name: &str) -> Result<()> {
        if self.collection_row(name).await?.is_none() {
            return Err(SyncError::CollectionNotFound(name.to_string()).into());
        }
        Ok(())
    }
}

async fn upsert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    documents: &[Document],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for (doc, vector) in documents.iter().zip(vectors.iter()) {
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, content, metadata_json, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(&doc.id)
        .bind(&doc.content)
        .bind(&metadata_json)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn parse_metadata(json: &str) -> Result<Metadata> {
    serde_json::from_str(json).with_context(|| format!("Corrupt metadata_json: {}", json))
}

#[async_trait]
impl Index for SqliteIndex {
    fn embedding_spec(&self) -> EmbeddingSpec {
        self.embedder.spec()
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        spec: &EmbeddingSpec,
    ) -> Result<CollectionInfo> {
        match self.collection_row(name).await? {
            Some(existing) if &existing != spec => bail!(
                "collection '{}' was created with {} ({} dims), not {} ({} dims); run `memex sync {} --flush` to rebuild it",
                name,
                existing.model,
                existing.dims,
                spec.model,
                spec.dims,
                name
            ),
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(name)
                .bind(&spec.model)
                .bind(spec.dims as i64)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
                tracing::debug!("created collection '{}' ({})", name, spec.model);
            }
        }

        Ok(CollectionInfo {
            name: name.to_string(),
            spec: spec.clone(),
            count: self.count(name).await?,
        })
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionInfo> {
        let spec = self
            .collection_row(name)
            .await?
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            spec,
            count: self.count(name).await?,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add(&self, name: &str, documents: &[Document]) -> Result<()> {
        self.require_collection(name).await?;
        if documents.is_empty() {
            return Ok(());
        }

        let vectors = self.embed_all(name, documents).await?;

        let mut tx = self.pool.begin().await?;
        upsert_rows(&mut tx, name, documents, &vectors).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn replace(
        &self,
        name: &str,
        spec: &EmbeddingSpec,
        documents: &[Document],
    ) -> Result<()> {
        let vectors = self.embed_all(name, documents).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(&spec.model)
            .bind(spec.dims as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        upsert_rows(&mut tx, name, documents, &vectors).await?;
        tx.commit().await?;

        tracing::debug!("rebuilt collection '{}' with {} documents", name, documents.len());
        Ok(())
    }

    async fn query(&self, name: &str, text: &str, k: usize) -> Result<Vec<QueryHit>> {
        self.require_collection(name).await?;
        let query_vec = embed_query(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM documents WHERE collection = ?",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let metadata_json: String = row.try_get("metadata_json")?;
            hits.push(QueryHit {
                id: row.try_get("id")?,
                content: row.try_get("content")?,
                metadata: parse_metadata(&metadata_json)?,
                score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
            });
        }

        Ok(rank_hits(hits, k))
    }

    async fn get(&self, name: &str, include: Include) -> Result<Vec<StoredDocument>> {
        self.require_collection(name).await?;

        let rows = sqlx::query(
            "SELECT id, content, metadata_json FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let content = match include {
                Include::Full => Some(row.try_get::<String, _>("content")?),
                _ => None,
            };
            let metadata = match include {
                Include::Metadata | Include::Full => {
                    let json: String = row.try_get("metadata_json")?;
                    Some(parse_metadata(&json)?)
                }
                Include::Ids => None,
            };
            docs.push(StoredDocument {
                id,
                content,
                metadata,
            });
        }
        Ok(docs)
    }
}
