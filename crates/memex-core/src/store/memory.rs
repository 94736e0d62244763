//! In-memory [`Index`] implementation for tests and ephemeral use.
//!
//! Collections are `BTreeMap`s behind a `tokio::sync::RwLock`, so `get`
//! returns documents ordered by id. Queries are brute-force cosine
//! similarity over every stored vector.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::{cosine_similarity, embed_query, Embedder, EmbeddingSpec};
use crate::error::SyncError;
use crate::models::Document;

use super::{project, rank_hits, CollectionInfo, Include, Index, QueryHit, StoredDocument};

struct StoredEntry {
    doc: Document,
    vector: Vec<f32>,
}

struct Collection {
    spec: EmbeddingSpec,
    entries: BTreeMap<String, StoredEntry>,
}

/// In-memory index backed by an [`Embedder`].
pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Collection>>,
    fail_writes: AtomicBool,
    write_calls: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent `add` or `replace` fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `add` and `replace` calls received, including failed ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn begin_write(&self) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure");
        }
        Ok(())
    }

    /// Embed a batch before any lock is taken, so a failure leaves every
    /// collection untouched.
    async fn embed_entries(&self, documents: &[Document]) -> Result<Vec<(String, StoredEntry)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != documents.len() {
            bail!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            );
        }
        Ok(documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                (
                    doc.id.clone(),
                    StoredEntry {
                        doc: doc.clone(),
                        vector,
                    },
                )
            })
            .collect())
    }
}

fn collection_info(name: &str, c: &Collection) -> CollectionInfo {
    CollectionInfo {
        name: name.to_string(),
        spec: c.spec.clone(),
        count: c.entries.len(),
    }
}

#[async_trait]
impl Index for InMemoryIndex {
    fn embedding_spec(&self) -> EmbeddingSpec {
        self.embedder.spec()
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        spec: &EmbeddingSpec,
    ) -> Result<CollectionInfo> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(name.to_string()).or_insert_with(|| Collection {
            spec: spec.clone(),
            entries: BTreeMap::new(),
        });
        if &collection.spec != spec {
            bail!(
                "collection '{}' was created with {} ({} dims), not {} ({} dims)",
                name,
                collection.spec.model,
                collection.spec.dims,
                spec.model,
                spec.dims
            );
        }
        Ok(collection_info(name, collection))
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionInfo> {
        let collections = self.collections.read().await;
        collections
            .get(name)
            .map(|c| collection_info(name, c))
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()).into())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn add(&self, name: &str, documents: &[Document]) -> Result<()> {
        self.begin_write()?;
        if !self.collections.read().await.contains_key(name) {
            return Err(SyncError::CollectionNotFound(name.to_string()).into());
        }

        let entries = self.embed_entries(documents).await?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))?;
        collection.entries.extend(entries);
        Ok(())
    }

    async fn replace(
        &self,
        name: &str,
        spec: &EmbeddingSpec,
        documents: &[Document],
    ) -> Result<()> {
        self.begin_write()?;
        let entries = self.embed_entries(documents).await?;

        self.collections.write().await.insert(
            name.to_string(),
            Collection {
                spec: spec.clone(),
                entries: entries.into_iter().collect(),
            },
        );
        Ok(())
    }

    async fn query(&self, name: &str, text: &str, k: usize) -> Result<Vec<QueryHit>> {
        if !self.collections.read().await.contains_key(name) {
            return Err(SyncError::CollectionNotFound(name.to_string()).into());
        }
        let query_vec = embed_query(self.embedder.as_ref(), text).await?;

        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))?;
        let hits = collection
            .entries
            .values()
            .map(|e| QueryHit {
                id: e.doc.id.clone(),
                content: e.doc.content.clone(),
                metadata: e.doc.metadata.clone(),
                score: cosine_similarity(&query_vec, &e.vector),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn get(&self, name: &str, include: Include) -> Result<Vec<StoredDocument>> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| SyncError::CollectionNotFound(name.to_string()))?;
        Ok(collection
            .entries
            .values()
            .map(|e| project(&e.doc, include))
            .collect())
    }
}
