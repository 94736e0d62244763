//! Index abstraction for memex.
//!
//! The [`Index`] trait is the only way the pipeline touches persistent
//! state: reconciliation writes through it, the watch loop seeds its
//! watermarks from it, and retrieval queries it. Backends own embedding:
//! callers hand over plain [`Document`]s and query text.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::EmbeddingSpec;
use crate::models::{Document, Metadata};

/// Summary of an existing collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub spec: EmbeddingSpec,
    pub count: usize,
}

/// One nearest-neighbor result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Cosine similarity between the query and the stored vector.
    pub score: f32,
}

/// Which fields [`Index::get`] should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Include {
    Ids,
    Metadata,
    Full,
}

/// A document read back from an index. Fields not requested are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: String,
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Abstract vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_or_create_collection`](Index::get_or_create_collection) | Ensure a collection exists with a given model |
/// | [`get_collection`](Index::get_collection) | Look up a collection, failing if absent |
/// | [`delete_collection`](Index::delete_collection) | Drop a collection and all its documents |
/// | [`add`](Index::add) | Upsert a batch of documents by id |
/// | [`replace`](Index::replace) | Swap a collection's contents for a new batch |
/// | [`query`](Index::query) | Top-k nearest neighbors of a query text |
/// | [`get`](Index::get) | Read back every document in a collection |
#[async_trait]
pub trait Index: Send + Sync {
    /// The model used for every vector this index writes.
    fn embedding_spec(&self) -> EmbeddingSpec;

    /// Return the named collection, creating it empty if needed.
    ///
    /// Fails if the collection exists but was created with a different
    /// model or dimensionality.
    async fn get_or_create_collection(&self, name: &str, spec: &EmbeddingSpec)
        -> Result<CollectionInfo>;

    /// Fails with [`SyncError::CollectionNotFound`](crate::error::SyncError::CollectionNotFound)
    /// when the collection does not exist.
    async fn get_collection(&self, name: &str) -> Result<CollectionInfo>;

    /// Remove the collection and its documents. Absent collections are a no-op.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert or overwrite documents by id.
    ///
    /// The batch is applied entirely or not at all.
    async fn add(&self, name: &str, documents: &[Document]) -> Result<()>;

    /// Make `name` hold exactly `documents`, recorded under `spec`.
    ///
    /// Any previous collection is dropped whatever its model. The swap is
    /// all-or-nothing: if it fails, the previous collection (or its
    /// absence) is left as it was.
    async fn replace(&self, name: &str, spec: &EmbeddingSpec, documents: &[Document])
        -> Result<()>;

    /// Up to `k` documents ranked by descending similarity, ties by id.
    async fn query(&self, name: &str, text: &str, k: usize) -> Result<Vec<QueryHit>>;

    /// Every document in the collection, ordered by id.
    async fn get(&self, name: &str, include: Include) -> Result<Vec<StoredDocument>>;

    /// Convenience wrapper around [`get`](Index::get) with [`Include::Ids`].
    async fn ids(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .get(name, Include::Ids)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }
}

/// Sort hits by descending score (ties by ascending id) and keep `k`.
pub fn rank_hits(mut hits: Vec<QueryHit>, k: usize) -> Vec<QueryHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

/// Shape a full document according to `include`.
pub fn project(doc: &Document, include: Include) -> StoredDocument {
    StoredDocument {
        id: doc.id.clone(),
        content: matches!(include, Include::Full).then(|| doc.content.clone()),
        metadata: matches!(include, Include::Metadata | Include::Full)
            .then(|| doc.metadata.clone()),
    }
}
