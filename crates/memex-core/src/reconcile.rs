//! Writing normalized batches into the index.
//!
//! Two write modes:
//!
//! - **flush**: swap the collection for one holding exactly the batch
//!   ([`Index::replace`]).
//! - **upsert**: write the batch over whatever is there ([`Index::add`]).
//!   Documents absent from the batch are kept.
//!
//! Either way a batch is one index call, so the index takes all of it or
//! none, and a failed write leaves the collection as it was.
//! Failures are reported, never retried here; the watch loop retries on its
//! next tick.

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::connector::Connector;
use crate::error::SyncError;
use crate::models::Document;
use crate::store::Index;

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub collection: String,
    /// Documents handed to the reconciler.
    pub submitted: usize,
    /// Documents committed to the index. Zero on failure.
    pub written: usize,
    /// Of `written`, ids that were not in the collection before.
    pub inserted: usize,
    /// Of `written`, ids that replaced an existing document.
    pub updated: usize,
    pub error: Option<SyncError>,
}

impl SyncReport {
    fn new(collection: &str, submitted: usize) -> Self {
        Self {
            collection: collection.to_string(),
            submitted,
            written: 0,
            inserted: 0,
            updated: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Write `documents` into `collection`.
pub async fn reconcile(
    index: &dyn Index,
    documents: &[Document],
    collection: &str,
    flush: bool,
) -> SyncReport {
    let mut report = SyncReport::new(collection, documents.len());

    match write_batch(index, documents, collection, flush).await {
        Ok((inserted, updated)) => {
            report.inserted = inserted;
            report.updated = updated;
            report.written = inserted + updated;
            tracing::info!(
                "{}: wrote {} documents ({} new, {} updated{})",
                collection,
                report.written,
                inserted,
                updated,
                if flush { ", flushed" } else { "" }
            );
        }
        Err(e) => {
            let err = SyncError::IndexWrite {
                collection: collection.to_string(),
                message: format!("{:#}", e),
            };
            tracing::error!("{}", err);
            report.error = Some(err);
        }
    }

    report
}

async fn write_batch(
    index: &dyn Index,
    documents: &[Document],
    collection: &str,
    flush: bool,
) -> Result<(usize, usize)> {
    let spec = index.embedding_spec();

    if flush {
        index
            .replace(collection, &spec, documents)
            .await
            .with_context(|| format!("Failed to rebuild collection '{}'", collection))?;
        return Ok((documents.len(), 0));
    }

    index
        .get_or_create_collection(collection, &spec)
        .await
        .with_context(|| format!("Failed to open collection '{}'", collection))?;

    if documents.is_empty() {
        return Ok((0, 0));
    }

    let existing: HashSet<String> = index.ids(collection).await?.into_iter().collect();
    let updated = documents
        .iter()
        .filter(|d| existing.contains(&d.id))
        .count();

    index.add(collection, documents).await?;

    Ok((documents.len() - updated, updated))
}

/// Scan a connector and reconcile its documents into the source's collection.
///
/// Extraction failure leaves the index untouched. Index failures come back
/// inside the report.
pub async fn sync_source(
    index: &dyn Index,
    connector: &dyn Connector,
    flush: bool,
) -> Result<SyncReport, SyncError> {
    let kind = connector.kind();
    let documents = connector
        .scan()
        .await
        .map_err(|e| SyncError::SourceExtraction {
            kind,
            message: format!("{:#}", e),
        })?;

    Ok(reconcile(index, &documents, kind.collection_name(), flush).await)
}
