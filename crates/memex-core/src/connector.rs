//! Source adapter trait.
//!
//! A connector wraps one external source. It answers two questions: a cheap
//! "has anything changed?" ([`probe`](Connector::probe)) and an expensive
//! "give me everything" ([`fetch`](Connector::fetch)). Normalization is shared,
//! so [`scan`](Connector::scan) has a default implementation.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, RawBatch, SourceKind};
use crate::normalize::normalize;
use crate::watch::Watermark;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable name for logs and `memex sources`.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Whether records with an empty primary field (note title) are dropped.
    fn ignore_empty_primary(&self) -> bool {
        true
    }

    /// Observe the source's current staleness signal.
    async fn probe(&self) -> Result<Watermark>;

    /// Retrieve the raw records.
    async fn fetch(&self) -> Result<RawBatch>;

    /// Fetch and normalize. Rejected records are logged at warn and left out.
    async fn scan(&self) -> Result<Vec<Document>> {
        let raw = self.fetch().await?;
        let normalized = normalize(&raw, self.ignore_empty_primary());
        for err in &normalized.rejected {
            tracing::warn!("{}: {}", self.name(), err);
        }
        tracing::debug!(
            "{}: {} documents, {} rejected",
            self.name(),
            normalized.documents.len(),
            normalized.rejected.len()
        );
        Ok(normalized.documents)
    }
}
