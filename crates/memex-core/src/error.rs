//! Error taxonomy for the sync pipeline.

use thiserror::Error;

use crate::models::SourceKind;

/// Failures the pipeline distinguishes between.
///
/// Plumbing code returns `anyhow::Result`; these variants are attached
/// where a caller needs to branch on what went wrong.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// A connector could not retrieve raw data. The index is untouched.
    #[error("extraction from {kind} failed: {message}")]
    SourceExtraction { kind: SourceKind, message: String },

    /// One raw record could not be normalized and was skipped.
    #[error("{kind} record #{index} skipped: {reason}")]
    RecordParse {
        kind: SourceKind,
        index: usize,
        reason: String,
    },

    /// The index rejected a whole batch. Nothing from it was committed.
    #[error("write to collection '{collection}' failed: {message}")]
    IndexWrite { collection: String, message: String },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A probe or sync failed inside one watch-loop tick.
    #[error("watch iteration for {kind} failed: {message}")]
    LoopIteration { kind: SourceKind, message: String },
}

impl SyncError {
    /// True when `err` (or anything it wraps) is a missing collection.
    pub fn is_collection_not_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::CollectionNotFound(_))
        )
    }
}
