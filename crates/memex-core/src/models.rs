//! Core data models shared by the sync pipeline and the retrieval path.
//!
//! Raw records only live between a connector call and normalization.
//! [`Document`] is the unit written to, and read back from, an index.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Display-only fields attached to a document. Never embedded.
///
/// A `BTreeMap` keeps rendering order stable across runs.
pub type Metadata = BTreeMap<String, String>;

/// The personal data sources memex knows how to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Notes,
    Mails,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Notes, SourceKind::Mails];

    /// Name of the index collection holding this source's documents.
    pub fn collection_name(&self) -> &'static str {
        match self {
            SourceKind::Notes => "notes",
            SourceKind::Mails => "mails",
        }
    }

    /// Section label used in retrieval output.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Notes => "Notes",
            SourceKind::Mails => "Mails",
        }
    }

    /// Whether the watch loop rebuilds the collection on drift.
    ///
    /// Notes are rebuilt from scratch; mail is append-only.
    pub fn watch_flush(&self) -> bool {
        matches!(self, SourceKind::Notes)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_name())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "notes" | "note" => Ok(SourceKind::Notes),
            "mails" | "mail" => Ok(SourceKind::Mails),
            other => bail!("Unknown source: '{}'. Available: notes, mails", other),
        }
    }
}

/// A raw MIME message as fetched from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Source-assigned identifier (IMAP UID), used verbatim as document id.
    pub id: String,
    /// Full RFC 822 message bytes.
    pub bytes: Vec<u8>,
}

/// The raw output of one connector call, before normalization.
#[derive(Debug, Clone)]
pub enum RawBatch {
    /// The delimited export blob produced by the notes application.
    Notes(String),
    /// Raw messages, oldest first.
    Mails(Vec<RawMessage>),
}

impl RawBatch {
    pub fn kind(&self) -> SourceKind {
        match self {
            RawBatch::Notes(_) => SourceKind::Notes,
            RawBatch::Mails(_) => SourceKind::Mails,
        }
    }
}

/// Canonical document stored in an index collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity, unique within a collection.
    pub id: String,
    /// Embeddable text body.
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
