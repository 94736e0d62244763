//! End-to-end scenarios across normalize, reconcile, and the watch loop,
//! run against the in-memory index.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use memex_core::connector::Connector;
use memex_core::embedding::HashEmbedder;
use memex_core::identity::note_id;
use memex_core::models::{Document, RawBatch, RawMessage, SourceKind};
use memex_core::normalize::{normalize, NOTE_FIELD_DELIMITER, NOTE_RECORD_DELIMITER};
use memex_core::reconcile::reconcile;
use memex_core::store::memory::InMemoryIndex;
use memex_core::store::{Include, Index};
use memex_core::watch::{TickOutcome, WatchLoop, Watermark};

fn raw_note(title: &str, body: &str, created: &str) -> String {
    [title, body, created, "2024-06-01", "Notes"].join(NOTE_FIELD_DELIMITER) + NOTE_RECORD_DELIMITER
}

fn new_index() -> Arc<InMemoryIndex> {
    Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::new(32))))
}

async fn id_set(index: &dyn Index, collection: &str) -> BTreeSet<String> {
    index.ids(collection).await.unwrap().into_iter().collect()
}

/// Notes source backed by a blob the test can rewrite.
struct NotesFixture {
    blob: Mutex<String>,
    count: Mutex<usize>,
}

impl NotesFixture {
    fn new(notes: &[String]) -> Arc<Self> {
        let fixture = Arc::new(Self {
            blob: Mutex::new(String::new()),
            count: Mutex::new(0),
        });
        fixture.set(notes);
        fixture
    }

    fn set(&self, notes: &[String]) {
        *self.blob.lock().unwrap() = notes.concat();
        *self.count.lock().unwrap() = notes.len();
    }
}

#[async_trait]
impl Connector for NotesFixture {
    fn name(&self) -> &str {
        "notes-fixture"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Notes
    }

    async fn probe(&self) -> Result<Watermark> {
        Ok(Watermark::Count(*self.count.lock().unwrap()))
    }

    async fn fetch(&self) -> Result<RawBatch> {
        Ok(RawBatch::Notes(self.blob.lock().unwrap().clone()))
    }
}

/// Mail source whose probe always fails.
struct UnreachableMail;

#[async_trait]
impl Connector for UnreachableMail {
    fn name(&self) -> &str {
        "unreachable-mail"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mails
    }

    async fn probe(&self) -> Result<Watermark> {
        bail!("connection refused")
    }

    async fn fetch(&self) -> Result<RawBatch> {
        bail!("connection refused")
    }
}

#[tokio::test]
async fn three_notes_with_duplicate_and_untitled_yield_two_documents() {
    let index = new_index();
    let spec = index.embedding_spec();
    index.get_or_create_collection("notes", &spec).await.unwrap();

    let blob = [
        raw_note("Trip", "Flight at 9am", "2024-01-01"),
        raw_note("Trip", "Hotel booked", "2024-01-01"),
        raw_note("", "no title here", "2024-01-02"),
    ]
    .concat();
    let normalized = normalize(&RawBatch::Notes(blob), true);
    let report = reconcile(index.as_ref(), &normalized.documents, "notes", true).await;

    assert!(report.is_success());
    let docs = index.get("notes", Include::Full).await.unwrap();
    assert_eq!(docs.len(), 2);
    let trip = docs
        .iter()
        .find(|d| d.id == note_id("Trip", "2024-01-01"))
        .expect("trip note stored");
    assert_eq!(trip.content.as_deref(), Some("Trip\nFlight at 9am"));
}

#[tokio::test]
async fn mail_upsert_is_idempotent() {
    let index = new_index();
    let messages: Vec<RawMessage> = (1..=3)
        .map(|uid| RawMessage {
            id: uid.to_string(),
            bytes: format!("From: a@b.c\r\nSubject: s{uid}\r\n\r\nhello {uid}\r\n").into_bytes(),
        })
        .collect();
    let docs = normalize(&RawBatch::Mails(messages), true).documents;

    reconcile(index.as_ref(), &docs, "mails", false).await;
    let once = index.get("mails", Include::Full).await.unwrap();
    let second = reconcile(index.as_ref(), &docs, "mails", false).await;
    let twice = index.get("mails", Include::Full).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(second.updated, 3);
    assert_eq!(second.inserted, 0);
}

#[tokio::test]
async fn flush_leaves_exactly_the_input_set() {
    let index = new_index();
    let stale: Vec<Document> = ["x", "y", "z"]
        .iter()
        .map(|id| Document::new(*id, "stale"))
        .collect();
    reconcile(index.as_ref(), &stale, "notes", false).await;

    let fresh = vec![Document::new("y", "fresh"), Document::new("w", "new")];
    reconcile(index.as_ref(), &fresh, "notes", true).await;

    let stored = index.get("notes", Include::Full).await.unwrap();
    let got: BTreeSet<(String, String)> = stored
        .into_iter()
        .map(|d| (d.id, d.content.unwrap_or_default()))
        .collect();
    let want: BTreeSet<(String, String)> = fresh
        .into_iter()
        .map(|d| (d.id, d.content))
        .collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn failed_sync_keeps_watermark_and_retries_next_tick() {
    let index = new_index();
    let notes = NotesFixture::new(&[raw_note("A", "a", "1"), raw_note("B", "b", "2")]);
    let mut watch = WatchLoop::new(
        index.clone(),
        vec![notes.clone() as Arc<dyn Connector>],
        Duration::from_secs(10),
    )
    .await
    .unwrap();
    assert_eq!(watch.watermark(SourceKind::Notes), Some(Watermark::Count(0)));

    index.set_fail_writes(true);
    let outcomes = watch.tick().await;
    assert!(matches!(outcomes[0], TickOutcome::SyncFailed(_)));
    assert_eq!(watch.watermark(SourceKind::Notes), Some(Watermark::Count(0)));

    index.set_fail_writes(false);
    let outcomes = watch.tick().await;
    assert!(matches!(&outcomes[0], TickOutcome::Synced(r) if r.written == 2));
    assert_eq!(watch.watermark(SourceKind::Notes), Some(Watermark::Count(2)));

    let outcomes = watch.tick().await;
    assert!(matches!(outcomes[0], TickOutcome::UpToDate));
}

#[tokio::test]
async fn mail_probe_failure_does_not_block_notes() {
    let index = new_index();
    let notes = NotesFixture::new(&[raw_note("A", "a", "1")]);
    let mut watch = WatchLoop::new(
        index.clone(),
        vec![
            Arc::new(UnreachableMail) as Arc<dyn Connector>,
            notes.clone() as Arc<dyn Connector>,
        ],
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    let outcomes = watch.tick().await;
    assert!(matches!(outcomes[0], TickOutcome::ProbeFailed(_)));
    assert!(matches!(outcomes[1], TickOutcome::Synced(_)));
    assert_eq!(watch.watermark(SourceKind::Notes), Some(Watermark::Count(1)));
    assert_eq!(
        watch.watermark(SourceKind::Mails),
        Some(Watermark::LastId(None))
    );
    assert_eq!(id_set(index.as_ref(), "notes").await.len(), 1);
}

#[tokio::test]
async fn notes_drift_triggers_full_rebuild() {
    let index = new_index();
    let notes = NotesFixture::new(&[raw_note("A", "a", "1"), raw_note("B", "b", "2")]);
    let mut watch = WatchLoop::new(
        index.clone(),
        vec![notes.clone() as Arc<dyn Connector>],
        Duration::from_secs(10),
    )
    .await
    .unwrap();
    watch.tick().await;

    // B deleted at the source, C added
    notes.set(&[raw_note("A", "a", "1"), raw_note("C", "c", "3"), raw_note("D", "d", "4")]);
    watch.tick().await;

    let want: BTreeSet<String> = [note_id("A", "1"), note_id("C", "3"), note_id("D", "4")]
        .into_iter()
        .collect();
    assert_eq!(id_set(index.as_ref(), "notes").await, want);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_notes_searchable() {
    let index = new_index();
    let notes = NotesFixture::new(&[raw_note("A", "a", "1"), raw_note("B", "b", "2")]);
    let mut watch = WatchLoop::new(
        index.clone(),
        vec![notes.clone() as Arc<dyn Connector>],
        Duration::from_secs(10),
    )
    .await
    .unwrap();
    watch.tick().await;
    let before = id_set(index.as_ref(), "notes").await;
    assert_eq!(before.len(), 2);

    notes.set(&[raw_note("C", "c", "3")]);
    index.set_fail_writes(true);
    let outcomes = watch.tick().await;
    assert!(matches!(outcomes[0], TickOutcome::SyncFailed(_)));
    assert_eq!(id_set(index.as_ref(), "notes").await, before);
    assert_eq!(watch.watermark(SourceKind::Notes), Some(Watermark::Count(2)));

    index.set_fail_writes(false);
    watch.tick().await;
    let after: BTreeSet<String> = [note_id("C", "3")].into_iter().collect();
    assert_eq!(id_set(index.as_ref(), "notes").await, after);
}
