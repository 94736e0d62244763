//! End-to-end pipeline over the SQLite index, using the deterministic
//! bag-of-words embedder so ranking is reproducible.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use memex::db::connect_path;
use memex::migrate::migrate_pool;
use memex::sqlite_store::SqliteIndex;
use memex_core::embedding::{Embedder, HashEmbedder};
use memex_core::error::SyncError;
use memex_core::models::{Document, SourceKind};
use memex_core::normalize::normalize_notes;
use memex_core::reconcile::reconcile;
use memex_core::retrieve::retrieve;
use memex_core::store::{Include, Index};

async fn open_index(tmp: &TempDir, embedder: Arc<dyn Embedder>) -> SqliteIndex {
    let pool = connect_path(&tmp.path().join("data/memex.sqlite"))
        .await
        .unwrap();
    migrate_pool(&pool).await.unwrap();
    SqliteIndex::new(pool, embedder, 2)
}

async fn hash_index(tmp: &TempDir) -> SqliteIndex {
    open_index(tmp, Arc::new(HashEmbedder::new(64))).await
}

/// Same model and dims as `hash_index`, but every embed call fails.
struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        64
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

fn mail(id: &str, body: &str) -> Document {
    Document::new(id, body).with_meta("subject", format!("subject {}", id))
}

#[tokio::test]
async fn notes_blob_lands_in_collection_and_is_searchable() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;

    let blob = "Trip|||SEP|||<div>flight to <b>lisbon</b></div>|||SEP|||2024-01-01|||SEP|||m|||SEP|||Travel|||END|||\
                Groceries|||SEP|||milk eggs bread|||SEP|||2024-02-01|||SEP|||m|||SEP|||Home|||END|||\
                |||SEP|||no title|||SEP|||2024-03-01|||SEP|||m|||SEP|||Home|||END|||";
    let normalized = normalize_notes(blob, true);
    assert_eq!(normalized.documents.len(), 2);

    let report = reconcile(&index, &normalized.documents, "notes", true).await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.written, 2);

    let info = index.get_collection("notes").await.unwrap();
    assert_eq!(info.count, 2);
    assert_eq!(info.spec.model, "hash-bow");

    let hits = index.query("notes", "flight lisbon", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["title"], "Trip");
    assert_eq!(hits[0].content, "Trip\nflight to lisbon");
}

#[tokio::test]
async fn mail_upsert_twice_keeps_one_copy() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;
    let batch = vec![mail("101", "invoice attached"), mail("102", "lunch on friday")];

    let first = reconcile(&index, &batch, "mails", false).await;
    assert_eq!((first.inserted, first.updated), (2, 0));

    let second = reconcile(&index, &batch, "mails", false).await;
    assert_eq!((second.inserted, second.updated), (0, 2));

    let ids = index.ids("mails").await.unwrap();
    assert_eq!(ids, vec!["101".to_string(), "102".to_string()]);
}

#[tokio::test]
async fn upsert_overwrites_content_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;

    reconcile(&index, &[mail("7", "old body")], "mails", false).await;
    let changed = Document::new("7", "new body").with_meta("subject", "edited");
    reconcile(&index, &[changed], "mails", false).await;

    let docs = index.get("mails", Include::Full).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content.as_deref(), Some("new body"));
    assert_eq!(docs[0].metadata.as_ref().unwrap()["subject"], "edited");
}

#[tokio::test]
async fn flush_replaces_previous_contents() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;

    let old: Vec<Document> = ["a", "b", "c"]
        .iter()
        .map(|id| Document::new(*id, format!("old {}", id)))
        .collect();
    reconcile(&index, &old, "notes", false).await;

    let new = vec![Document::new("c", "kept"), Document::new("d", "added")];
    let report = reconcile(&index, &new, "notes", true).await;
    assert_eq!((report.inserted, report.updated), (2, 0));

    assert_eq!(
        index.ids("notes").await.unwrap(),
        vec!["c".to_string(), "d".to_string()]
    );
}

#[tokio::test]
async fn include_projections_omit_fields() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;
    reconcile(&index, &[mail("1", "hello")], "mails", false).await;

    let ids_only = index.get("mails", Include::Ids).await.unwrap();
    assert!(ids_only[0].content.is_none() && ids_only[0].metadata.is_none());

    let meta = index.get("mails", Include::Metadata).await.unwrap();
    assert!(meta[0].content.is_none());
    assert_eq!(meta[0].metadata.as_ref().unwrap()["subject"], "subject 1");
}

#[tokio::test]
async fn missing_collection_is_reported_as_not_found() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;

    let err = index.get_collection("mails").await.unwrap_err();
    assert!(SyncError::is_collection_not_found(&err));
    let err = index.query("mails", "anything", 3).await.unwrap_err();
    assert!(SyncError::is_collection_not_found(&err));

    // deleting an absent collection is fine
    index.delete_collection("mails").await.unwrap();
}

#[tokio::test]
async fn reopening_with_another_model_is_refused_until_flush() {
    let tmp = TempDir::new().unwrap();
    {
        let index = hash_index(&tmp).await;
        reconcile(&index, &[mail("1", "hello")], "mails", false).await;
        index.pool().close().await;
    }

    let index = open_index(&tmp, Arc::new(HashEmbedder::new(32))).await;
    let report = reconcile(&index, &[mail("2", "world")], "mails", false).await;
    assert!(!report.is_success());
    assert_eq!(report.written, 0);
    assert!(report.error.unwrap().to_string().contains("--flush"));

    let rebuilt = reconcile(&index, &[mail("2", "world")], "mails", true).await;
    assert!(rebuilt.is_success());
    assert_eq!(index.get_collection("mails").await.unwrap().spec.dims, 32);
}

#[tokio::test]
async fn retrieve_renders_both_sections() {
    let tmp = TempDir::new().unwrap();
    let index = hash_index(&tmp).await;
    reconcile(
        &index,
        &[Document::new("n1", "Trip\nflight to lisbon").with_meta("title", "Trip")],
        "notes",
        false,
    )
    .await;

    let out = retrieve(&index, "flight", &SourceKind::ALL, 3)
        .await
        .unwrap();
    let notes_at = out.find("========= Notes =========").unwrap();
    let mails_at = out.find("========= Mails =========").unwrap();
    assert!(notes_at < mails_at);
    assert!(out.contains("------- document number 0 -------"));
    assert!(out.contains("\"title\":\"Trip\""));
    assert!(!out[mails_at..].contains("document number"));
}

#[tokio::test]
async fn data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let index = hash_index(&tmp).await;
        reconcile(&index, &[mail("9", "persisted")], "mails", false).await;
        index.pool().close().await;
    }

    let index = hash_index(&tmp).await;
    assert_eq!(index.get_collection("mails").await.unwrap().count, 1);
}

#[tokio::test]
async fn failed_flush_keeps_the_previous_collection() {
    let tmp = TempDir::new().unwrap();
    {
        let index = hash_index(&tmp).await;
        let notes = vec![Document::new("a", "first"), Document::new("b", "second")];
        assert!(reconcile(&index, &notes, "notes", true).await.is_success());
        index.pool().close().await;
    }

    let broken = open_index(&tmp, Arc::new(BrokenEmbedder)).await;
    let report = reconcile(&broken, &[Document::new("c", "third")], "notes", true).await;
    assert!(!report.is_success());
    assert_eq!(report.written, 0);
    assert!(report
        .error
        .unwrap()
        .to_string()
        .contains("embedding service unavailable"));

    let docs = broken.get("notes", Include::Full).await.unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(docs[0].content.as_deref(), Some("first"));
    assert_eq!(broken.get_collection("notes").await.unwrap().count, 2);
}
