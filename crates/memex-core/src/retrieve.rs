//! Retrieval: top-k documents per source rendered as one context block.
//!
//! The block is plain text meant to be pasted into an LLM prompt:
//!
//! ```text
//! ========= Notes =========
//! ------- document number 0 -------
//! Metadata: {"created":"2024-01-01","folder":"Travel","title":"Trip"}
//! Content :
//!          Trip
//! Flight at 9am
//! ```
//!
//! Output is deterministic for a given index state and query.

use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::error::SyncError;
use crate::models::SourceKind;
use crate::store::{Index, QueryHit};

/// Query each source's collection and render the results.
///
/// A source without a collection renders as an empty section. Fewer than
/// `k` hits is normal for small collections.
pub async fn retrieve(
    index: &dyn Index,
    query: &str,
    sources: &[SourceKind],
    k: usize,
) -> Result<String> {
    let mut out = String::new();

    for kind in sources {
        let name = kind.collection_name();
        let hits = match index.query(name, query, k).await {
            Ok(hits) => hits,
            Err(e) if SyncError::is_collection_not_found(&e) => {
                tracing::info!("{}: no collection, skipping", name);
                Vec::new()
            }
            Err(e) => return Err(e).with_context(|| format!("Query on '{}' failed", name)),
        };
        tracing::debug!("{}: {} hits for {:?}", name, hits.len(), query);
        render_section(&mut out, *kind, &hits)?;
    }

    Ok(out)
}

/// Append one `========= Label =========` section to `out`.
pub fn render_section(out: &mut String, kind: SourceKind, hits: &[QueryHit]) -> Result<()> {
    writeln!(out, "========= {} =========", kind.label())?;
    for (i, hit) in hits.iter().enumerate() {
        let metadata = serde_json::to_string(&hit.metadata)?;
        write!(
            out,
            "------- document number {} -------\nMetadata: {}\nContent :\n         {}\n\n\n",
            i, metadata, hit.content
        )?;
    }
    Ok(())
}
