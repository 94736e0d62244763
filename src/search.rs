use anyhow::{bail, Result};

use memex_core::models::SourceKind;
use memex_core::retrieve::retrieve;

use crate::config::Config;
use crate::sources::parse_targets;
use crate::sqlite_store::SqliteIndex;

/// Resolve the `--source` filter; no filter means every source.
pub fn search_targets(source: Option<&str>) -> Result<Vec<SourceKind>> {
    match source {
        Some(s) => parse_targets(s),
        None => Ok(SourceKind::ALL.to_vec()),
    }
}

/// Retrieve the rendered context block for `query`.
pub async fn build_context(
    config: &Config,
    index: &SqliteIndex,
    query: &str,
    k: Option<usize>,
    source: Option<&str>,
) -> Result<String> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    let kinds = search_targets(source)?;
    let k = k.unwrap_or(config.retrieval.n_results);
    if k == 0 {
        bail!("--k must be >= 1");
    }
    retrieve(index, query, &kinds, k).await
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    source: Option<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = SqliteIndex::open(config).await?;
    let context = build_context(config, &index, query, k, source.as_deref()).await;
    index.pool().close().await;

    print!("{}", context?);
    Ok(())
}
