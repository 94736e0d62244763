//! `sync` and `watch` commands.
//!
//! Both drive the same pipeline: connector → normalizer → reconciler →
//! SQLite index. `sync` runs it once per requested source; `watch` hands
//! the connectors to a [`WatchLoop`] and polls until Ctrl-C.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use memex_core::models::SourceKind;
use memex_core::reconcile::{sync_source, SyncReport};
use memex_core::store::Index;
use memex_core::watch::WatchLoop;

use crate::config::Config;
use crate::sources::{configured_connectors, connector_for, parse_targets};
use crate::sqlite_store::SqliteIndex;

pub async fn run_sync(config: &Config, target: &str, flush: bool) -> Result<()> {
    let kinds = parse_targets(target)?;
    let explicit = kinds.len() == 1;
    let index = SqliteIndex::open(config).await?;

    let mut failures = 0usize;
    let mut ran = 0usize;
    for kind in kinds {
        let Some(connector) = connector_for(config, kind) else {
            if explicit {
                bail!(
                    "Source '{}' is not configured. Add [connectors.{}] to the config.",
                    kind,
                    config_section(kind)
                );
            }
            tracing::info!("{}: not configured, skipping", kind);
            continue;
        };
        ran += 1;

        match sync_source(&index, connector.as_ref(), flush).await {
            Ok(report) => {
                print_report(kind, &report, flush);
                if !report.is_success() {
                    failures += 1;
                }
            }
            Err(e) => {
                println!("sync {}", kind);
                println!("  error: {}", e);
                failures += 1;
            }
        }
    }

    index.pool().close().await;

    if ran == 0 {
        bail!("No sources configured. Add [connectors.notes] or [connectors.mail] to the config.");
    }
    if failures > 0 {
        bail!("{} of {} sources failed to sync", failures, ran);
    }
    Ok(())
}

fn config_section(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Notes => "notes",
        SourceKind::Mails => "mail",
    }
}

fn print_report(source: SourceKind, report: &SyncReport, flush: bool) {
    println!("sync {}", source);
    println!("  collection: {}", report.collection);
    println!("  documents: {}", report.submitted);
    println!(
        "  written: {} ({} new, {} updated)",
        report.written, report.inserted, report.updated
    );
    if flush {
        println!("  mode: flush");
    }
    match &report.error {
        Some(e) => println!("  error: {}", e),
        None => println!("ok"),
    }
}

pub async fn run_watch(config: &Config) -> Result<()> {
    let connectors = configured_connectors(config);
    if connectors.is_empty() {
        bail!("No sources configured. Add [connectors.notes] or [connectors.mail] to the config.");
    }

    let index = Arc::new(SqliteIndex::open(config).await?);
    let interval = Duration::from_secs(config.watch.interval_secs);
    let mut watch = WatchLoop::new(index.clone() as Arc<dyn Index>, connectors, interval).await?;

    println!(
        "Watching for changes every {}s. Press Ctrl-C to stop.",
        config.watch.interval_secs
    );
    watch.run(shutdown_signal()).await;

    index.pool().close().await;
    println!("Stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
