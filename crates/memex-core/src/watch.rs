//! Polling change detector.
//!
//! The watch loop keeps one in-memory [`Watermark`] per source. Every tick
//! it probes each source in turn and resyncs those whose probe no longer
//! matches. The watermark only moves after a successful sync, so a failed
//! sync is retried on the next tick.
//!
//! ```text
//! Initialized ──▶ Polling ──▶ Stale ──▶ Syncing ──▶ Polling
//!                    │
//!                    └──(shutdown)──▶ Stopped
//! ```
//!
//! `tick` holds the loop mutably, so the intermediate `Stale` and `Syncing`
//! states are recorded per tick and read back with
//! [`WatchLoop::last_transitions`].
//!
//! Watermarks are seeded from the index at startup and never persisted.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::connector::Connector;
use crate::error::SyncError;
use crate::models::SourceKind;
use crate::reconcile::{sync_source, SyncReport};
use crate::store::{Include, Index};

/// Last observed staleness signal of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Number of records (notes).
    Count(usize),
    /// Highest source-assigned id, `None` for an empty source (mail).
    LastId(Option<u64>),
}

impl Watermark {
    /// The watermark of a source with nothing in it.
    pub fn empty(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Notes => Watermark::Count(0),
            SourceKind::Mails => Watermark::LastId(None),
        }
    }

    /// Derive a watermark from the ids already stored for a source.
    ///
    /// Mail ids that are not numeric are ignored.
    pub fn seed(kind: SourceKind, ids: &[String]) -> Self {
        match kind {
            SourceKind::Notes => Watermark::Count(ids.len()),
            SourceKind::Mails => {
                Watermark::LastId(ids.iter().filter_map(|id| id.parse::<u64>().ok()).max())
            }
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Count(n) => write!(f, "{} records", n),
            Watermark::LastId(Some(id)) => write!(f, "last id {}", id),
            Watermark::LastId(None) => f.write_str("no ids"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Initialized,
    Polling,
    Stale(SourceKind),
    Syncing(SourceKind),
    Stopped,
}

/// What happened to one source during a tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    UpToDate,
    Synced(SyncReport),
    SyncFailed(String),
    ProbeFailed(String),
}

struct WatchedSource {
    connector: Arc<dyn Connector>,
    watermark: Watermark,
}

/// Long-lived polling loop over a fixed set of connectors.
pub struct WatchLoop {
    index: Arc<dyn Index>,
    sources: Vec<WatchedSource>,
    interval: Duration,
    state: WatchState,
    transitions: Vec<WatchState>,
}

impl WatchLoop {
    /// Build the loop and seed every watermark from the index.
    ///
    /// A source without a collection starts from an empty watermark. Any
    /// other index error is returned.
    pub async fn new(
        index: Arc<dyn Index>,
        connectors: Vec<Arc<dyn Connector>>,
        interval: Duration,
    ) -> Result<Self> {
        let mut sources = Vec::with_capacity(connectors.len());
        for connector in connectors {
            let kind = connector.kind();
            let watermark = seed_watermark(index.as_ref(), kind).await?;
            tracing::info!("{}: starting from {}", connector.name(), watermark);
            sources.push(WatchedSource {
                connector,
                watermark,
            });
        }

        Ok(Self {
            index,
            sources,
            interval,
            state: WatchState::Initialized,
            transitions: Vec::new(),
        })
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// States entered during the most recent tick, in order.
    pub fn last_transitions(&self) -> &[WatchState] {
        &self.transitions
    }

    pub fn watermark(&self, kind: SourceKind) -> Option<Watermark> {
        self.sources
            .iter()
            .find(|s| s.connector.kind() == kind)
            .map(|s| s.watermark)
    }

    /// Probe every source once, in order, syncing the stale ones.
    ///
    /// One source failing never prevents the others from being checked.
    pub async fn tick(&mut self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::with_capacity(self.sources.len());
        self.transitions.clear();

        for source in &mut self.sources {
            let kind = source.connector.kind();

            let observed = match source.connector.probe().await {
                Ok(w) => w,
                Err(e) => {
                    let err = SyncError::LoopIteration {
                        kind,
                        message: format!("probe failed: {:#}", e),
                    };
                    tracing::warn!("{}", err);
                    outcomes.push(TickOutcome::ProbeFailed(err.to_string()));
                    continue;
                }
            };

            if observed == source.watermark {
                tracing::debug!("{}: up to date ({})", kind, observed);
                outcomes.push(TickOutcome::UpToDate);
                continue;
            }

            enter(&mut self.state, &mut self.transitions, WatchState::Stale(kind));
            tracing::info!(
                "{}: changed ({} -> {}), syncing",
                kind,
                source.watermark,
                observed
            );

            enter(&mut self.state, &mut self.transitions, WatchState::Syncing(kind));
            let result = sync_source(
                self.index.as_ref(),
                source.connector.as_ref(),
                kind.watch_flush(),
            )
            .await;

            let outcome = match result {
                Ok(report) if report.is_success() => {
                    source.watermark = observed;
                    TickOutcome::Synced(report)
                }
                Ok(report) => {
                    let message = report
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown index error".to_string());
                    failed_sync(kind, message)
                }
                Err(e) => failed_sync(kind, e.to_string()),
            };
            outcomes.push(outcome);
        }

        enter(&mut self.state, &mut self.transitions, WatchState::Polling);
        outcomes
    }

    /// Tick until `shutdown` resolves.
    ///
    /// Shutdown is only observed between ticks; an in-flight sync always
    /// completes.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.state = WatchState::Polling;
        tracing::info!(
            "watching {} sources every {:?}",
            self.sources.len(),
            self.interval
        );

        loop {
            self.tick().await;
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state = WatchState::Stopped;
        tracing::info!("watch loop stopped");
    }
}

fn enter(state: &mut WatchState, transitions: &mut Vec<WatchState>, next: WatchState) {
    tracing::trace!("{:?} -> {:?}", state, next);
    *state = next;
    transitions.push(next);
}

fn failed_sync(kind: SourceKind, message: String) -> TickOutcome {
    let err = SyncError::LoopIteration { kind, message };
    tracing::warn!("{}; will retry next tick", err);
    TickOutcome::SyncFailed(err.to_string())
}

async fn seed_watermark(index: &dyn Index, kind: SourceKind) -> Result<Watermark> {
    let name = kind.collection_name();
    match index.get_collection(name).await {
        Ok(_) => {}
        Err(e) if SyncError::is_collection_not_found(&e) => {
            tracing::info!("{}: no collection yet", name);
            return Ok(Watermark::empty(kind));
        }
        Err(e) => return Err(e),
    }

    let ids: Vec<String> = index
        .get(name, Include::Ids)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    Ok(Watermark::seed(kind, &ids))
}
