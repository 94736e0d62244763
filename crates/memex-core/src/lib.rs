//! # memex core
//!
//! Runtime-agnostic sync pipeline for memex: data models, stable identity,
//! normalization, the index abstraction, reconciliation, the polling watch
//! loop, and retrieval.
//!
//! ```text
//! Connector ──▶ normalize ──▶ reconcile ──▶ Index ◀── retrieve
//!     ▲                                       │
//!     └──────────── WatchLoop (probe) ────────┘
//! ```
//!
//! This crate performs no I/O of its own. Sources, persistent indexes and
//! embedding models are supplied by the `memex` app crate through the
//! [`connector::Connector`], [`store::Index`] and [`embedding::Embedder`]
//! traits.

pub mod connector;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod retrieve;
pub mod store;
pub mod watch;
