//! # memex
//!
//! A personal retrieval-augmented assistant over Apple Notes and IMAP mail.
//!
//! Connectors export notes and mails, [`memex_core`] normalizes them into
//! documents with stable ids and reconciles them into per-source collections
//! of a SQLite vector index. A watch loop keeps the index in step with the
//! sources; `search` and `ask` read from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Connectors  │──▶│  memex-core  │──▶│   SQLite   │
//! │ Notes/IMAP  │   │ normalize +  │   │ collections│
//! └─────────────┘   │  reconcile   │   └─────┬──────┘
//!        ▲          └──────────────┘         │
//!        │ probe                             ▼
//!  ┌───────────┐                       ┌──────────┐
//!  │ WatchLoop │                       │ retrieve │──▶ search / ask
//!  └───────────┘                       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! memex init                   # create database
//! memex sync all --flush       # full rebuild of both collections
//! memex watch                  # keep the index up to date
//! memex ask "when is my flight?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_notes`] | Apple Notes export via `osascript` |
//! | [`connector_mail`] | IMAP mailbox fetch |
//! | [`sqlite_store`] | SQLite-backed vector index |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | `sync` and `watch` commands |
//! | [`search`] | Retrieval over the collections |
//! | [`ask`] | Streaming RAG chat |
//! | [`llm`] | OpenAI-compatible chat client |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod config;
pub mod connector_mail;
pub mod connector_notes;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod search;
pub mod sources;
pub mod sqlite_store;
