//! # Chat Sieve
//!
//! Turns exported conversational-AI transcripts into a privacy-redacted,
//! semantically searchable index, so operators can find users by intent
//! ("asked about financial advice").
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐
//! │  Archive  │──▶│  Flatten  │──▶│  Redact  │──▶│  Commit   │
//! │ JSON array│   │ tree→units│   │   PII    │   │  batches  │
//! └───────────┘   └───────────┘   └──────────┘   └─────┬─────┘
//!                                                      ▼
//!                                  ┌──────────┐   ┌──────────┐
//!                                  │  search  │◀──│  Index   │
//!                                  │  users   │   │ (SQLite) │
//!                                  └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sieve init                         # create the index
//! sieve ingest ./data/chats.json     # extract, flatten, redact, commit
//! sieve search "mortgage advice" --threshold 0.8
//! sieve users "mortgage advice"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Archive records, flattened units, result rows |
//! | [`error`] | Typed errors per pipeline stage |
//! | [`extract`] | Streaming reader over the archive's top-level array |
//! | [`flatten`] | Conversation tree → context-bearing text units |
//! | [`redact`] | PII redaction capabilities |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait with in-memory and SQLite backends |
//! | [`ingest`] | Batch committer and pipeline driver |
//! | [`search`] | Threshold-filtered retrieval |
//! | [`progress`] | Ingestion progress on stderr |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod redact;
pub mod search;
pub mod stats;
