//! # Lectern
//!
//! A document pipeline that turns an uploaded document into searchable text
//! and progressively streamable audio.
//!
//! Each document moves through three stages with their own status:
//! extraction, then indexing and speech concurrently. Speech synthesis fans
//! out one job per text segment on a bounded [`executor::JobPool`], so audio
//! chunks become playable out of order while generation is still running.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌────────────┐
//!   upload ─────────▶│ Extraction │
//!                    └─────┬──────┘
//!              ready       │
//!           ┌──────────────┴──────────────┐
//!           ▼                             ▼
//!   ┌──────────────┐              ┌──────────────┐      ┌──────────┐
//!   │   Indexing   │              │    Speech    │─────▶│ Job pool │
//!   └──────┬───────┘              └──────┬───────┘      └────┬─────┘
//!          │                             │                   │
//!          ▼                             ▼                   ▼
//!   search / ask                  playback coordinator   audio store
//! ```
//!
//! The pure parts (data model, chunkers, cleanup, store trait, service
//! contracts, playback coordinator) live in `lectern-core`. This crate adds
//! the runtime: SQLite persistence, HTTP clients, the job pool, stage
//! controllers, the orchestrator, the HTTP API and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store |
//! | [`http`] | Shared JSON-over-HTTP plumbing |
//! | [`extract`] | Extraction service client and local extractor |
//! | [`embedding`] | Remote index client and local vector index |
//! | [`synth`] | Speech synthesis client |
//! | [`audio`] | Filesystem audio store |
//! | [`chat`] | Document Q&A |
//! | [`executor`] | Bounded job pool with retry and backoff |
//! | [`stages`] | Extraction, indexing and speech controllers |
//! | [`pipeline`] | Stage orchestration and recovery |
//! | [`server`] | HTTP API |

pub mod audio;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod executor;
pub mod extract;
pub mod http;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
pub mod stages;
pub mod synth;
