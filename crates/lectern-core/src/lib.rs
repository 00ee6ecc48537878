//! # Lectern Core
//!
//! Shared, runtime-agnostic logic for Lectern: the document data model, the
//! two text segmenters, speech-text cleanup, the store abstraction, the
//! contracts for the external AI services, and playback coordination.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything that
//! talks to the network or schedules tasks lives in the `lectern` app crate.

pub mod audio;
pub mod chunk;
pub mod cleanup;
pub mod models;
pub mod playback;
pub mod services;
pub mod store;
