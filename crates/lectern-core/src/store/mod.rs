//! Storage abstraction for Lectern.
//!
//! The [`Store`] trait holds every persisted record: documents, speech
//! chunks, playback state, chat history, and the vectors of the local index.
//!
//! Status fields are never written directly. Each stage goes through
//! [`Store::begin_stage`] (the idempotency guard) and then exactly one of its
//! completion operations or [`Store::fail_stage`]. Every operation touches
//! only the fields owned by the stage it names.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::IndexChunk;
use crate::models::{ChatMessage, Document, NewDocument, PlaybackState, SpeechChunk, Stage};

/// Result of trying to move a stage into `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageClaim {
    /// The stage moved to `processing` and its error was cleared.
    Started,
    /// The stage is already `processing`; the trigger is a no-op.
    AlreadyRunning,
    /// The stage is already `ready`; the trigger is a no-op.
    AlreadyReady,
    /// A downstream stage was triggered before extraction reached `ready`.
    NotReady,
    /// No such document.
    Missing,
}

impl StageClaim {
    pub fn is_started(&self) -> bool {
        matches!(self, StageClaim::Started)
    }
}

/// A scored hit from the local vector index.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_index: i64,
    pub score: f32,
    pub text: String,
}

/// Abstract storage backend.
///
/// # Stage operations
///
/// | Method | Owner |
/// |--------|-------|
/// | [`begin_stage`](Store::begin_stage) | any stage, for itself |
/// | [`complete_extraction`](Store::complete_extraction) | Extraction |
/// | [`complete_indexing`](Store::complete_indexing) | Indexing |
/// | [`plan_speech`](Store::plan_speech), [`complete_speech`](Store::complete_speech) | Speech |
/// | [`fail_stage`](Store::fail_stage) | any stage, for itself |
/// | [`reset_stage`](Store::reset_stage) | orchestrator recovery |
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a document in `uploading` with both downstream stages `pending`.
    async fn create_document(&self, doc: &NewDocument) -> Result<Document>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents, newest first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Atomically claim a stage. Only `Started` allows the caller to proceed.
    ///
    /// Indexing and Speech can only be claimed once extraction is `ready`.
    async fn begin_stage(&self, id: &str, stage: Stage) -> Result<StageClaim>;

    /// Store the extracted text and mark extraction `ready`.
    async fn complete_extraction(&self, id: &str, text: &str) -> Result<()>;

    /// Mark indexing `ready` and record how many chunks were indexed.
    async fn complete_indexing(&self, id: &str, chunk_count: i64) -> Result<()>;

    /// Record how many speech segments will be synthesized.
    async fn plan_speech(&self, id: &str, total: i64) -> Result<()>;

    /// Mark speech `ready`, recording any permanently failed segments.
    async fn complete_speech(&self, id: &str, failed_chunks: &[i64]) -> Result<()>;

    /// Mark a stage `error` with a plain-text message.
    async fn fail_stage(&self, id: &str, stage: Stage, message: &str) -> Result<()>;

    /// Return an orphaned `processing` stage to its waiting state
    /// (`uploading` for extraction, `pending` otherwise). Returns whether a
    /// reset happened.
    async fn reset_stage(&self, id: &str, stage: Stage) -> Result<bool>;

    /// Insert a speech chunk. Chunks are immutable: returns `false` if a
    /// chunk with the same `(document, index)` already exists.
    async fn insert_speech_chunk(&self, chunk: &SpeechChunk) -> Result<bool>;

    /// All speech chunks of a document ordered by index. May contain gaps
    /// while generation is running.
    async fn list_speech_chunks(&self, id: &str) -> Result<Vec<SpeechChunk>>;

    async fn get_speech_chunk(&self, id: &str, index: i64) -> Result<Option<SpeechChunk>>;

    async fn count_speech_chunks(&self, id: &str) -> Result<i64>;

    async fn get_playback(&self, id: &str) -> Result<Option<PlaybackState>>;

    /// Overwrite the playback state (last writer wins).
    async fn put_playback(&self, state: &PlaybackState) -> Result<()>;

    /// Create the playback state with defaults if it does not exist yet.
    async fn ensure_playback(&self, id: &str) -> Result<PlaybackState>;

    async fn append_chat_message(&self, message: &ChatMessage) -> Result<()>;

    /// Chat history ordered by creation time.
    async fn list_chat_messages(&self, id: &str) -> Result<Vec<ChatMessage>>;

    /// Replace every vector stored under an isolation key.
    async fn replace_index_vectors(
        &self,
        isolation_key: &str,
        chunks: &[IndexChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Vectors currently stored under an isolation key, keyed by the content
    /// hash of their chunk.
    async fn index_vectors_by_hash(&self, isolation_key: &str) -> Result<HashMap<String, Vec<f32>>>;

    /// Cosine-similarity search restricted to one isolation key.
    async fn search_index_vectors(
        &self,
        isolation_key: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>>;

    /// Chunk texts in `[from, to]` under an isolation key, ordered by index.
    async fn index_chunk_range(
        &self,
        isolation_key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, String)>>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
