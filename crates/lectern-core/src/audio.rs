//! Storage for synthesized audio.
//!
//! Speech chunk rows only carry an opaque `audio_ref`; the bytes live behind
//! an [`AudioStore`]. The filesystem implementation is in the app crate.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Persist the audio for one chunk and return its reference.
    ///
    /// Saving the same `(document, index)` twice overwrites the bytes and
    /// returns the same reference.
    async fn save(&self, document_id: &str, index: i64, bytes: &[u8]) -> Result<String>;

    /// Load previously saved audio, or `None` if the reference is unknown.
    async fn load(&self, audio_ref: &str) -> Result<Option<Vec<u8>>>;
}

/// Reference format shared by the audio stores.
pub fn audio_ref(document_id: &str, index: i64) -> String {
    format!("{}/{:05}.wav", document_id, index)
}

#[derive(Default)]
pub struct MemoryAudioStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryAudioStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioStore for MemoryAudioStore {
    async fn save(&self, document_id: &str, index: i64, bytes: &[u8]) -> Result<String> {
        let key = audio_ref(document_id, index);
        self.blobs
            .write()
            .map_err(|_| anyhow!("audio store lock poisoned"))?
            .insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn load(&self, audio_ref: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .map_err(|_| anyhow!("audio store lock poisoned"))?
            .get(audio_ref)
            .cloned())
    }
}
