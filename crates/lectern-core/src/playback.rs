//! Playback coordination over a document's speech output.
//!
//! Reconciles the client's position and play state with generation progress.
//! Chunks arrive out of order; the coordinator never moves the position on
//! arrival. It only advances when the client reports that the current chunk
//! finished, and it reports a buffering hint when too few chunks ahead of the
//! position are ready.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::models::{now_millis, Document, PlaybackState, StageStatus};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("chunk index {index} is out of range (total {total})")]
    OutOfRange { index: i64, total: i64 },
    #[error("chunk index must be >= 0, got {0}")]
    Negative(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Advisory buffering thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// How many chunks ahead of (and including) the current one to inspect.
    pub window: usize,
    /// Fewer ready chunks than this inside the window means buffering.
    pub min_ready: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            window: 5,
            min_ready: 2,
        }
    }
}

/// Playback state plus the generation progress a client needs to drive it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub speech_status: StageStatus,
    pub total_chunks: Option<i64>,
    pub ready_chunks: Vec<i64>,
    pub failed_chunks: Vec<i64>,
    pub current_ready: bool,
    pub buffering: bool,
}

pub struct PlaybackCoordinator {
    store: Arc<dyn Store>,
    policy: BufferPolicy,
}

impl PlaybackCoordinator {
    pub fn new(store: Arc<dyn Store>, policy: BufferPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn get_state(&self, document_id: &str) -> Result<PlaybackState, PlaybackError> {
        self.document(document_id).await?;
        Ok(self.store.ensure_playback(document_id).await?)
    }

    /// Move the position. Rejects indices past the planned chunk count.
    pub async fn set_position(
        &self,
        document_id: &str,
        index: i64,
    ) -> Result<PlaybackState, PlaybackError> {
        if index < 0 {
            return Err(PlaybackError::Negative(index));
        }
        let doc = self.document(document_id).await?;
        if let Some(total) = self.total_chunks(&doc).await? {
            if index >= total {
                return Err(PlaybackError::OutOfRange { index, total });
            }
        }

        let mut state = self.store.ensure_playback(document_id).await?;
        state.current_chunk_index = index;
        state.updated_at = now_millis();
        self.store.put_playback(&state).await?;
        Ok(state)
    }

    pub async fn set_playing(
        &self,
        document_id: &str,
        playing: bool,
    ) -> Result<PlaybackState, PlaybackError> {
        self.document(document_id).await?;
        let mut state = self.store.ensure_playback(document_id).await?;
        state.is_playing = playing;
        state.updated_at = now_millis();
        self.store.put_playback(&state).await?;
        Ok(state)
    }

    /// The client finished playing chunk `index`.
    ///
    /// A report for anything other than the current index is stale and
    /// leaves the state untouched. Otherwise the position moves to the next
    /// chunk that has not permanently failed and playback continues; past the
    /// last chunk, playback stops.
    pub async fn chunk_finished(
        &self,
        document_id: &str,
        index: i64,
    ) -> Result<PlaybackState, PlaybackError> {
        let doc = self.document(document_id).await?;
        let mut state = self.store.ensure_playback(document_id).await?;
        if state.current_chunk_index != index {
            return Ok(state);
        }

        let total = self.total_chunks(&doc).await?;
        match next_playable(index, total, &doc.speech_failed_chunks) {
            Some(next) => state.current_chunk_index = next,
            None => state.is_playing = false,
        }
        state.updated_at = now_millis();
        self.store.put_playback(&state).await?;
        Ok(state)
    }

    /// A chunk finished generating. Returns whether it unblocks playback,
    /// which is only the case when it is the chunk at the current position.
    pub async fn chunk_ready(&self, document_id: &str, index: i64) -> Result<bool, PlaybackError> {
        self.document(document_id).await?;
        let state = self.store.ensure_playback(document_id).await?;
        Ok(state.current_chunk_index == index)
    }

    pub async fn snapshot(&self, document_id: &str) -> Result<PlaybackSnapshot, PlaybackError> {
        let doc = self.document(document_id).await?;
        let state = self.store.ensure_playback(document_id).await?;
        let total = self.total_chunks(&doc).await?;
        let ready: BTreeSet<i64> = self
            .store
            .list_speech_chunks(document_id)
            .await?
            .into_iter()
            .map(|c| c.index)
            .collect();

        let current_ready = ready.contains(&state.current_chunk_index);
        let buffering = doc.speech_status != StageStatus::Ready
            && is_buffering(
                state.current_chunk_index,
                total,
                &ready,
                &doc.speech_failed_chunks,
                self.policy,
            );

        Ok(PlaybackSnapshot {
            state,
            speech_status: doc.speech_status,
            total_chunks: total,
            ready_chunks: ready.into_iter().collect(),
            failed_chunks: doc.speech_failed_chunks,
            current_ready,
            buffering,
        })
    }

    async fn document(&self, document_id: &str) -> Result<Document, PlaybackError> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| PlaybackError::NotFound(document_id.to_string()))
    }

    /// Planned segment count, falling back to the persisted count once speech
    /// finished without a recorded plan.
    async fn total_chunks(&self, doc: &Document) -> Result<Option<i64>, PlaybackError> {
        if let Some(total) = doc.speech_chunk_total {
            return Ok(Some(total));
        }
        if doc.speech_status == StageStatus::Ready {
            return Ok(Some(self.store.count_speech_chunks(&doc.id).await?));
        }
        Ok(None)
    }
}

fn next_playable(current: i64, total: Option<i64>, failed: &[i64]) -> Option<i64> {
    let total = total?;
    (current + 1..total).find(|i| !failed.contains(i))
}

fn is_buffering(
    current: i64,
    total: Option<i64>,
    ready: &BTreeSet<i64>,
    failed: &[i64],
    policy: BufferPolicy,
) -> bool {
    let end = current + policy.window as i64;
    let end = total.map_or(end, |t| end.min(t));
    let playable: Vec<i64> = (current..end).filter(|i| !failed.contains(i)).collect();
    let required = match total {
        Some(_) => policy.min_ready.min(playable.len()),
        None => policy.min_ready,
    };
    let ready_in_window = playable.iter().filter(|i| ready.contains(i)).count();
    ready_in_window < required
}
