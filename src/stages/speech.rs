//! Speech: cleaned text → one synthesized audio chunk per segment.
//!
//! Segments of the cleaned text go to the [`JobPool`](crate::executor::JobPool)
//! as independent jobs. Each successful job writes one immutable
//! [`SpeechChunk`]; outcomes come back over a channel in completion order.
//! Once every job has reported, the stage is `ready` if at least one chunk
//! succeeded (the failed indices are recorded) and `error` otherwise.
//!
//! If chunks already exist for the document the stage completes without
//! submitting any work.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use lectern_core::audio::AudioStore;
use lectern_core::chunk::{chunk_for_speech, SpeechSegment};
use lectern_core::cleanup::clean_for_speech;
use lectern_core::models::{now_millis, Document, SpeechChunk, Stage};
use lectern_core::playback::{BufferPolicy, PlaybackCoordinator};
use lectern_core::services::{ServiceError, SynthesisRequest, Synthesizer};
use lectern_core::store::Store;

use super::{claim, finish, Claimed, StageContext, StageRun};
use crate::audio::wav_duration_ms;
use crate::executor::JobOutcome;

pub const ALL_CHUNKS_FAILED: &str = "all chunks failed";

pub async fn run(ctx: &StageContext, document_id: &str) -> Result<StageRun> {
    let doc = match claim(ctx, document_id, Stage::Speech).await? {
        Claimed::Run(doc) => doc,
        Claimed::Skip(claim) => return Ok(StageRun::Skipped(claim)),
    };
    ctx.store.ensure_playback(document_id).await?;

    let existing = ctx.store.list_speech_chunks(document_id).await?;
    if !existing.is_empty() {
        let failed = missing_indices(&doc, &existing);
        tracing::info!(
            doc_id = %document_id,
            chunks = existing.len(),
            "speech chunks already exist, skipping synthesis"
        );
        ctx.store.complete_speech(document_id, &failed).await?;
        return finish(ctx, document_id, Stage::Speech, Ok(())).await;
    }

    let cleaned = clean_for_speech(doc.extracted_text.as_deref().unwrap_or_default());
    let segments = chunk_for_speech(&cleaned, ctx.settings.speech_chunks);
    if segments.is_empty() {
        return finish(
            ctx,
            document_id,
            Stage::Speech,
            Err("no speakable text after cleanup".to_string()),
        )
        .await;
    }

    let total = segments.len();
    ctx.store.plan_speech(document_id, total as i64).await?;
    tracing::info!(doc_id = %document_id, chunks = total, "submitting speech jobs");

    let (tx, mut rx) = mpsc::unbounded_channel::<(i64, JobOutcome<()>)>();
    for segment in segments {
        let index = segment.index as i64;
        let job = SynthesisJob {
            document_id: document_id.to_string(),
            segment,
            request: SynthesisRequest {
                text: String::new(),
                language: ctx.settings.language.clone(),
                expressiveness: ctx.settings.expressiveness,
                pacing: ctx.settings.pacing,
            },
            store: ctx.store.clone(),
            synthesizer: ctx.synthesizer.clone(),
            audio: ctx.audio.clone(),
        };
        let job = Arc::new(job);
        let tx = tx.clone();
        ctx.pool.submit(
            format!("{}#{}", document_id, index),
            move |attempt| {
                let job = job.clone();
                async move { job.run(attempt).await }
            },
            move |outcome| {
                let _ = tx.send((index, outcome));
            },
        );
    }
    drop(tx);

    // Every job reports exactly once; a job whose task died drops its sender
    // without reporting and counts as failed.
    let playback = PlaybackCoordinator::new(ctx.store.clone(), BufferPolicy::default());
    let mut succeeded = BTreeSet::new();
    while let Some((index, outcome)) = rx.recv().await {
        match outcome {
            JobOutcome::Succeeded { .. } => {
                succeeded.insert(index);
                if matches!(playback.chunk_ready(document_id, index).await, Ok(true)) {
                    tracing::info!(doc_id = %document_id, chunk = index, "current chunk ready");
                }
            }
            JobOutcome::Failed { error, attempts } => {
                tracing::warn!(doc_id = %document_id, chunk = index, attempts, %error, "speech chunk failed");
            }
        }
    }

    let failed: Vec<i64> = (0..total as i64)
        .filter(|i| !succeeded.contains(i))
        .collect();
    if succeeded.is_empty() {
        return finish(
            ctx,
            document_id,
            Stage::Speech,
            Err(ALL_CHUNKS_FAILED.to_string()),
        )
        .await;
    }

    tracing::info!(
        doc_id = %document_id,
        ready = succeeded.len(),
        failed = failed.len(),
        "speech generation finished"
    );
    ctx.store.complete_speech(document_id, &failed).await?;
    finish(ctx, document_id, Stage::Speech, Ok(())).await
}

/// Planned indices with no persisted chunk, or the recorded failures when
/// the plan is unknown.
fn missing_indices(doc: &Document, existing: &[SpeechChunk]) -> Vec<i64> {
    match doc.speech_chunk_total {
        Some(total) => {
            let present: BTreeSet<i64> = existing.iter().map(|c| c.index).collect();
            (0..total).filter(|i| !present.contains(i)).collect()
        }
        None => doc.speech_failed_chunks.clone(),
    }
}

/// Synthesize and persist one segment. Safe to repeat: the chunk row is
/// keyed by `(document, index)` and a second insert is ignored.
struct SynthesisJob {
    document_id: String,
    segment: SpeechSegment,
    request: SynthesisRequest,
    store: Arc<dyn Store>,
    synthesizer: Arc<dyn Synthesizer>,
    audio: Arc<dyn AudioStore>,
}

impl SynthesisJob {
    async fn run(&self, attempt: u32) -> std::result::Result<(), ServiceError> {
        let index = self.segment.index as i64;
        tracing::debug!(doc_id = %self.document_id, chunk = index, attempt, "synthesizing");

        let request = SynthesisRequest {
            text: self.segment.text.clone(),
            ..self.request.clone()
        };
        let bytes = self.synthesizer.synthesize(&request).await?;

        let audio_ref = self
            .audio
            .save(&self.document_id, index, &bytes)
            .await
            .map_err(|e| ServiceError::Local(format!("saving audio: {:#}", e)))?;

        let chunk = SpeechChunk {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: self.document_id.clone(),
            index,
            text: self.segment.text.clone(),
            start_offset: self.segment.start_offset as i64,
            end_offset: self.segment.end_offset as i64,
            audio_ref: Some(audio_ref),
            duration_ms: wav_duration_ms(&bytes),
            created_at: now_millis(),
        };
        let inserted = self
            .store
            .insert_speech_chunk(&chunk)
            .await
            .map_err(|e| ServiceError::Local(format!("saving chunk: {:#}", e)))?;
        if !inserted {
            tracing::debug!(doc_id = %self.document_id, chunk = index, "chunk already stored");
        }
        Ok(())
    }
}
