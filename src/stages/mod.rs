//! Stage controllers.
//!
//! Extraction, Indexing and Speech share one shape: claim the stage through
//! [`Store::begin_stage`], do the work, then end in exactly one of the
//! stage's completion operations or [`Store::fail_stage`]. A claim that is
//! not `Started` (already processing, already ready, extraction not ready)
//! is a no-op and touches nothing.
//!
//! Each controller only writes its own status and error fields.

pub mod extraction;
pub mod indexing;
pub mod speech;

use std::sync::Arc;

use anyhow::Result;

use lectern_core::audio::AudioStore;
use lectern_core::chunk::{IndexChunkParams, SpeechChunkParams};
use lectern_core::models::{Document, Stage, StageStatus};
use lectern_core::services::{Extractor, Indexer, Synthesizer};
use lectern_core::store::{StageClaim, Store};

use crate::config::Config;
use crate::executor::JobPool;

/// Tunables the controllers read on every run.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub index_chunks: IndexChunkParams,
    pub speech_chunks: SpeechChunkParams,
    pub language: String,
    pub expressiveness: f32,
    pub pacing: f32,
}

impl StageSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            index_chunks: config.chunking.index.params(),
            speech_chunks: config.chunking.speech.params(),
            language: config.speech.language.clone(),
            expressiveness: config.speech.expressiveness,
            pacing: config.speech.pacing,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            index_chunks: IndexChunkParams::default(),
            speech_chunks: SpeechChunkParams::default(),
            language: "es".to_string(),
            expressiveness: 0.5,
            pacing: 0.5,
        }
    }
}

/// Everything a stage needs: the store, the external services and the job
/// pool that fans out speech synthesis.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn Store>,
    pub extractor: Arc<dyn Extractor>,
    pub indexer: Arc<dyn Indexer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub audio: Arc<dyn AudioStore>,
    pub pool: JobPool,
    pub settings: StageSettings,
}

/// How a stage run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRun {
    /// The trigger was ignored by the idempotency guard.
    Skipped(StageClaim),
    /// The stage reached `ready`.
    Ready,
    /// The stage reached `error` with this message.
    Failed(String),
}

/// Run one stage for a document.
pub async fn run_stage(ctx: &StageContext, document_id: &str, stage: Stage) -> Result<StageRun> {
    match stage {
        Stage::Extraction => extraction::run(ctx, document_id).await,
        Stage::Indexing => indexing::run(ctx, document_id).await,
        Stage::Speech => speech::run(ctx, document_id).await,
    }
}

/// What [`Store::begin_stage`] would answer for this document right now.
///
/// Used to reject manual retries early. The claim itself stays atomic in the
/// store, so a stale answer here can never start a stage twice.
pub fn preview_claim(doc: &Document, stage: Stage) -> StageClaim {
    match doc.status(stage) {
        StageStatus::Processing => StageClaim::AlreadyRunning,
        StageStatus::Ready => StageClaim::AlreadyReady,
        _ if stage != Stage::Extraction && doc.extraction_status != StageStatus::Ready => {
            StageClaim::NotReady
        }
        _ => StageClaim::Started,
    }
}

enum Claimed {
    Run(Document),
    Skip(StageClaim),
}

/// Claim `stage` and load the document.
async fn claim(ctx: &StageContext, document_id: &str, stage: Stage) -> Result<Claimed> {
    let claim = ctx.store.begin_stage(document_id, stage).await?;
    if !claim.is_started() {
        tracing::debug!(doc_id = %document_id, stage = %stage, ?claim, "trigger ignored");
        return Ok(Claimed::Skip(claim));
    }
    match ctx.store.get_document(document_id).await? {
        Some(doc) => {
            tracing::info!(doc_id = %document_id, stage = %stage, "stage started");
            Ok(Claimed::Run(doc))
        }
        None => Ok(Claimed::Skip(StageClaim::Missing)),
    }
}

/// Record the stage outcome. Failures always end in `fail_stage`.
async fn finish(
    ctx: &StageContext,
    document_id: &str,
    stage: Stage,
    outcome: std::result::Result<(), String>,
) -> Result<StageRun> {
    match outcome {
        Ok(()) => {
            tracing::info!(doc_id = %document_id, stage = %stage, "stage ready");
            Ok(StageRun::Ready)
        }
        Err(message) => {
            tracing::warn!(doc_id = %document_id, stage = %stage, error = %message, "stage failed");
            ctx.store.fail_stage(document_id, stage, &message).await?;
            Ok(StageRun::Failed(message))
        }
    }
}
