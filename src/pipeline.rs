//! Pipeline orchestration.
//!
//! Sequences the stage controllers: Extraction first, then Indexing and
//! Speech concurrently once extraction is `ready`. Every stage runs as its
//! own spawned task, so triggering never blocks the caller and one
//! document's stages never wait on another's.
//!
//! The orchestrator keeps no state of its own. Everything it decides is read
//! back from the [`Store`], which makes [`Pipeline::recover`] safe to call on
//! every start.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::task::TaskTracker;

use lectern_core::audio::AudioStore;
use lectern_core::models::{Document, NewDocument, Stage, StageStatus};
use lectern_core::services::{Extractor, Indexer, Synthesizer};
use lectern_core::store::{StageClaim, Store};

use crate::audio::FsAudioStore;
use crate::config::Config;
use crate::embedding::create_indexer;
use crate::executor::JobPool;
use crate::extract::create_extractor;
use crate::stages::{self, StageContext, StageRun, StageSettings};
use crate::synth::HttpSynthesizer;

/// Cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<StageContext>,
    tasks: TaskTracker,
}

/// What [`Pipeline::recover`] re-submitted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stages found in `processing` and returned to their waiting state.
    pub reset: usize,
    /// Stage runs submitted.
    pub resubmitted: usize,
}

impl Pipeline {
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            tasks: TaskTracker::new(),
        }
    }

    /// Wire the pipeline from configuration: HTTP (or local) services, the
    /// filesystem audio store and a job pool sized from `[executor]`.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let extractor: Arc<dyn Extractor> = create_extractor(&config.extraction)?;
        let indexer: Arc<dyn Indexer> = create_indexer(&config.indexing, store.clone())?;
        let speech_url = config
            .speech
            .url
            .as_deref()
            .context("speech.url must be set")?;
        let synthesizer: Arc<dyn Synthesizer> =
            Arc::new(HttpSynthesizer::new(speech_url, config.speech.timeout_secs)?);
        let audio: Arc<dyn AudioStore> = Arc::new(FsAudioStore::new(&config.storage.audio_dir));

        Ok(Self::new(StageContext {
            store,
            extractor,
            indexer,
            synthesizer,
            audio,
            pool: JobPool::new(config.executor.pool_config()),
            settings: StageSettings::from_config(config),
        }))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    pub fn audio(&self) -> &Arc<dyn AudioStore> {
        &self.ctx.audio
    }

    pub fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.ctx.indexer
    }

    /// Register an uploaded document and start processing it.
    pub async fn add_document(&self, new: NewDocument) -> Result<Document> {
        let doc = self.ctx.store.create_document(&new).await?;
        tracing::info!(doc_id = %doc.id, title = %doc.title, "document added");
        self.on_upload_complete(&doc.id);
        Ok(doc)
    }

    /// Entry point once a document's bytes are in place. Returns immediately.
    pub fn on_upload_complete(&self, document_id: &str) {
        self.submit(document_id.to_string(), Stage::Extraction);
    }

    /// Manually re-trigger a stage.
    ///
    /// Only a stage in `pending`, `uploading` or `error` is submitted; the
    /// returned claim says why anything else was refused. The stage task
    /// still claims atomically, so racing retries cannot run it twice.
    pub async fn retry(&self, document_id: &str, stage: Stage) -> Result<StageClaim> {
        let doc = match self.ctx.store.get_document(document_id).await? {
            Some(doc) => doc,
            None => return Ok(StageClaim::Missing),
        };
        let claim = stages::preview_claim(&doc, stage);
        if claim.is_started() {
            tracing::info!(doc_id = %document_id, stage = %stage, "manual retry");
            self.submit(document_id.to_string(), stage);
        }
        Ok(claim)
    }

    /// Resume after a restart.
    ///
    /// Stages left `processing` by a dead process go back to their waiting
    /// state and are submitted again. Documents whose extraction is `ready`
    /// get any `pending` downstream stage submitted. Documents still
    /// `uploading` without having been reset are left alone.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for doc in self.ctx.store.list_documents().await? {
            let mut reset_extraction = false;
            for stage in Stage::ALL {
                if doc.status(stage) == StageStatus::Processing
                    && self.ctx.store.reset_stage(&doc.id, stage).await?
                {
                    tracing::info!(doc_id = %doc.id, stage = %stage, "reset orphaned stage");
                    report.reset += 1;
                    reset_extraction |= stage == Stage::Extraction;
                }
            }

            if reset_extraction {
                self.submit(doc.id.clone(), Stage::Extraction);
                report.resubmitted += 1;
                continue;
            }

            let Some(doc) = self.ctx.store.get_document(&doc.id).await? else {
                continue;
            };
            if doc.extraction_status != StageStatus::Ready {
                continue;
            }
            for stage in [Stage::Indexing, Stage::Speech] {
                if doc.status(stage) == StageStatus::Pending {
                    self.submit(doc.id.clone(), stage);
                    report.resubmitted += 1;
                }
            }
        }

        if report.resubmitted > 0 {
            tracing::info!(reset = report.reset, resubmitted = report.resubmitted, "recovered pipeline");
        }
        Ok(report)
    }

    /// Wait until every submitted stage, and whatever it triggered, is done.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Spawn a stage run. Extraction reaching `ready` fans out to Indexing
    /// and Speech, neither waiting on the other.
    fn submit(&self, document_id: String, stage: Stage) {
        let pipeline = self.clone();
        self.tasks.spawn(async move {
            match stages::run_stage(&pipeline.ctx, &document_id, stage).await {
                Ok(StageRun::Ready) if stage == Stage::Extraction => {
                    pipeline.submit(document_id.clone(), Stage::Indexing);
                    pipeline.submit(document_id, Stage::Speech);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(doc_id = %document_id, stage = %stage, error = %format!("{:#}", e), "stage aborted");
                    // Leave an error instead of a stuck `processing`.
                    if let Err(e) = pipeline.abort_stage(&document_id, stage, &e).await {
                        tracing::error!(doc_id = %document_id, stage = %stage, error = %e, "could not record stage failure");
                    }
                }
            }
        });
    }

    async fn abort_stage(&self, document_id: &str, stage: Stage, cause: &anyhow::Error) -> Result<()> {
        let claimed = self
            .ctx
            .store
            .get_document(document_id)
            .await?
            .is_some_and(|doc| doc.status(stage) == StageStatus::Processing);
        if claimed {
            let message = format!("internal error: {:#}", cause);
            self.ctx.store.fail_stage(document_id, stage, &message).await?;
        }
        Ok(())
    }
}
