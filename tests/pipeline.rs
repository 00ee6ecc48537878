//! End-to-end pipeline runs against scripted services.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lectern::executor::{JobOutcome, JobPool, PoolConfig};
use lectern::pipeline::Pipeline;
use lectern::sqlite_store::SqliteStore;
use lectern::{db, migrate};
use lectern_core::chunk::{chunk_for_speech, SpeechChunkParams};
use lectern_core::cleanup::clean_for_speech;
use lectern_core::models::{NewDocument, Stage, StageStatus};
use lectern_core::playback::{BufferPolicy, PlaybackCoordinator};
use lectern_core::store::memory::InMemoryStore;
use lectern_core::store::{StageClaim, Store};
use tempfile::TempDir;

use common::*;

/// One speech chunk per sentence.
const SENTENCE_CHUNKS: SpeechChunkParams = SpeechChunkParams {
    target: 30,
    min: 10,
    max: 60,
};

fn speech_texts(text: &str) -> Vec<String> {
    chunk_for_speech(&clean_for_speech(text), SENTENCE_CHUNKS)
        .into_iter()
        .map(|s| s.text)
        .collect()
}

fn upload(title: &str) -> NewDocument {
    NewDocument {
        title: title.to_string(),
        source_ref: format!("https://files.example/{}.pdf", title),
        content_type: Some("application/pdf".to_string()),
    }
}

fn build(
    store: Arc<dyn Store>,
    text: &str,
    synth: Arc<ScriptedSynthesizer>,
    pool: JobPool,
) -> Pipeline {
    let mut ctx = stage_context(
        store,
        Arc::new(StaticExtractor::new(text)),
        Arc::new(RecordingIndexer::default()),
        synth,
        pool,
    );
    ctx.settings.speech_chunks = SENTENCE_CHUNKS;
    Pipeline::new(ctx)
}

#[tokio::test]
async fn test_ten_jobs_with_one_flaky_chunk() {
    let text = numbered_sentences(10);
    let texts = speech_texts(&text);
    assert_eq!(texts.len(), 10);

    let mut failures = HashMap::new();
    failures.insert(texts[4].clone(), 2);
    let synth = Arc::new(ScriptedSynthesizer::failing(failures));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let pipeline = build(store.clone(), &text, synth.clone(), pool(10));

    let doc = pipeline.add_document(upload("flaky")).await.unwrap();
    pipeline.wait_idle().await;

    let doc = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(doc.speech_status, StageStatus::Ready);
    assert_eq!(doc.speech_chunk_total, Some(10));
    assert!(doc.speech_failed_chunks.is_empty());
    assert_eq!(store.count_speech_chunks(&doc.id).await.unwrap(), 10);
    assert_eq!(synth.calls_for(&texts[4]), 3);
    for (i, t) in texts.iter().enumerate() {
        if i != 4 {
            assert_eq!(synth.calls_for(t), 1, "chunk {} retried", i);
        }
    }
}

#[tokio::test]
async fn test_flaky_job_reports_once_after_third_attempt() {
    let pool = JobPool::new(PoolConfig {
        max_parallelism: 10,
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        backoff_base: 2.0,
        attempt_timeout: None,
    });
    let reports: Arc<Mutex<Vec<(usize, u32)>>> = Arc::new(Mutex::new(Vec::new()));

    for job in 0..10usize {
        let reports = reports.clone();
        pool.submit(
            format!("job-{}", job),
            move |attempt| async move {
                if job == 4 && attempt < 3 {
                    Err(format!("job {} attempt {} failed", job, attempt))
                } else {
                    Ok(job)
                }
            },
            move |outcome| {
                if let JobOutcome::Succeeded { value, attempts } = outcome {
                    reports.lock().unwrap().push((value, attempts));
                }
            },
        );
    }
    pool.wait_idle().await;

    let mut reports = reports.lock().unwrap().clone();
    reports.sort();
    assert_eq!(reports.len(), 10);
    for (job, attempts) in reports {
        assert_eq!(attempts, if job == 4 { 3 } else { 1 });
    }
}

#[tokio::test]
async fn test_partial_failure_keeps_the_rest() {
    let text = numbered_sentences(6);
    let texts = speech_texts(&text);
    let mut failures = HashMap::new();
    failures.insert(texts[0].clone(), u32::MAX);
    failures.insert(texts[3].clone(), u32::MAX);
    let synth = Arc::new(ScriptedSynthesizer::failing(failures));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let pipeline = build(store.clone(), &text, synth, pool(3));

    let doc = pipeline.add_document(upload("partial")).await.unwrap();
    pipeline.wait_idle().await;

    let doc = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(doc.speech_status, StageStatus::Ready);
    assert_eq!(doc.speech_failed_chunks, vec![0, 3]);
    let indices: Vec<i64> = store
        .list_speech_chunks(&doc.id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.index)
        .collect();
    assert_eq!(indices, vec![1, 2, 4, 5]);

    // Playback starting at 2 skips the failed chunk 3.
    let playback = PlaybackCoordinator::new(store.clone(), BufferPolicy::default());
    playback.set_position(&doc.id, 2).await.unwrap();
    playback.set_playing(&doc.id, true).await.unwrap();
    let state = playback.chunk_finished(&doc.id, 2).await.unwrap();
    assert_eq!(state.current_chunk_index, 4);
    assert!(state.is_playing);
}

#[tokio::test]
async fn test_every_chunk_failing_marks_speech_error() {
    let text = numbered_sentences(3);
    let failures = speech_texts(&text)
        .into_iter()
        .map(|t| (t, u32::MAX))
        .collect();
    let synth = Arc::new(ScriptedSynthesizer::failing(failures));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let pipeline = build(store.clone(), &text, synth.clone(), pool(2));

    let doc = pipeline.add_document(upload("silent")).await.unwrap();
    pipeline.wait_idle().await;

    let doc = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(doc.speech_status, StageStatus::Error);
    assert_eq!(doc.speech_error.as_deref(), Some("all chunks failed"));
    assert_eq!(doc.indexing_status, StageStatus::Ready);
    assert_eq!(synth.total_calls(), 9);
}

#[tokio::test]
async fn test_parallelism_cap_holds_across_documents() {
    let text = numbered_sentences(12);
    let synth = Arc::new(ScriptedSynthesizer {
        delay: Some(Duration::from_millis(15)),
        ..ScriptedSynthesizer::default()
    });
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let pipeline = build(store.clone(), &text, synth.clone(), pool(3));

    let a = pipeline.add_document(upload("a")).await.unwrap();
    let b = pipeline.add_document(upload("b")).await.unwrap();
    pipeline.wait_idle().await;

    assert!(synth.peak_concurrency() <= 3);
    for id in [&a.id, &b.id] {
        assert_eq!(store.count_speech_chunks(id).await.unwrap(), 12);
    }
}

#[tokio::test]
async fn test_retriggers_do_not_duplicate_work() {
    let text = numbered_sentences(4);
    let synth = Arc::new(ScriptedSynthesizer::default());
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let pipeline = build(store.clone(), &text, synth.clone(), pool(4));

    let doc = pipeline.add_document(upload("once")).await.unwrap();
    for _ in 0..5 {
        pipeline.on_upload_complete(&doc.id);
    }
    pipeline.wait_idle().await;
    assert_eq!(synth.total_calls(), 4);

    for stage in Stage::ALL {
        assert_eq!(
            pipeline.retry(&doc.id, stage).await.unwrap(),
            StageClaim::AlreadyReady
        );
    }
    pipeline.wait_idle().await;
    assert_eq!(synth.total_calls(), 4);
}

#[tokio::test]
async fn test_sqlite_backed_run_and_recovery() {
    let tmp = TempDir::new().unwrap();
    let pool_db = db::connect_path(&tmp.path().join("lectern.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool_db).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool_db));

    let text = numbered_sentences(5);
    let synth = Arc::new(ScriptedSynthesizer::default());
    let pipeline = build(store.clone(), &text, synth.clone(), pool(2));

    let done = pipeline.add_document(upload("done")).await.unwrap();
    pipeline.wait_idle().await;

    // A second document whose speech stage was cut off by a crash.
    let cut = store.create_document(&upload("cut")).await.unwrap();
    store.begin_stage(&cut.id, Stage::Extraction).await.unwrap();
    store.complete_extraction(&cut.id, &text).await.unwrap();
    store.begin_stage(&cut.id, Stage::Speech).await.unwrap();

    let report = pipeline.recover().await.unwrap();
    assert_eq!(report.reset, 1);
    assert_eq!(report.resubmitted, 2);
    pipeline.wait_idle().await;

    for id in [&done.id, &cut.id] {
        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.extraction_status, StageStatus::Ready);
        assert_eq!(doc.indexing_status, StageStatus::Ready);
        assert_eq!(doc.speech_status, StageStatus::Ready);
        assert_eq!(store.count_speech_chunks(id).await.unwrap(), 5);
        let chunks = store.list_speech_chunks(id).await.unwrap();
        assert!(chunks.iter().all(|c| c.duration_ms == Some(100)));
    }
    assert!(store.get_playback(&cut.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_callbacks_fire_once_per_job_under_contention() {
    let pool = JobPool::new(PoolConfig {
        max_parallelism: 2,
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        backoff_base: 1.0,
        attempt_timeout: None,
    });
    let fired = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    for job in 0..25u32 {
        let fired = fired.clone();
        let failed = failed.clone();
        pool.submit(
            format!("j{}", job),
            move |_attempt| async move {
                if job % 5 == 0 {
                    Err("permanent")
                } else {
                    Ok(())
                }
            },
            move |outcome| {
                fired.fetch_add(1, Ordering::SeqCst);
                if !outcome.is_success() {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
    }
    pool.wait_idle().await;

    assert_eq!(fired.load(Ordering::SeqCst), 25);
    assert_eq!(failed.load(Ordering::SeqCst), 5);
}
