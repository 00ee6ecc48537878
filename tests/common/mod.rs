//! Scripted fakes for the external services.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lectern::executor::{JobPool, PoolConfig};
use lectern::stages::{StageContext, StageSettings};
use lectern_core::audio::MemoryAudioStore;
use lectern_core::services::{
    ChatModel, ChatTurn, Extraction, Extractor, IndexReceipt, IndexRequest, Indexer, SearchEntry,
    SearchRequest, SearchResult, ServiceError, SynthesisRequest, Synthesizer,
};
use lectern_core::store::Store;

/// Returns the same text for every source.
pub struct StaticExtractor {
    pub text: String,
    pub calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    async fn extract(
        &self,
        _source_ref: &str,
        _content_type: Option<&str>,
    ) -> Result<Extraction, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Extraction {
            text: self.text.clone(),
            page_count: Some(1),
        })
    }
}

/// Keeps the last indexed request per isolation key and answers searches
/// with the first chunk that contains the query.
#[derive(Default)]
pub struct RecordingIndexer {
    pub indexed: Mutex<HashMap<String, IndexRequest>>,
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index(&self, request: &IndexRequest) -> Result<IndexReceipt, ServiceError> {
        self.indexed
            .lock()
            .unwrap()
            .insert(request.isolation_key.clone(), request.clone());
        Ok(IndexReceipt {
            status: "indexed".into(),
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError> {
        let indexed = self.indexed.lock().unwrap();
        let Some(doc) = indexed.get(&request.isolation_key) else {
            return Ok(SearchResult::default());
        };
        let needle = request.query.to_lowercase();
        let entries: Vec<SearchEntry> = doc
            .chunks
            .iter()
            .filter(|c| c.text.to_lowercase().contains(&needle))
            .take(request.limit)
            .map(|c| SearchEntry {
                chunk_index: Some(c.index as i64),
                score: 1.0,
                text: c.text.clone(),
            })
            .collect();
        Ok(SearchResult {
            matched_text: entries
                .iter()
                .map(|e| e.text.clone())
                .collect::<Vec<_>>()
                .join("\n\n---\n\n"),
            entries,
        })
    }
}

/// Synthesizer with per-text scripted failures and a concurrency gauge.
#[derive(Default)]
pub struct ScriptedSynthesizer {
    /// Fail the first `n` calls for a text. `u32::MAX` fails forever.
    pub failures: HashMap<String, u32>,
    pub delay: Option<Duration>,
    pub calls: Mutex<HashMap<String, u32>>,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub fn failing(failures: HashMap<String, u32>) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn calls_for(&self, text: &str) -> u32 {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ServiceError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(request.text.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if call <= self.failures.get(&request.text).copied().unwrap_or(0) {
            return Err(ServiceError::Status {
                status: 503,
                body: "model loading".into(),
            });
        }
        Ok(wav(16_000, 1_600))
    }
}

/// Echoes the last user turn.
pub struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ServiceError> {
        let last = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("You asked: {}", last.lines().last().unwrap_or_default()))
    }
}

/// Mono 16-bit silence.
pub fn wav(sample_rate: u32, samples: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn pool(max_parallelism: usize) -> JobPool {
    JobPool::new(PoolConfig {
        max_parallelism,
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        backoff_base: 2.0,
        attempt_timeout: Some(Duration::from_secs(10)),
    })
}

pub fn stage_context(
    store: Arc<dyn Store>,
    extractor: Arc<dyn Extractor>,
    indexer: Arc<dyn Indexer>,
    synthesizer: Arc<dyn Synthesizer>,
    pool: JobPool,
) -> StageContext {
    StageContext {
        store,
        extractor,
        indexer,
        synthesizer,
        audio: Arc::new(MemoryAudioStore::new()),
        pool,
        settings: StageSettings::default(),
    }
}

/// `count` sentences of about 40 characters each.
pub fn numbered_sentences(count: usize) -> String {
    (0..count)
        .map(|i| format!("This is sentence number {:02} of the text. ", i))
        .collect()
}
