//! In-memory [`Store`] implementation for tests and offline runs.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock`. Every stage claim
//! happens under a single write lock, which gives the same atomicity as the
//! conditional `UPDATE` of the SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::chunk::IndexChunk;
use crate::models::{
    now_millis, ChatMessage, Document, NewDocument, PlaybackState, SpeechChunk, Stage, StageStatus,
};

use super::{cosine_similarity, IndexHit, StageClaim, Store};

struct StoredDoc {
    seq: u64,
    doc: Document,
}

struct StoredVector {
    chunk_index: i64,
    text: String,
    hash: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Tables {
    next_seq: u64,
    docs: HashMap<String, StoredDoc>,
    speech_chunks: HashMap<String, BTreeMap<i64, SpeechChunk>>,
    playback: HashMap<String, PlaybackState>,
    messages: Vec<ChatMessage>,
    vectors: HashMap<String, Vec<StoredVector>>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn doc_mut<'a>(tables: &'a mut Tables, id: &str) -> Result<&'a mut Document> {
    match tables.docs.get_mut(id) {
        Some(stored) => Ok(&mut stored.doc),
        None => bail!("document not found: {}", id),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_document(&self, new: &NewDocument) -> Result<Document> {
        let doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title.clone(),
            source_ref: new.source_ref.clone(),
            content_type: new.content_type.clone(),
            extraction_status: StageStatus::Uploading,
            extracted_text: None,
            extraction_error: None,
            indexing_status: StageStatus::Pending,
            indexing_error: None,
            chunk_count: None,
            speech_status: StageStatus::Pending,
            speech_error: None,
            speech_chunk_total: None,
            speech_failed_chunks: Vec::new(),
            created_at: now_millis(),
        };

        let mut tables = self.write()?;
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.docs.insert(
            doc.id.clone(),
            StoredDoc {
                seq,
                doc: doc.clone(),
            },
        );
        Ok(doc)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.docs.get(id).map(|s| s.doc.clone()))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let tables = self.read()?;
        let mut stored: Vec<&StoredDoc> = tables.docs.values().collect();
        stored.sort_by(|a, b| {
            b.doc
                .created_at
                .cmp(&a.doc.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(stored.into_iter().map(|s| s.doc.clone()).collect())
    }

    async fn begin_stage(&self, id: &str, stage: Stage) -> Result<StageClaim> {
        let mut tables = self.write()?;
        let doc = match tables.docs.get_mut(id) {
            Some(stored) => &mut stored.doc,
            None => return Ok(StageClaim::Missing),
        };

        match doc.status(stage) {
            StageStatus::Processing => return Ok(StageClaim::AlreadyRunning),
            StageStatus::Ready => return Ok(StageClaim::AlreadyReady),
            _ => {}
        }
        if stage != Stage::Extraction && doc.extraction_status != StageStatus::Ready {
            return Ok(StageClaim::NotReady);
        }

        match stage {
            Stage::Extraction => {
                doc.extraction_status = StageStatus::Processing;
                doc.extraction_error = None;
            }
            Stage::Indexing => {
                doc.indexing_status = StageStatus::Processing;
                doc.indexing_error = None;
            }
            Stage::Speech => {
                doc.speech_status = StageStatus::Processing;
                doc.speech_error = None;
            }
        }
        Ok(StageClaim::Started)
    }

    async fn complete_extraction(&self, id: &str, text: &str) -> Result<()> {
        let mut tables = self.write()?;
        let doc = doc_mut(&mut tables, id)?;
        doc.extracted_text = Some(text.to_string());
        doc.extraction_status = StageStatus::Ready;
        doc.extraction_error = None;
        Ok(())
    }

    async fn complete_indexing(&self, id: &str, chunk_count: i64) -> Result<()> {
        let mut tables = self.write()?;
        let doc = doc_mut(&mut tables, id)?;
        doc.chunk_count = Some(chunk_count);
        doc.indexing_status = StageStatus::Ready;
        doc.indexing_error = None;
        Ok(())
    }

    async fn plan_speech(&self, id: &str, total: i64) -> Result<()> {
        let mut tables = self.write()?;
        doc_mut(&mut tables, id)?.speech_chunk_total = Some(total);
        Ok(())
    }

    async fn complete_speech(&self, id: &str, failed_chunks: &[i64]) -> Result<()> {
        let mut tables = self.write()?;
        let doc = doc_mut(&mut tables, id)?;
        doc.speech_failed_chunks = failed_chunks.to_vec();
        doc.speech_status = StageStatus::Ready;
        doc.speech_error = None;
        Ok(())
    }

    async fn fail_stage(&self, id: &str, stage: Stage, message: &str) -> Result<()> {
        let mut tables = self.write()?;
        let doc = doc_mut(&mut tables, id)?;
        let message = Some(message.to_string());
        match stage {
            Stage::Extraction => {
                doc.extraction_status = StageStatus::Error;
                doc.extraction_error = message;
            }
            Stage::Indexing => {
                doc.indexing_status = StageStatus::Error;
                doc.indexing_error = message;
            }
            Stage::Speech => {
                doc.speech_status = StageStatus::Error;
                doc.speech_error = message;
            }
        }
        Ok(())
    }

    async fn reset_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let mut tables = self.write()?;
        let doc = doc_mut(&mut tables, id)?;
        if doc.status(stage) != StageStatus::Processing {
            return Ok(false);
        }
        match stage {
            Stage::Extraction => doc.extraction_status = StageStatus::Uploading,
            Stage::Indexing => doc.indexing_status = StageStatus::Pending,
            Stage::Speech => doc.speech_status = StageStatus::Pending,
        }
        Ok(true)
    }

    async fn insert_speech_chunk(&self, chunk: &SpeechChunk) -> Result<bool> {
        let mut tables = self.write()?;
        let chunks = tables
            .speech_chunks
            .entry(chunk.document_id.clone())
            .or_default();
        if chunks.contains_key(&chunk.index) {
            return Ok(false);
        }
        chunks.insert(chunk.index, chunk.clone());
        Ok(true)
    }

    async fn list_speech_chunks(&self, id: &str) -> Result<Vec<SpeechChunk>> {
        Ok(self
            .read()?
            .speech_chunks
            .get(id)
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_speech_chunk(&self, id: &str, index: i64) -> Result<Option<SpeechChunk>> {
        Ok(self
            .read()?
            .speech_chunks
            .get(id)
            .and_then(|chunks| chunks.get(&index).cloned()))
    }

    async fn count_speech_chunks(&self, id: &str) -> Result<i64> {
        Ok(self
            .read()?
            .speech_chunks
            .get(id)
            .map(|chunks| chunks.len() as i64)
            .unwrap_or(0))
    }

    async fn get_playback(&self, id: &str) -> Result<Option<PlaybackState>> {
        Ok(self.read()?.playback.get(id).cloned())
    }

    async fn put_playback(&self, state: &PlaybackState) -> Result<()> {
        self.write()?
            .playback
            .insert(state.document_id.clone(), state.clone());
        Ok(())
    }

    async fn ensure_playback(&self, id: &str) -> Result<PlaybackState> {
        let mut tables = self.write()?;
        Ok(tables
            .playback
            .entry(id.to_string())
            .or_insert_with(|| PlaybackState::initial(id))
            .clone())
    }

    async fn append_chat_message(&self, message: &ChatMessage) -> Result<()> {
        self.write()?.messages.push(message.clone());
        Ok(())
    }

    async fn list_chat_messages(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let tables = self.read()?;
        let mut messages: Vec<ChatMessage> = tables
            .messages
            .iter()
            .filter(|m| m.document_id == id)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn replace_index_vectors(
        &self,
        isolation_key: &str,
        chunks: &[IndexChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let stored = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| StoredVector {
                chunk_index: chunk.index as i64,
                text: chunk.text.clone(),
                hash: chunk.hash.clone(),
                vector: vector.clone(),
            })
            .collect();
        self.write()?
            .vectors
            .insert(isolation_key.to_string(), stored);
        Ok(())
    }

    async fn index_vectors_by_hash(&self, isolation_key: &str) -> Result<HashMap<String, Vec<f32>>> {
        let tables = self.read()?;
        Ok(tables
            .vectors
            .get(isolation_key)
            .map(|stored| {
                stored
                    .iter()
                    .map(|sv| (sv.hash.clone(), sv.vector.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search_index_vectors(
        &self,
        isolation_key: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let tables = self.read()?;
        let Some(stored) = tables.vectors.get(isolation_key) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<IndexHit> = stored
            .iter()
            .map(|sv| IndexHit {
                chunk_index: sv.chunk_index,
                score: cosine_similarity(query_vec, &sv.vector),
                text: sv.text.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn index_chunk_range(
        &self,
        isolation_key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, String)>> {
        let tables = self.read()?;
        let mut range: Vec<(i64, String)> = tables
            .vectors
            .get(isolation_key)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|sv| sv.chunk_index >= from && sv.chunk_index <= to)
                    .map(|sv| (sv.chunk_index, sv.text.clone()))
                    .collect()
            })
            .unwrap_or_default();
        range.sort_by_key(|(index, _)| *index);
        Ok(range)
    }
}
