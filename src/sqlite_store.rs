//! SQLite-backed [`Store`] implementation.
//!
//! Stage claims are a single conditional `UPDATE`, so two racing triggers for
//! the same `(document, stage)` can never both observe `Started`. Speech
//! chunk inserts use `ON CONFLICT DO NOTHING`: rows are immutable and
//! duplicate deliveries are dropped.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use lectern_core::chunk::IndexChunk;
use lectern_core::models::{
    now_millis, ChatMessage, Document, NewDocument, PlaybackState, SpeechChunk, Stage, StageStatus,
};
use lectern_core::store::{
    blob_to_vec, cosine_similarity, vec_to_blob, IndexHit, StageClaim, Store,
};

const DOCUMENT_COLUMNS: &str = "id, title, source_ref, source_content_type, \
    extraction_status, extracted_text, extraction_error, \
    indexing_status, indexing_error, chunk_count, \
    speech_status, speech_error, speech_chunk_total, speech_failed_chunks, created_at";

const SPEECH_CHUNK_COLUMNS: &str =
    "id, document_id, chunk_index, text, start_offset, end_offset, audio_ref, duration_ms, created_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Status and error column names owned by a stage.
fn stage_columns(stage: Stage) -> (&'static str, &'static str) {
    match stage {
        Stage::Extraction => ("extraction_status", "extraction_error"),
        Stage::Indexing => ("indexing_status", "indexing_error"),
        Stage::Speech => ("speech_status", "speech_error"),
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let extraction_status: String = row.try_get("extraction_status")?;
    let indexing_status: String = row.try_get("indexing_status")?;
    let speech_status: String = row.try_get("speech_status")?;
    let failed_json: String = row.try_get("speech_failed_chunks")?;
    let speech_failed_chunks: Vec<i64> = serde_json::from_str(&failed_json)
        .with_context(|| format!("Corrupt speech_failed_chunks: {}", failed_json))?;

    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        source_ref: row.try_get("source_ref")?,
        content_type: row.try_get("source_content_type")?,
        extraction_status: extraction_status.parse()?,
        extracted_text: row.try_get("extracted_text")?,
        extraction_error: row.try_get("extraction_error")?,
        indexing_status: indexing_status.parse()?,
        indexing_error: row.try_get("indexing_error")?,
        chunk_count: row.try_get("chunk_count")?,
        speech_status: speech_status.parse()?,
        speech_error: row.try_get("speech_error")?,
        speech_chunk_total: row.try_get("speech_chunk_total")?,
        speech_failed_chunks,
        created_at: row.try_get("created_at")?,
    })
}

fn speech_chunk_from_row(row: &SqliteRow) -> Result<SpeechChunk> {
    Ok(SpeechChunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        index: row.try_get("chunk_index")?,
        text: row.try_get("text")?,
        start_offset: row.try_get("start_offset")?,
        end_offset: row.try_get("end_offset")?,
        audio_ref: row.try_get("audio_ref")?,
        duration_ms: row.try_get("duration_ms")?,
        created_at: row.try_get("created_at")?,
    })
}

fn playback_from_row(row: &SqliteRow) -> Result<PlaybackState> {
    let is_playing: i64 = row.try_get("is_playing")?;
    Ok(PlaybackState {
        document_id: row.try_get("document_id")?,
        current_chunk_index: row.try_get("current_chunk_index")?,
        is_playing: is_playing != 0,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_document(&self, new: &NewDocument) -> Result<Document> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, source_ref, source_content_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.source_ref)
        .bind(&new.content_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_document(&id)
            .await?
            .with_context(|| format!("Document {} vanished after insert", id))
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn begin_stage(&self, id: &str, stage: Stage) -> Result<StageClaim> {
        let (status_col, error_col) = stage_columns(stage);
        let gate = if stage == Stage::Extraction {
            ""
        } else {
            " AND extraction_status = 'ready'"
        };

        let result = sqlx::query(&format!(
            "UPDATE documents SET {status} = 'processing', {error} = NULL \
             WHERE id = ? AND {status} NOT IN ('processing', 'ready'){gate}",
            status = status_col,
            error = error_col,
            gate = gate,
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(StageClaim::Started);
        }

        // Lost the claim: report why.
        let Some(doc) = self.get_document(id).await? else {
            return Ok(StageClaim::Missing);
        };
        Ok(match doc.status(stage) {
            StageStatus::Processing => StageClaim::AlreadyRunning,
            StageStatus::Ready => StageClaim::AlreadyReady,
            _ => StageClaim::NotReady,
        })
    }

    async fn complete_extraction(&self, id: &str, text: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET extracted_text = ?, extraction_status = 'ready', extraction_error = NULL WHERE id = ?",
        )
        .bind(text)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_indexing(&self, id: &str, chunk_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET chunk_count = ?, indexing_status = 'ready', indexing_error = NULL WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn plan_speech(&self, id: &str, total: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET speech_chunk_total = ? WHERE id = ?")
            .bind(total)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_speech(&self, id: &str, failed_chunks: &[i64]) -> Result<()> {
        let failed = serde_json::to_string(failed_chunks)?;
        sqlx::query(
            "UPDATE documents SET speech_failed_chunks = ?, speech_status = 'ready', speech_error = NULL WHERE id = ?",
        )
        .bind(failed)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_stage(&self, id: &str, stage: Stage, message: &str) -> Result<()> {
        let (status_col, error_col) = stage_columns(stage);
        sqlx::query(&format!(
            "UPDATE documents SET {} = 'error', {} = ? WHERE id = ?",
            status_col, error_col
        ))
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let (status_col, _) = stage_columns(stage);
        let waiting = match stage {
            Stage::Extraction => StageStatus::Uploading,
            Stage::Indexing | Stage::Speech => StageStatus::Pending,
        };
        let result = sqlx::query(&format!(
            "UPDATE documents SET {col} = ? WHERE id = ? AND {col} = 'processing'",
            col = status_col
        ))
        .bind(waiting.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_speech_chunk(&self, chunk: &SpeechChunk) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO speech_chunks (id, document_id, chunk_index, text, start_offset,
                                       end_offset, audio_ref, duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, chunk_index) DO NOTHING
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.index)
        .bind(&chunk.text)
        .bind(chunk.start_offset)
        .bind(chunk.end_offset)
        .bind(&chunk.audio_ref)
        .bind(chunk.duration_ms)
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_speech_chunks(&self, id: &str) -> Result<Vec<SpeechChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM speech_chunks WHERE document_id = ? ORDER BY chunk_index ASC",
            SPEECH_CHUNK_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(speech_chunk_from_row).collect()
    }

    async fn get_speech_chunk(&self, id: &str, index: i64) -> Result<Option<SpeechChunk>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM speech_chunks WHERE document_id = ? AND chunk_index = ?",
            SPEECH_CHUNK_COLUMNS
        ))
        .bind(id)
        .bind(index)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(speech_chunk_from_row).transpose()
    }

    async fn count_speech_chunks(&self, id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM speech_chunks WHERE document_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_playback(&self, id: &str) -> Result<Option<PlaybackState>> {
        let row = sqlx::query(
            "SELECT document_id, current_chunk_index, is_playing, updated_at FROM playback_state WHERE document_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(playback_from_row).transpose()
    }

    async fn put_playback(&self, state: &PlaybackState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO playback_state (document_id, current_chunk_index, is_playing, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                current_chunk_index = excluded.current_chunk_index,
                is_playing = excluded.is_playing,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.document_id)
        .bind(state.current_chunk_index)
        .bind(state.is_playing as i64)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_playback(&self, id: &str) -> Result<PlaybackState> {
        sqlx::query(
            r#"
            INSERT INTO playback_state (document_id, current_chunk_index, is_playing, updated_at)
            VALUES (?, 0, 0, ?)
            ON CONFLICT(document_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.get_playback(id)
            .await?
            .with_context(|| format!("Playback state for {} missing after insert", id))
    }

    async fn append_chat_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, document_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.document_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_chat_messages(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, document_id, role, content, created_at FROM chat_messages WHERE document_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ChatMessage> {
                let role: String = row.try_get("role")?;
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    role: role.parse()?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn replace_index_vectors(
        &self,
        isolation_key: &str,
        chunks: &[IndexChunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_chunks WHERE isolation_key = ?")
            .bind(isolation_key)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO index_chunks (isolation_key, chunk_index, text, hash, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(isolation_key)
            .bind(chunk.index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn index_vectors_by_hash(&self, isolation_key: &str) -> Result<HashMap<String, Vec<f32>>> {
        let rows = sqlx::query("SELECT hash, embedding FROM index_chunks WHERE isolation_key = ?")
            .bind(isolation_key)
            .fetch_all(&self.pool)
            .await?;

        let mut vectors = HashMap::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            vectors.insert(row.try_get::<String, _>("hash")?, blob_to_vec(&blob));
        }
        Ok(vectors)
    }

    async fn search_index_vectors(
        &self,
        isolation_key: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            "SELECT chunk_index, text, embedding FROM index_chunks WHERE isolation_key = ?",
        )
        .bind(isolation_key)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(IndexHit {
                chunk_index: row.try_get("chunk_index")?,
                score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                text: row.try_get("text")?,
            });
        }

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
        let rows = sqlx::query(
            r#"
            SELECT chunk_index, text FROM index_chunks
            WHERE isolation_key = ? AND chunk_index BETWEEN ? AND ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(isolation_key)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(i64, String)> {
                Ok((row.try_get("chunk_index")?, row.try_get("text")?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::run_migrations;
    use lectern_core::models::ChatRole;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("lectern.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn new_doc(title: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            source_ref: format!("/tmp/{}.pdf", title),
            content_type: Some("application/pdf".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_document() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("report")).await.unwrap();
        assert_eq!(doc.extraction_status, StageStatus::Uploading);
        assert_eq!(doc.indexing_status, StageStatus::Pending);
        assert!(doc.speech_failed_chunks.is_empty());

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_tmp, store) = setup().await;
        run_migrations(&store.pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_stage_claims() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("a")).await.unwrap();

        assert_eq!(
            store.begin_stage(&doc.id, Stage::Speech).await.unwrap(),
            StageClaim::NotReady
        );
        assert_eq!(
            store.begin_stage(&doc.id, Stage::Extraction).await.unwrap(),
            StageClaim::Started
        );
        assert_eq!(
            store.begin_stage(&doc.id, Stage::Extraction).await.unwrap(),
            StageClaim::AlreadyRunning
        );
        store.complete_extraction(&doc.id, "Hello.").await.unwrap();
        assert_eq!(
            store.begin_stage(&doc.id, Stage::Extraction).await.unwrap(),
            StageClaim::AlreadyReady
        );
        assert_eq!(
            store.begin_stage(&doc.id, Stage::Indexing).await.unwrap(),
            StageClaim::Started
        );
        assert_eq!(
            store.begin_stage("missing", Stage::Indexing).await.unwrap(),
            StageClaim::Missing
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_only_one_wins() {
        let (_tmp, store) = setup().await;
        let store = std::sync::Arc::new(store);
        let doc = store.create_document(&new_doc("race")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = doc.id.clone();
            handles.push(tokio::spawn(async move {
                store.begin_stage(&id, Stage::Extraction).await.unwrap()
            }));
        }
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap().is_started() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_speech_completion_records_failures() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("speech")).await.unwrap();
        store.begin_stage(&doc.id, Stage::Extraction).await.unwrap();
        store.complete_extraction(&doc.id, "x").await.unwrap();
        store.begin_stage(&doc.id, Stage::Speech).await.unwrap();
        store.plan_speech(&doc.id, 4).await.unwrap();
        store.complete_speech(&doc.id, &[1, 3]).await.unwrap();

        let doc = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.speech_status, StageStatus::Ready);
        assert_eq!(doc.speech_chunk_total, Some(4));
        assert_eq!(doc.speech_failed_chunks, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_fail_and_reset_stage() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("fail")).await.unwrap();
        store.begin_stage(&doc.id, Stage::Extraction).await.unwrap();
        assert!(store.reset_stage(&doc.id, Stage::Extraction).await.unwrap());
        assert!(!store.reset_stage(&doc.id, Stage::Extraction).await.unwrap());

        store.begin_stage(&doc.id, Stage::Extraction).await.unwrap();
        store
            .fail_stage(&doc.id, Stage::Extraction, "no text")
            .await
            .unwrap();
        let doc = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.extraction_status, StageStatus::Error);
        assert_eq!(doc.extraction_error.as_deref(), Some("no text"));
    }

    #[tokio::test]
    async fn test_speech_chunk_insert_ignores_duplicates() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("chunks")).await.unwrap();
        let chunk = |index: i64, text: &str| SpeechChunk {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: doc.id.clone(),
            index,
            text: text.to_string(),
            start_offset: index * 10,
            end_offset: index * 10 + 9,
            audio_ref: Some(format!("{}/{}.wav", doc.id, index)),
            duration_ms: Some(1200),
            created_at: now_millis(),
        };

        assert!(store.insert_speech_chunk(&chunk(1, "second")).await.unwrap());
        assert!(store.insert_speech_chunk(&chunk(0, "first")).await.unwrap());
        assert!(!store.insert_speech_chunk(&chunk(1, "rewrite")).await.unwrap());

        let chunks = store.list_speech_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].text, "second");
        assert_eq!(store.count_speech_chunks(&doc.id).await.unwrap(), 2);
        assert_eq!(
            store
                .get_speech_chunk(&doc.id, 1)
                .await
                .unwrap()
                .unwrap()
                .duration_ms,
            Some(1200)
        );
    }

    #[tokio::test]
    async fn test_playback_roundtrip() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("play")).await.unwrap();
        let mut state = store.ensure_playback(&doc.id).await.unwrap();
        assert_eq!(state.current_chunk_index, 0);
        assert!(!state.is_playing);

        state.current_chunk_index = 7;
        state.is_playing = true;
        store.put_playback(&state).await.unwrap();
        let again = store.ensure_playback(&doc.id).await.unwrap();
        assert_eq!(again.current_chunk_index, 7);
        assert!(again.is_playing);
    }

    #[tokio::test]
    async fn test_chat_history_in_order() {
        let (_tmp, store) = setup().await;
        let doc = store.create_document(&new_doc("chat")).await.unwrap();
        store
            .append_chat_message(&ChatMessage::new(&doc.id, ChatRole::User, "question"))
            .await
            .unwrap();
        store
            .append_chat_message(&ChatMessage::new(&doc.id, ChatRole::Assistant, "answer"))
            .await
            .unwrap();

        let history = store.list_chat_messages(&doc.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].content, "answer");
    }

    #[tokio::test]
    async fn test_index_vectors_replace_and_search() {
        let (_tmp, store) = setup().await;
        let chunks = lectern_core::chunk::chunk_for_index(
            "Rivers flow to the sea. Mountains rise above the clouds.",
            lectern_core::chunk::IndexChunkParams { size: 40, overlap: 0 },
        );
        assert_eq!(chunks.len(), 2);
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        store
            .replace_index_vectors("doc-x", &chunks, &vectors)
            .await
            .unwrap();
        // Replacing again must not duplicate rows.
        store
            .replace_index_vectors("doc-x", &chunks, &vectors)
            .await
            .unwrap();

        let hits = store
            .search_index_vectors("doc-x", &[0.0, 1.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert!(hits[0].text.starts_with("Mountains"));

        let range = store.index_chunk_range("doc-x", 0, 0).await.unwrap();
        assert_eq!(range.len(), 1);

        let by_hash = store.index_vectors_by_hash("doc-x").await.unwrap();
        assert_eq!(by_hash.len(), 2);
        assert_eq!(by_hash[&chunks[1].hash], vec![0.0, 1.0]);
        assert!(store.index_vectors_by_hash("doc-y").await.unwrap().is_empty());
        assert!(store
            .search_index_vectors("doc-y", &[0.0, 1.0], 5)
            .await
            .unwrap()
            .is_empty());
    }
}
