//! Indexing providers.
//!
//! Two implementations of [`Indexer`]:
//! - **[`HttpIndexService`]** hands the document text to a remote index
//!   service, which chunks and embeds on its own.
//! - **[`LocalVectorIndex`]** embeds the overlap-policy chunks through an
//!   embedding endpoint and keeps the vectors in the [`Store`], keyed by
//!   isolation key.
//!
//! # Retry Strategy
//!
//! The embedding client retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The index service call itself is never retried: a failed indexing run is
//! terminal and a manual retry is a fresh trigger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use lectern_core::services::{
    IndexReceipt, IndexRequest, Indexer, SearchEntry, SearchRequest, SearchResult, ServiceError,
};
use lectern_core::store::Store;

use crate::config::{IndexingConfig, MAX_EMBED_BATCH};
use crate::http::Endpoint;

/// Client for the remote index service.
///
/// `POST {url}/index` with `{isolation_key, title, text}` → `{status}`;
/// `POST {url}/search` with a [`SearchRequest`] → [`SearchResult`].
pub struct HttpIndexService {
    endpoint: Endpoint,
}

impl HttpIndexService {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl Indexer for HttpIndexService {
    async fn index(&self, request: &IndexRequest) -> Result<IndexReceipt, ServiceError> {
        let body = serde_json::json!({
            "isolation_key": request.isolation_key,
            "title": request.title,
            "text": request.text,
        });
        let response = self.endpoint.post_json(Some("index"), &body).await?;
        self.endpoint.read_json(response).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError> {
        let response = self.endpoint.post_json(Some("search"), request).await?;
        self.endpoint.read_json(response).await
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedQueryResponse {
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    error: Option<String>,
}

/// Batched embedding client with retry and backoff.
///
/// Documents: `POST {texts: [...]}` → `{embeddings: [[...], ...]}`.
/// Queries: `POST {query}` → `{embedding: [...]}`.
pub struct EmbeddingClient {
    texts: Endpoint,
    query: Endpoint,
    batch_size: usize,
    max_retries: u32,
    base_delay: Duration,
}

impl EmbeddingClient {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        let embed_url = config
            .embed_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("indexing.embed_url required for local provider"))?;
        let query_url = config.embed_query_url.as_deref().unwrap_or(embed_url);

        Ok(Self {
            texts: Endpoint::new(embed_url, config.timeout_secs)?,
            query: Endpoint::new(query_url, config.timeout_secs)?,
            batch_size: config.batch_size.clamp(1, MAX_EMBED_BATCH),
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    /// Shorten the backoff unit (tests).
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Embed texts in input order, in batches of at most `batch_size`.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "texts": batch });
            let parsed: EmbedResponse = self.post_with_retry(&self.texts, &body).await?;
            if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
                return Err(ServiceError::Remote(error));
            }
            if parsed.embeddings.len() != batch.len() {
                return Err(ServiceError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    parsed.embeddings.len()
                )));
            }
            vectors.extend(parsed.embeddings);
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ServiceError> {
        let body = serde_json::json!({ "query": query });
        let parsed: EmbedQueryResponse = self.post_with_retry(&self.query, &body).await?;
        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return Err(ServiceError::Remote(error));
        }
        if parsed.embedding.is_empty() {
            return Err(ServiceError::InvalidResponse("empty query embedding".into()));
        }
        Ok(parsed.embedding)
    }

    async fn post_with_retry<T: serde::de::DeserializeOwned + Send>(
        &self,
        endpoint: &Endpoint,
        body: &serde_json::Value,
    ) -> Result<T, ServiceError> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = self.base_delay * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let result = match endpoint.post_json(None, body).await {
                Ok(response) => endpoint.read_json::<T>(response).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "embedding request failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Store-backed vector index, one namespace per isolation key.
pub struct LocalVectorIndex {
    store: Arc<dyn Store>,
    embedder: EmbeddingClient,
}

impl LocalVectorIndex {
    pub fn new(store: Arc<dyn Store>, embedder: EmbeddingClient) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Indexer for LocalVectorIndex {
    async fn index(&self, request: &IndexRequest) -> Result<IndexReceipt, ServiceError> {
        if request.chunks.is_empty() {
            return Err(ServiceError::Local("nothing to index".into()));
        }
        let mut known = self
            .store
            .index_vectors_by_hash(&request.isolation_key)
            .await
            .map_err(|e| ServiceError::Local(format!("loading vectors: {:#}", e)))?;

        // Only chunks whose text changed go to the embedding service.
        let mut seen = HashSet::new();
        let stale: Vec<String> = request
            .chunks
            .iter()
            .filter(|c| !known.contains_key(&c.hash) && seen.insert(c.hash.as_str()))
            .map(|c| c.text.clone())
            .collect();
        let mut fresh = if stale.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_texts(&stale).await?
        }
        .into_iter();
        tracing::debug!(
            isolation_key = %request.isolation_key,
            reused = request.chunks.len() - stale.len(),
            embedded = stale.len(),
            "embedding chunks"
        );

        let mut vectors = Vec::with_capacity(request.chunks.len());
        for chunk in &request.chunks {
            let vector = match known.get(&chunk.hash) {
                Some(vector) => vector.clone(),
                None => {
                    let vector = fresh.next().ok_or_else(|| {
                        ServiceError::InvalidResponse("fewer embeddings than chunks".into())
                    })?;
                    known.insert(chunk.hash.clone(), vector.clone());
                    vector
                }
            };
            vectors.push(vector);
        }

        self.store
            .replace_index_vectors(&request.isolation_key, &request.chunks, &vectors)
            .await
            .map_err(|e| ServiceError::Local(format!("storing vectors: {:#}", e)))?;

        Ok(IndexReceipt {
            status: format!("indexed {} chunks", request.chunks.len()),
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError> {
        let query_vec = self.embedder.embed_query(&request.query).await?;
        let hits = self
            .store
            .search_index_vectors(&request.isolation_key, &query_vec, request.limit)
            .await
            .map_err(|e| ServiceError::Local(format!("vector search: {:#}", e)))?;

        let window = request.context_window as i64;
        let mut contexts = Vec::with_capacity(hits.len());
        for hit in &hits {
            let neighbours = self
                .store
                .index_chunk_range(
                    &request.isolation_key,
                    hit.chunk_index - window,
                    hit.chunk_index + window,
                )
                .await
                .map_err(|e| ServiceError::Local(format!("context lookup: {:#}", e)))?;
            let merged = neighbours
                .into_iter()
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join("\n");
            contexts.push(merged);
        }

        Ok(SearchResult {
            matched_text: contexts.join("\n\n---\n\n"),
            entries: hits
                .into_iter()
                .map(|hit| SearchEntry {
                    chunk_index: Some(hit.chunk_index),
                    score: hit.score,
                    text: hit.text,
                })
                .collect(),
        })
    }
}

/// Create the configured indexing provider.
pub fn create_indexer(config: &IndexingConfig, store: Arc<dyn Store>) -> Result<Arc<dyn Indexer>> {
    match config.provider.as_str() {
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("indexing.url required for http provider"))?;
            Ok(Arc::new(HttpIndexService::new(url, config.timeout_secs)?))
        }
        "local" => Ok(Arc::new(LocalVectorIndex::new(
            store,
            EmbeddingClient::new(config)?,
        ))),
        other => bail!("Unknown indexing provider: {}", other),
    }
}
