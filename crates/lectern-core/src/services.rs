//! Contracts for the external AI services.
//!
//! Each service is a narrow trait with explicit request and response types.
//! The HTTP implementations live in the app crate; tests script fakes
//! against the same traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::IndexChunk;

/// Failure talking to an external service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service reported an error: {0}")]
    Remote(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// A local step around the call failed (storage, task join).
    #[error("{0}")]
    Local(String),
}

impl ServiceError {
    /// Network failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport(_) | ServiceError::Timeout(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Remote(_) | ServiceError::InvalidResponse(_) | ServiceError::Local(_) => {
                false
            }
        }
    }
}

/// Text pulled out of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub page_count: Option<u32>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract plain text from the document at `source_ref`.
    async fn extract(
        &self,
        source_ref: &str,
        content_type: Option<&str>,
    ) -> Result<Extraction, ServiceError>;
}

/// Content handed to the indexer under a per-document isolation key.
///
/// `chunks` are the overlap-policy windows of `text`. Indexers that do their
/// own chunking only look at `text`.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub isolation_key: String,
    pub title: String,
    pub text: String,
    pub chunks: Vec<IndexChunk>,
}

/// Opaque success indicator returned by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReceipt {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub isolation_key: String,
    pub query: String,
    pub limit: usize,
    /// Neighbouring chunks merged around each hit.
    pub context_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub chunk_index: Option<i64>,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub matched_text: String,
    pub entries: Vec<SearchEntry>,
}

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, request: &IndexRequest) -> Result<IndexReceipt, ServiceError>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: String,
    /// 0.0 (flat) to 1.0 (dramatic).
    pub expressiveness: f32,
    /// 0.0 (fast) to 1.0 (deliberate).
    pub pacing: f32,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns raw audio bytes.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ServiceError>;
}

/// One message of a chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ServiceError>;
}
