//! Core data models used throughout Lectern.
//!
//! A [`Document`] carries one status field per pipeline [`Stage`]. Each field
//! is written only through the owning stage's store operations, so the model
//! itself exposes no setters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One independent phase of the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Indexing,
    Speech,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Extraction, Stage::Indexing, Stage::Speech];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Indexing => "indexing",
            Stage::Speech => "speech",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extraction" => Ok(Stage::Extraction),
            "indexing" => Ok(Stage::Indexing),
            "speech" => Ok(Stage::Speech),
            other => anyhow::bail!(
                "invalid stage '{}': must be extraction, indexing, or speech",
                other
            ),
        }
    }
}

/// Status of a single stage.
///
/// `Uploading` is only ever used by [`Stage::Extraction`]; `Pending` only by
/// the downstream stages, which wait on extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Uploading,
    Pending,
    Processing,
    Ready,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Uploading => "uploading",
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Ready => "ready",
            StageStatus::Error => "error",
        }
    }

    /// True for `processing` and `ready`: a new trigger must be ignored.
    pub fn is_claimed(&self) -> bool {
        matches!(self, StageStatus::Processing | StageStatus::Ready)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(StageStatus::Uploading),
            "pending" => Ok(StageStatus::Pending),
            "processing" => Ok(StageStatus::Processing),
            "ready" => Ok(StageStatus::Ready),
            "error" => Ok(StageStatus::Error),
            other => anyhow::bail!("invalid stage status '{}'", other),
        }
    }
}

/// Input for creating a document once its upload has completed.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    /// Opaque source reference handed to the extraction service (URL or path).
    pub source_ref: String,
    pub content_type: Option<String>,
}

/// A processed (or in-process) document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source_ref: String,
    pub content_type: Option<String>,
    pub extraction_status: StageStatus,
    pub extracted_text: Option<String>,
    pub extraction_error: Option<String>,
    pub indexing_status: StageStatus,
    pub indexing_error: Option<String>,
    pub chunk_count: Option<i64>,
    pub speech_status: StageStatus,
    pub speech_error: Option<String>,
    /// Number of speech segments planned for this document, once known.
    pub speech_chunk_total: Option<i64>,
    /// Segment indices whose synthesis failed permanently.
    pub speech_failed_chunks: Vec<i64>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl Document {
    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Extraction => self.extraction_status,
            Stage::Indexing => self.indexing_status,
            Stage::Speech => self.speech_status,
        }
    }

    pub fn error(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Extraction => self.extraction_error.as_deref(),
            Stage::Indexing => self.indexing_error.as_deref(),
            Stage::Speech => self.speech_error.as_deref(),
        }
    }

    /// Namespace handed to the external indexer for this document.
    pub fn isolation_key(&self) -> String {
        isolation_key(&self.id)
    }
}

/// Per-document namespace so search results never cross documents.
pub fn isolation_key(document_id: &str) -> String {
    format!("doc-{}", document_id)
}

/// One synthesized audio segment. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechChunk {
    pub id: String,
    pub document_id: String,
    pub index: i64,
    pub text: String,
    /// Character offsets into the cleaned speech text.
    pub start_offset: i64,
    pub end_offset: i64,
    pub audio_ref: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
}

/// Shared read position for a document's audio. Last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub document_id: String,
    pub current_chunk_index: i64,
    pub is_playing: bool,
    pub updated_at: i64,
}

impl PlaybackState {
    pub fn initial(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            current_chunk_index: 0,
            is_playing: false,
            updated_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl FromStr for ChatRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            other => anyhow::bail!("invalid chat role '{}'", other),
        }
    }
}

/// Append-only chat history entry for a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub document_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: i64,
}

impl ChatMessage {
    pub fn new(document_id: &str, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            role,
            content: content.into(),
            created_at: now_millis(),
        }
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
