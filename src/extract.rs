//! Text extraction providers.
//!
//! - **[`HttpExtractor`]** posts the source reference to the OCR service.
//! - **[`LocalExtractor`]** reads the file itself: PDFs through `pdf-extract`,
//!   `text/*` as UTF-8. Meant for offline development.
//!
//! Both join pages with `--- Page N ---` markers. The speech cleaner strips
//! them; indexing keeps them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use lectern_core::services::{Extraction, Extractor, ServiceError};

use crate::config::ExtractionConfig;
use crate::http::Endpoint;

pub const MIME_PDF: &str = "application/pdf";

/// Join page texts with page markers, skipping blank pages.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.as_ref().trim().is_empty())
        .map(|(i, p)| format!("--- Page {} ---\n{}", i + 1, p.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Client for the remote extraction service.
///
/// Request: `{"pdf_url": "<source>"}`. Response:
/// `{"text": "...", "page_count": 3, "error": null}`.
pub struct HttpExtractor {
    endpoint: Endpoint,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpExtractor {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        source_ref: &str,
        _content_type: Option<&str>,
    ) -> Result<Extraction, ServiceError> {
        let body = serde_json::json!({ "pdf_url": source_ref });
        let response = self.endpoint.post_json(None, &body).await?;
        let parsed: ExtractResponse = self.endpoint.read_json(response).await?;
        interpret_response(parsed)
    }
}

fn interpret_response(parsed: ExtractResponse) -> Result<Extraction, ServiceError> {
    if let Some(error) = parsed.error.filter(|e| !e.trim().is_empty()) {
        return Err(ServiceError::Remote(error));
    }
    match parsed.text {
        Some(text) if !text.trim().is_empty() => Ok(Extraction {
            text,
            page_count: parsed.page_count,
        }),
        _ => Err(ServiceError::Remote("no text extracted".to_string())),
    }
}

/// Reads the source from the local filesystem.
pub struct LocalExtractor;

#[async_trait]
impl Extractor for LocalExtractor {
    async fn extract(
        &self,
        source_ref: &str,
        content_type: Option<&str>,
    ) -> Result<Extraction, ServiceError> {
        let path = source_ref.strip_prefix("file://").unwrap_or(source_ref);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::Transport(format!("read {}: {}", path, e)))?;

        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(Path::new(path)).to_string());

        let extraction = if content_type == MIME_PDF {
            tokio::task::spawn_blocking(move || extract_pdf(&bytes))
                .await
                .map_err(|e| ServiceError::Local(format!("extraction task failed: {}", e)))??
        } else if content_type.starts_with("text/") {
            Extraction {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                page_count: None,
            }
        } else {
            return Err(ServiceError::Remote(format!(
                "unsupported content-type: {}",
                content_type
            )));
        };

        if extraction.text.trim().is_empty() {
            return Err(ServiceError::Remote("no text extracted".to_string()));
        }
        Ok(extraction)
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Extraction, ServiceError> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ServiceError::Remote(format!("PDF extraction failed: {}", e)))?;
    // pdf-extract separates pages with form feeds.
    let pages: Vec<&str> = raw.split('\u{c}').collect();
    Ok(Extraction {
        text: join_pages(&pages),
        page_count: Some(pages.len() as u32),
    })
}

/// Content type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => MIME_PDF,
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Create the configured extraction provider.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.provider.as_str() {
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("extraction.url required for http provider"))?;
            Ok(Arc::new(HttpExtractor::new(url, config.timeout_secs)?))
        }
        "local" => Ok(Arc::new(LocalExtractor)),
        other => bail!("Unknown extraction provider: {}", other),
    }
}
