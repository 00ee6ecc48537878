//! HTTP client for the speech synthesis service.
//!
//! Request: `{"text", "language", "exaggeration", "cfg_weight"}`. A 2xx
//! response carries the WAV bytes; errors come back as `{"error": "..."}`
//! with a non-2xx status. Expressiveness maps to `exaggeration` and pacing
//! to `cfg_weight`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use lectern_core::services::{ServiceError, SynthesisRequest, Synthesizer};

use crate::http::Endpoint;

pub struct HttpSynthesizer {
    endpoint: Endpoint,
}

#[derive(Debug, Deserialize)]
struct SynthesisErrorBody {
    error: String,
}

impl HttpSynthesizer {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ServiceError> {
        let body = serde_json::json!({
            "text": request.text,
            "language": request.language,
            "exaggeration": request.expressiveness,
            "cfg_weight": request.pacing,
        });
        let response = self.endpoint.post_json(None, &body).await?;
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let bytes = self.endpoint.read_bytes(response).await?;
        interpret_audio(bytes, is_json)
    }
}

fn interpret_audio(bytes: Vec<u8>, is_json: bool) -> Result<Vec<u8>, ServiceError> {
    if is_json {
        let message = serde_json::from_slice::<SynthesisErrorBody>(&bytes)
            .map(|b| b.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        return Err(ServiceError::Remote(message));
    }
    if bytes.is_empty() {
        return Err(ServiceError::InvalidResponse("empty audio body".into()));
    }
    Ok(bytes)
}
