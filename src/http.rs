//! Shared plumbing for the HTTP service clients.
//!
//! Every external service speaks JSON over POST. This module builds the
//! `reqwest` client, attaches the optional bearer token, and maps transport
//! and status failures onto [`ServiceError`].

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;

use lectern_core::services::ServiceError;

use crate::config::service_token;

/// A configured endpoint: client with timeout, URL and optional token.
#[derive(Clone)]
pub struct Endpoint {
    client: Client,
    url: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl Endpoint {
    pub fn new(url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: service_token(),
            timeout_secs,
        })
    }

    /// POST `body` as JSON to the endpoint URL, or to `url/path` when a
    /// path is given. Non-2xx responses become [`ServiceError::Status`].
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: Option<&str>,
        body: &B,
    ) -> Result<Response, ServiceError> {
        let url = match path {
            Some(p) => format!("{}/{}", self.url, p.trim_start_matches('/')),
            None => self.url.clone(),
        };
        let request = self.authorize(self.client.post(url).json(body));
        let response = request.send().await.map_err(|e| self.map_err(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            status: status.as_u16(),
            body: truncate(&body, 500),
        })
    }

    /// Decode a JSON body, mapping failures to [`ServiceError::InvalidResponse`].
    pub async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ServiceError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }

    pub async fn read_bytes(&self, response: Response) -> Result<Vec<u8>, ServiceError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| self.map_err(e))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_err(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout_secs)
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}
