//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! Secrets are never read from the file: the service bearer token comes from
//! `LECTERN_SERVICE_TOKEN`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lectern_core::chunk::{IndexChunkParams, SpeechChunkParams};
use lectern_core::playback::BufferPolicy;

use crate::executor::{PoolConfig, MAX_ATTEMPTS};

/// Environment variable holding the bearer token for the external services.
pub const SERVICE_TOKEN_ENV: &str = "LECTERN_SERVICE_TOKEN";

/// Upper bound on texts per embedding request.
pub const MAX_EMBED_BATCH: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
        }
    }
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("./data/audio")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub index: IndexChunkingConfig,
    #[serde(default)]
    pub speech: SpeechChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexChunkingConfig {
    #[serde(default = "default_index_size")]
    pub size: usize,
    #[serde(default = "default_index_overlap")]
    pub overlap: usize,
}

impl Default for IndexChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_index_size(),
            overlap: default_index_overlap(),
        }
    }
}

impl IndexChunkingConfig {
    pub fn params(&self) -> IndexChunkParams {
        IndexChunkParams {
            size: self.size,
            overlap: self.overlap,
        }
    }
}

fn default_index_size() -> usize {
    1000
}
fn default_index_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechChunkingConfig {
    #[serde(default = "default_speech_target")]
    pub target: usize,
    #[serde(default = "default_speech_min")]
    pub min: usize,
    #[serde(default = "default_speech_max")]
    pub max: usize,
}

impl Default for SpeechChunkingConfig {
    fn default() -> Self {
        Self {
            target: default_speech_target(),
            min: default_speech_min(),
            max: default_speech_max(),
        }
    }
}

impl SpeechChunkingConfig {
    pub fn params(&self) -> SpeechChunkParams {
        SpeechChunkParams {
            target: self.target,
            min: self.min,
            max: self.max,
        }
    }
}

fn default_speech_target() -> usize {
    400
}
fn default_speech_min() -> usize {
    200
}
fn default_speech_max() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_base: default_backoff_base(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl ExecutorConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_parallelism: self.max_parallelism,
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_base: self.backoff_base,
            attempt_timeout: Some(Duration::from_secs(self.attempt_timeout_secs)),
        }
    }
}

fn default_max_parallelism() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_backoff_base() -> f64 {
    2.0
}
fn default_attempt_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_provider() -> String {
    "http".to_string()
}
fn default_extraction_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
    /// Query embedding endpoint; defaults to `embed_url`.
    #[serde(default)]
    pub embed_query_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_indexing_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            embed_url: None,
            embed_query_url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_indexing_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_indexing_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_half")]
    pub expressiveness: f32,
    #[serde(default = "default_half")]
    pub pacing: f32,
    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            url: None,
            language: default_language(),
            expressiveness: default_half(),
            pacing: default_half(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

fn default_language() -> String {
    "es".to_string()
}
fn default_half() -> f32 {
    0.5
}
fn default_speech_timeout() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_limit: default_context_limit(),
            context_window: default_context_window(),
            history_limit: default_history_limit(),
            timeout_secs: default_chat_timeout(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_context_limit() -> usize {
    5
}
fn default_context_window() -> usize {
    1
}
fn default_history_limit() -> usize {
    10
}
fn default_chat_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "default_buffer_window")]
    pub buffer_window: usize,
    #[serde(default = "default_buffer_min_ready")]
    pub buffer_min_ready: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_window: default_buffer_window(),
            buffer_min_ready: default_buffer_min_ready(),
        }
    }
}

impl PlaybackConfig {
    pub fn policy(&self) -> BufferPolicy {
        BufferPolicy {
            window: self.buffer_window,
            min_ready: self.buffer_min_ready,
        }
    }
}

fn default_buffer_window() -> usize {
    5
}
fn default_buffer_min_ready() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Bearer token for the external services, if set.
pub fn service_token() -> Option<String> {
    std::env::var(SERVICE_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    let index = &config.chunking.index;
    if index.size == 0 {
        anyhow::bail!("chunking.index.size must be > 0");
    }
    if index.overlap >= index.size {
        anyhow::bail!("chunking.index.overlap must be < chunking.index.size");
    }
    let speech = &config.chunking.speech;
    if speech.min == 0 || speech.min > speech.target || speech.target > speech.max {
        anyhow::bail!("chunking.speech must satisfy 0 < min <= target <= max");
    }

    // Executor
    let executor = &config.executor;
    if executor.max_parallelism == 0 {
        anyhow::bail!("executor.max_parallelism must be >= 1");
    }
    if executor.max_attempts == 0 || executor.max_attempts > MAX_ATTEMPTS {
        anyhow::bail!("executor.max_attempts must be in [1, {}]", MAX_ATTEMPTS);
    }
    if !executor.backoff_base.is_finite() || executor.backoff_base < 1.0 {
        anyhow::bail!("executor.backoff_base must be a finite number >= 1.0");
    }

    // Providers
    match config.extraction.provider.as_str() {
        "http" => {
            if config.extraction.url.is_none() {
                anyhow::bail!("extraction.url must be set when provider is 'http'");
            }
        }
        "local" => {}
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be http or local.",
            other
        ),
    }
    match config.indexing.provider.as_str() {
        "http" => {
            if config.indexing.url.is_none() {
                anyhow::bail!("indexing.url must be set when provider is 'http'");
            }
        }
        "local" => {
            if config.indexing.embed_url.is_none() {
                anyhow::bail!("indexing.embed_url must be set when provider is 'local'");
            }
        }
        other => anyhow::bail!(
            "Unknown indexing provider: '{}'. Must be http or local.",
            other
        ),
    }
    if config.indexing.batch_size == 0 || config.indexing.batch_size > MAX_EMBED_BATCH {
        anyhow::bail!("indexing.batch_size must be in [1, {}]", MAX_EMBED_BATCH);
    }

    // Speech
    if config.speech.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        anyhow::bail!("speech.url must be set");
    }
    if !(0.0..=1.0).contains(&config.speech.expressiveness) {
        anyhow::bail!("speech.expressiveness must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.speech.pacing) {
        anyhow::bail!("speech.pacing must be in [0.0, 1.0]");
    }

    if config.playback.buffer_window == 0 {
        anyhow::bail!("playback.buffer_window must be >= 1");
    }

    Ok(())
}
