//! Application configuration for cvportal.
//!
//! User config lives at `~/.cvportal/cvportal.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PortalGenError, Result};
use crate::types::{EmbeddingProviderKind, MAX_CONTEXT_SOURCES, QuerySettings};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cvportal.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cvportal";

// ---------------------------------------------------------------------------
// Config structs (matching cvportal.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub rag: RagQueryConfig,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database holding jobs, portals and embeddings.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Template used when a job does not pick one.
    #[serde(default = "default_template")]
    pub template: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            template: default_template(),
        }
    }
}

fn default_database_path() -> String {
    "var/cvportal.db".into()
}
fn default_template() -> String {
    "professional".into()
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension declared by the provider/model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive batch calls.
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_ms: u64,

    /// Attempts per batch before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            rate_limit_delay_ms: default_rate_limit_delay(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimension() -> usize {
    1536
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_batch_size() -> usize {
    16
}
fn default_rate_limit_delay() -> u64 {
    200
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_http_timeout() -> u64 {
    30
}

/// `[chat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_chat_model(),
            api_key_env: default_embedding_key_env(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}

/// `[rag]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for RagQueryConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            max_sources: default_max_sources(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    1500
}
fn default_top_k() -> usize {
    10
}
fn default_min_score() -> f32 {
    0.7
}
fn default_max_sources() -> usize {
    3
}

/// `[deployment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// User or organisation that owns the spaces.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_sdk")]
    pub sdk: String,

    #[serde(default = "default_hardware")]
    pub hardware: String,

    #[serde(default)]
    pub private: bool,

    #[serde(default = "default_poll_attempts")]
    pub max_poll_attempts: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            namespace: None,
            token_env: default_token_env(),
            sdk: default_sdk(),
            hardware: default_hardware(),
            private: false,
            max_poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://huggingface.co".into()
}
fn default_token_env() -> String {
    "HF_TOKEN".into()
}
fn default_sdk() -> String {
    "gradio".into()
}
fn default_hardware() -> String {
    "cpu-basic".into()
}
fn default_poll_attempts() -> u32 {
    30
}
fn default_poll_interval() -> u64 {
    10_000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for any single network-bound step.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Wall-clock budget for a whole run (0 = unbounded).
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            timeout_secs: 0,
        }
    }
}

fn default_step_timeout() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime embedding settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub rate_limit_delay: Duration,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl From<&AppConfig> for EmbeddingSettings {
    fn from(config: &AppConfig) -> Self {
        let e = &config.embedding;
        Self {
            provider: e.provider,
            base_url: e.base_url.clone(),
            model: e.model.clone(),
            dimension: e.dimension,
            api_key: read_env(&e.api_key_env),
            batch_size: e.batch_size.max(1),
            rate_limit_delay: Duration::from_millis(e.rate_limit_delay_ms),
            max_retries: e.max_retries.max(1),
            retry_backoff: Duration::from_millis(e.retry_backoff_ms),
            timeout: Duration::from_secs(e.timeout_secs),
        }
    }
}

/// Runtime chat settings.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl From<&AppConfig> for ChatSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.chat.base_url.clone(),
            model: config.chat.model.clone(),
            api_key: read_env(&config.chat.api_key_env),
            timeout: Duration::from_secs(config.chat.timeout_secs),
        }
    }
}

impl TryFrom<&AppConfig> for QuerySettings {
    type Error = PortalGenError;

    /// `max_sources` is clamped into `1..=MAX_CONTEXT_SOURCES`; the other
    /// fields are rejected when out of range.
    fn try_from(config: &AppConfig) -> Result<Self> {
        let rag = &config.rag;
        if rag.top_k == 0 {
            return Err(PortalGenError::config("rag.top_k must be at least 1"));
        }
        if !(0.0..=1.0).contains(&rag.min_score) {
            return Err(PortalGenError::config(format!(
                "rag.min_score must be between 0 and 1, got {}",
                rag.min_score
            )));
        }
        if rag.max_context_tokens == 0 {
            return Err(PortalGenError::config(
                "rag.max_context_tokens must be at least 1",
            ));
        }
        if rag.max_sources > MAX_CONTEXT_SOURCES {
            tracing::warn!(
                configured = rag.max_sources,
                max = MAX_CONTEXT_SOURCES,
                "rag.max_sources clamped"
            );
        }

        Ok(Self {
            top_k: rag.top_k,
            min_score: rag.min_score,
            max_sources: rag.max_sources.clamp(1, MAX_CONTEXT_SOURCES),
            max_context_tokens: rag.max_context_tokens,
        })
    }
}

/// Runtime deployment settings.
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub api_base: String,
    pub namespace: Option<String>,
    pub token: Option<String>,
    pub sdk: String,
    pub hardware: String,
    pub private: bool,
    pub max_poll_attempts: u32,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl From<&AppConfig> for DeploymentSettings {
    fn from(config: &AppConfig) -> Self {
        let d = &config.deployment;
        Self {
            api_base: d.api_base.clone(),
            namespace: d.namespace.clone(),
            token: read_env(&d.token_env),
            sdk: d.sdk.clone(),
            hardware: d.hardware.clone(),
            private: d.private,
            max_poll_attempts: d.max_poll_attempts.max(1),
            poll_interval: Duration::from_millis(d.poll_interval_ms),
            timeout: Duration::from_secs(d.timeout_secs),
        }
    }
}

/// Runtime pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub step_timeout: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            step_timeout: Duration::from_secs(config.pipeline.step_timeout_secs),
            timeout: (config.pipeline.timeout_secs > 0)
                .then(|| Duration::from_secs(config.pipeline.timeout_secs)),
        }
    }
}

fn read_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cvportal/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PortalGenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cvportal/cvportal.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PortalGenError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PortalGenError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PortalGenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PortalGenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PortalGenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the env var named by `var_name` is set and non-empty.
pub fn validate_api_key(var_name: &str, purpose: &str) -> Result<()> {
    match read_env(var_name) {
        Some(_) => Ok(()),
        None => Err(PortalGenError::config(format!(
            "{purpose} API key not found. Set the {var_name} environment variable."
        ))),
    }
}
