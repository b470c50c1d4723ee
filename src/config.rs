//! TOML configuration.
//!
//! Only `[db]` and `[storage]` are required; every other section falls back to
//! defaults. Secrets never live in the file: each section that needs one names
//! the environment variable it is read from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store.
    pub blob_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins; empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_secret_env() -> String {
    "CHATHOME_JWT_SECRET".to_string()
}
fn default_token_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl AuthConfig {
    /// Token-signing secret from the environment.
    pub fn secret(&self) -> Result<String> {
        read_secret(&self.secret_env)
            .with_context(|| format!("{} must be set to sign and verify tokens", self.secret_env))
    }
}

/// Sampling parameters for one model tier.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TierProfile {
    pub model: String,
    pub temperature: f32,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default = "default_provider_key_env")]
    pub api_key_env: String,
    /// Bound on non-streaming calls and on opening a stream.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Longest silence tolerated between two streamed chunks.
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_fast_profile")]
    pub fast: TierProfile,
    #[serde(default = "default_thinking_profile")]
    pub thinking: TierProfile,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key_env: default_provider_key_env(),
            timeout_secs: default_provider_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            fast: default_fast_profile(),
            thinking: default_thinking_profile(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_provider_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_provider_timeout() -> u64 {
    60
}
fn default_stream_idle_timeout() -> u64 {
    90
}
fn default_fast_profile() -> TierProfile {
    TierProfile {
        model: "gpt-4.1-mini".to_string(),
        temperature: 0.7,
        reasoning_effort: None,
    }
}
fn default_thinking_profile() -> TierProfile {
    TierProfile {
        model: "o4-mini".to_string(),
        temperature: 1.0,
        reasoning_effort: Some("medium".to_string()),
    }
}

impl ProviderConfig {
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env).ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Let the relevance classifier decide when the caller sends no flag.
    #[serde(default = "default_true")]
    pub auto_classify: bool,
    #[serde(default = "default_search_url")]
    pub base_url: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_result_count")]
    pub result_count: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_classify: true,
            base_url: default_search_url(),
            api_key_env: default_search_key_env(),
            result_count: default_result_count(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_search_url() -> String {
    "https://api.scrapingdog.com".to_string()
}
fn default_search_key_env() -> String {
    "SCRAPINGDOG_API_KEY".to_string()
}
fn default_result_count() -> usize {
    chathome_core::search::DEFAULT_RESULT_COUNT
}
fn default_search_timeout() -> u64 {
    10
}

impl SearchConfig {
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env).ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_message_chars: default_max_message_chars(),
            max_attachments: default_max_attachments(),
            max_upload_bytes: default_max_upload_bytes(),
            title_max_chars: default_title_max_chars(),
        }
    }
}

fn default_history_window() -> usize {
    chathome_core::context::DEFAULT_HISTORY_WINDOW
}
fn default_max_message_chars() -> usize {
    10_000
}
fn default_max_attachments() -> usize {
    10
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_title_max_chars() -> usize {
    chathome_core::title::DEFAULT_TITLE_MAX_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn read_secret(var: &str) -> Result<String> {
    let value = std::env::var(var).with_context(|| format!("environment variable {} not set", var))?;
    if value.trim().is_empty() {
        anyhow::bail!("environment variable {} is empty", var);
    }
    Ok(value)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let chat = &config.chat;
    if chat.history_window == 0 {
        anyhow::bail!("chat.history_window must be > 0");
    }
    if chat.max_message_chars == 0 {
        anyhow::bail!("chat.max_message_chars must be > 0");
    }
    if chat.max_attachments == 0 {
        anyhow::bail!("chat.max_attachments must be > 0");
    }
    if chat.max_upload_bytes == 0 {
        anyhow::bail!("chat.max_upload_bytes must be > 0");
    }
    if chat.title_max_chars == 0 {
        anyhow::bail!("chat.title_max_chars must be > 0");
    }

    for (name, profile) in [
        ("provider.fast", &config.provider.fast),
        ("provider.thinking", &config.provider.thinking),
    ] {
        if profile.model.trim().is_empty() {
            anyhow::bail!("{}.model must not be empty", name);
        }
        if !(0.0..=2.0).contains(&profile.temperature) {
            anyhow::bail!("{}.temperature must be in [0.0, 2.0]", name);
        }
    }
    if config.provider.timeout_secs == 0 || config.provider.stream_idle_timeout_secs == 0 {
        anyhow::bail!("provider timeouts must be > 0");
    }

    if !(1..=10).contains(&config.search.result_count) {
        anyhow::bail!("search.result_count must be in [1, 10]");
    }
    if config.search.timeout_secs == 0 {
        anyhow::bail!("search.timeout_secs must be > 0");
    }

    if config.auth.token_ttl_secs == 0 {
        anyhow::bail!("auth.token_ttl_secs must be > 0");
    }

    match config.logging.level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown logging level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/chathome.sqlite"

[storage]
blob_root = "./data/blobs"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chat.history_window, 50);
        assert_eq!(config.chat.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.chat.title_max_chars, 60);
        assert_eq!(config.search.result_count, 5);
        assert_eq!(config.provider.fast.model, "gpt-4.1-mini");
        assert_eq!(
            config.provider.thinking.reasoning_effort.as_deref(),
            Some("medium")
        );
        assert_eq!(config.auth.token_ttl_secs, 604_800);
        assert_eq!(config.provider.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_temp = format!("{}\n[provider.fast]\nmodel = \"m\"\ntemperature = 3.5\n", MINIMAL);
        let err = parse_config(&bad_temp).unwrap_err();
        assert!(err.to_string().contains("temperature"));

        let bad_count = format!("{}\n[search]\nresult_count = 0\n", MINIMAL);
        assert!(parse_config(&bad_count).is_err());

        let bad_level = format!("{}\n[logging]\nlevel = \"loud\"\n", MINIMAL);
        assert!(parse_config(&bad_level).is_err());
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/chathome.example.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7340");
        assert!(config.search.auto_classify);
        assert_eq!(config.chat.max_attachments, 10);
    }

    #[test]
    fn missing_storage_section_is_an_error() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("storage"));
    }

    #[test]
    fn secrets_come_from_named_env_var() {
        let text = format!("{}\n[search]\napi_key_env = \"CHATHOME_TEST_SEARCH_KEY_UNSET\"\n", MINIMAL);
        let config = parse_config(&text).unwrap();
        assert_eq!(config.search.api_key(), None);
    }
}
