use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Scheduler tick granularity. The spec window is 10–60 s; 15 s keeps
/// checkout alerts and scheduled sends close to their fire-at instants.
pub const SCHEDULER_TICK_SECS: u64 = 15;

/// Top-level runtime config (`rainbow.toml` + `RAINBOW_*` env overrides).
///
/// Secrets and process-level settings live here; behavioural knobs that staff
/// tune at runtime (routing table, tier thresholds, provider priorities) live
/// in the JSON documents managed by [`crate::store::ConfigStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainbowConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// External WhatsApp transport send API. Absent in simulator-only
    /// deployments — outbound messages are then recorded, not delivered.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RainbowConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
            },
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            assistant: AssistantConfig::default(),
            paths: PathsConfig::default(),
            transport: None,
        }
    }
}

pub const DEFAULT_PORT: u16 = 18890;
pub const DEFAULT_BIND: &str = "127.0.0.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Credentials for provider adapters. Which providers are *used*, and in what
/// order, is decided by the descriptor list in `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub embeddings: Option<EmbeddingsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

/// Embeddings endpoint for the semantic classifier tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
}

/// Behaviour knobs with process-lifetime defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Message count that triggers head summarization.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    /// How many recent messages survive a summarization pass.
    #[serde(default = "default_summarize_keep_tail")]
    pub summarize_keep_tail: usize,
    /// Idle minutes before an active workflow is auto-cancelled.
    #[serde(default = "default_workflow_idle_minutes")]
    pub workflow_idle_minutes: i64,
    /// Minutes between sentiment escalations for the same conversation.
    #[serde(default = "default_sentiment_cooldown_minutes")]
    pub sentiment_cooldown_minutes: i64,
    /// Hard deadline for one inbound turn (classify + retrieve + generate).
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    /// Local hour (0-23) at which the checkout-alert job runs.
    #[serde(default = "default_checkout_alert_hour")]
    pub checkout_alert_hour: u8,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: default_summarize_threshold(),
            summarize_keep_tail: default_summarize_keep_tail(),
            workflow_idle_minutes: default_workflow_idle_minutes(),
            sentiment_cooldown_minutes: default_sentiment_cooldown_minutes(),
            request_deadline_secs: default_request_deadline_secs(),
            checkout_alert_hour: default_checkout_alert_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the JSON config documents (routing.json, …).
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    /// Flat directory of plain-text knowledge topic files.
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            knowledge_dir: default_knowledge_dir(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rainbow/rainbow.db", home)
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_summarize_threshold() -> usize {
    20
}
fn default_summarize_keep_tail() -> usize {
    10
}
fn default_workflow_idle_minutes() -> i64 {
    30
}
fn default_sentiment_cooldown_minutes() -> i64 {
    30
}
fn default_request_deadline_secs() -> u64 {
    30
}
fn default_checkout_alert_hour() -> u8 {
    9
}
fn default_config_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rainbow/config", home)
}
fn default_knowledge_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rainbow/knowledge", home)
}

impl RainbowConfig {
    /// Load config from a TOML file with RAINBOW_* env var overrides.
    ///
    /// Corrupt config refuses to load — the caller decides whether to abort
    /// startup (it should) or fall back to defaults for local tooling.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RainbowConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RAINBOW_").split("_"))
            .extract()
            .map_err(|e| crate::error::RainbowError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rainbow/rainbow.toml", home)
}
