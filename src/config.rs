use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    /// Model used for extraction and interaction analysis.
    #[serde(default)]
    pub primary: String,
    /// Cheaper model used for gap/action framing fallbacks.
    #[serde(default)]
    pub fast: String,
}

impl ModelsConfig {
    /// Fill in unset model tiers. `fast` defaults to `primary`.
    pub fn apply_defaults(&mut self) {
        if self.primary.is_empty() {
            self.primary = "openai/gpt-4o-mini".to_string();
        }
        if self.fast.is_empty() {
            self.fast = self.primary.clone();
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "pmdaemon.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind the HTTP server to (default: "127.0.0.1").
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Background batch drain of queued jobs. Polling a job still processes
    /// it on demand when this is off.
    #[serde(default = "default_drain_enabled")]
    pub drain_enabled: bool,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    /// Max queued jobs processed per drain pass.
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_enabled: default_drain_enabled(),
            drain_interval_secs: default_drain_interval_secs(),
            drain_limit: default_drain_limit(),
        }
    }
}

fn default_drain_enabled() -> bool {
    true
}
fn default_drain_interval_secs() -> u64 {
    30
}
fn default_drain_limit() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// How many recent chat entries the stages look at.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

fn default_history_window() -> usize {
    10
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.provider.models.apply_defaults();
        Ok(config)
    }
}
