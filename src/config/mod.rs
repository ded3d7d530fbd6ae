use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// API server address
    #[serde(default = "default_address")]
    pub address: String,
    /// API server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Largest accepted `POST /frame` body, in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            log_level: default_log_level(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file holding the events table
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Connection pool max size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database, in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("events.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Live video stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// JPEG quality used when re-encoding frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Re-send the current frame after this many milliseconds without a new one (0 = never)
    #[serde(default = "default_resend_interval")]
    pub resend_interval_ms: u64,
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_resend_interval() -> u64 {
    1000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            resend_interval_ms: default_resend_interval(),
        }
    }
}

/// Event ingestion and query configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Source recorded when a detector omits one
    #[serde(default = "default_source")]
    pub default_source: String,
    /// Number of events returned by /events/recent without a limit
    #[serde(default = "default_recent_limit")]
    pub default_limit: i64,
    /// Upper bound applied to the requested limit
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

fn default_source() -> String {
    "camera1".to_string()
}

fn default_recent_limit() -> i64 {
    50
}

fn default_max_limit() -> i64 {
    1000
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_source: default_source(),
            default_limit: default_recent_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// WhatsApp Cloud API alert configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Messages endpoint; alerts are only logged when unset
    #[serde(default)]
    pub api_url: Option<String>,
    /// Bearer token for the messages endpoint
    #[serde(default)]
    pub api_token: Option<String>,
    /// Recipient number
    #[serde(default)]
    pub to_number: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_alert_timeout")]
    pub timeout_ms: u64,
}

fn default_alert_timeout() -> u64 {
    5000
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            to_number: None,
            timeout_ms: default_alert_timeout(),
        }
    }
}

/// Gemini chat configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_chat_timeout")]
    pub timeout_ms: u64,
}

fn default_chat_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_chat_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_chat_timeout() -> u64 {
    30000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_chat_model(),
            base_url: default_chat_base_url(),
            timeout_ms: default_chat_timeout(),
        }
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            let config = if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(anyhow::anyhow!("Unsupported config file format"));
            };

            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Overlay provider credentials and the database path from the environment
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

    if let Some(url) = non_empty("WHATSAPP_API_URL") {
        config.alerts.api_url = Some(url);
    }
    if let Some(token) = non_empty("WHATSAPP_API_TOKEN") {
        config.alerts.api_token = Some(token);
    }
    if let Some(to) = non_empty("WHATSAPP_TO_NUMBER") {
        config.alerts.to_number = Some(to);
    }
    if let Some(key) = non_empty("GEMINI_API_KEY") {
        config.chat.api_key = Some(key);
    }
    if let Some(path) = non_empty("EVENTS_DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
}
