//! # Configuration Management Module
//!
//! All runtime settings for the ingestion daemon live in one TOML file that is
//! loaded once at startup and passed by reference to the components that need
//! it. Nothing here is process-global: the keyring and skip-list are derived
//! from [`MqttConfig`] by their owners.
//!
//! ## Configuration Structure
//!
//! - [`MqttConfig`] - broker endpoint, credentials, topic filters, channel keys, skip-list
//! - [`DatabaseConfig`] - relational store connection settings
//! - [`IngestConfig`] - pipeline tuning (throughput reporting)
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [mqtt]
//! server = "mqtt.meshtastic.org"
//! port = 1883
//! username = "meshdev"
//! password = "large4cats"
//! topics = ["msh/US/#"]
//! secondary_keys = "'c2VjcmV0c2VjcmV0c2VjcmV0IQ=='"
//! skip_node_ids = "0x1234abcd, 42"
//!
//! [database]
//! connection_string = "sqlite://packets.db"
//! ```
//!
//! ## List settings
//!
//! `secondary_keys` and `skip_node_ids` accept either one comma-separated
//! string or a TOML array. Array items may be strings or integers. Entries are
//! trimmed and surrounding quote characters are stripped, so values pasted
//! from other config formats keep working.

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::meshtastic::parse_node_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    /// Empty means anonymous.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Topic filters, e.g. `msh/US/#`
    pub topics: Vec<String>,
    /// Operator channel keys (base64), tried after the default key in order.
    #[serde(default)]
    pub secondary_keys: ListSetting,
    /// Sender node ids whose packets are dropped at decode time.
    #[serde(default)]
    pub skip_node_ids: ListSetting,
    /// Fixed MQTT client id. When unset a random id is chosen once per process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Delay before every reconnect attempt (ms). Fixed, not exponential.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_keep_alive_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite://path` (the `sqlite+aiosqlite:///path` form is accepted as well)
    pub connection_string: String,
    /// How long a writer waits on a locked database before failing (seconds).
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_busy_timeout_secs() -> u64 {
    900
}

fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "sqlite://packets.db".to_string(),
            busy_timeout_secs: default_busy_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Log a throughput line every N delivered envelopes (0 disables).
    #[serde(default = "default_throughput_log_interval")]
    pub throughput_log_interval: u64,
}

fn default_throughput_log_interval() -> u64 {
    10_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            throughput_log_interval: default_throughput_log_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// A list-valued setting given either as `"a, b"` or as `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListSetting {
    Text(String),
    Items(Vec<ListItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListItem {
    Int(i64),
    Text(String),
}

impl Default for ListSetting {
    fn default() -> Self {
        ListSetting::Text(String::new())
    }
}

impl ListSetting {
    /// Cleaned, non-empty entries in configured order.
    pub fn entries(&self) -> Vec<String> {
        let raw: Vec<String> = match self {
            ListSetting::Text(s) => s.split(',').map(str::to_string).collect(),
            ListSetting::Items(items) => items
                .iter()
                .map(|item| match item {
                    ListItem::Int(v) => v.to_string(),
                    ListItem::Text(s) => s.clone(),
                })
                .collect(),
        };
        raw.iter()
            .map(|v| strip_quotes(v.trim()).trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// Remove one pair of matching surrounding quotes.
pub fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == bytes[bytes.len() - 1]
        && (bytes[0] == b'\'' || bytes[0] == b'"')
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parse an integer literal the way operators tend to write node ids:
/// decimal, `0x`/`0o`/`0b` prefixed (with optional `_` separators), or the
/// `!hhhhhhhh` node id form.
pub fn parse_int_literal(raw: &str) -> Option<u32> {
    let s = raw.trim();
    if s.starts_with('!') {
        return parse_node_id(s);
    }
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    if digits.is_empty() || digits.starts_with('+') || digits.starts_with('-') {
        return None;
    }
    // Leading zeros on a decimal literal are ambiguous; reject them.
    if radix == 10 && digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

impl MqttConfig {
    /// Username/password pair, or `None` for anonymous sessions.
    pub fn credentials(&self) -> Option<(String, String)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.clone(), self.password.clone()))
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Configured secondary keys as cleaned base64 strings (not yet decoded).
    pub fn secondary_key_entries(&self) -> Vec<String> {
        self.secondary_keys.entries()
    }

    /// Sender ids to drop at decode time. Invalid entries are logged and ignored.
    pub fn skip_node_ids(&self) -> HashSet<u32> {
        let mut ids = HashSet::new();
        for entry in self.skip_node_ids.entries() {
            match parse_int_literal(&entry) {
                Some(id) => {
                    ids.insert(id);
                }
                None => warn!("Invalid node id in mqtt.skip_node_ids: {}", entry),
            }
        }
        ids
    }

    /// Client id used for every (re)connect of this process.
    pub fn session_client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("meshingest-{}", rand::random::<u16>()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.server.trim().is_empty() {
            return Err(anyhow!("mqtt.server must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(anyhow!("mqtt.port must be non-zero"));
        }
        if self.mqtt.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(anyhow!("mqtt.topics must contain at least one topic filter"));
        }
        if self.mqtt.reconnect_delay_ms == 0 {
            return Err(anyhow!("mqtt.reconnect_delay_ms must be at least 1"));
        }
        if crate::storage::normalize_connection_string(&self.database.connection_string).is_none()
        {
            return Err(anyhow!(
                "database.connection_string '{}' is not a sqlite:// URL",
                self.database.connection_string
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mqtt: MqttConfig {
                server: "mqtt.meshtastic.org".to_string(),
                port: 1883,
                username: "meshdev".to_string(),
                password: "large4cats".to_string(),
                topics: vec!["msh/US/#".to_string()],
                secondary_keys: ListSetting::default(),
                skip_node_ids: ListSetting::default(),
                client_id: None,
                reconnect_delay_ms: default_reconnect_delay_ms(),
                keep_alive_secs: default_keep_alive_secs(),
            },
            database: DatabaseConfig::default(),
            ingest: IngestConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshingest.log".to_string()),
            },
        }
    }
}
