//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for oracle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the oracle deployment
    pub base_url: Option<String>,
    /// Payload shape spoken by the backend (current, legacy)
    pub protocol: Option<String>,
    /// Submission mode (streaming, batch)
    pub mode: Option<String>,
    /// Request body shape (bare, wrapped)
    pub envelope: Option<String>,
    /// Give up on an answer after this many seconds
    pub timeout_secs: Option<u64>,
    /// What to do with undecodable payloads (skip, halt)
    pub decode_errors: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oracle")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ORACLE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(oracle_wire::client::DEFAULT_BASE_URL.to_string()),
            protocol: Some("current".to_string()),
            mode: Some("streaming".to_string()),
            envelope: Some("bare".to_string()),
            timeout_secs: Some(120),
            decode_errors: Some("skip".to_string()),
        };

        default_config.save()?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# oracle configuration file
# Place at ~/.config/oracle/config.toml (Linux), or point ORACLE_CONFIG_PATH at it

# Oracle deployment to talk to
base_url = "https://oracle-rs.semanticallyinvalid.net"

# Payload shape spoken by the backend (current, legacy)
protocol = "current"

# streaming: answers arrive incrementally over server-sent events
# batch: one request, one reply
mode = "streaming"

# Request body shape: a bare array of turns, or {"messages": [...]} (bare, wrapped)
envelope = "bare"

# Stop waiting for an answer after this many seconds (omit to wait forever)
timeout_secs = 120

# Undecodable payloads: skip them and keep reading, or halt the answer (skip, halt)
decode_errors = "skip"
"#
}
