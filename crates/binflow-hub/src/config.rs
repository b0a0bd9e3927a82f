//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main hub configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the websocket/REST server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum inbound websocket message size in bytes. Must be large
    /// enough for base64-encoded image captures.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024 // headroom for base64-encoded captures
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to connect. Empty list allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Load configuration from file, falling back to defaults when absent.
pub fn load_config(path: &Path) -> Result<HubConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: HubConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:4000");
        assert_eq!(config.server.max_message_bytes, 16 * 1024 * 1024);
        assert!(config.cors.allowed_origins.is_empty());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [cors]
            allowed_origins = ["http://localhost:5173"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.server.max_message_bytes, 16 * 1024 * 1024);
        assert_eq!(config.cors.allowed_origins.len(), 1);
    }
}
