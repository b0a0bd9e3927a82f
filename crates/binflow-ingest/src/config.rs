//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main ingest configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Hub websocket URL used when no runtime override is stored
    #[serde(default = "default_url")]
    pub default_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_url: default_url(),
        }
    }
}

fn default_url() -> String {
    "ws://localhost:4000/ws".to_string()
}

/// Load configuration from file, falling back to defaults when absent.
pub fn load_config(path: &Path) -> Result<IngestConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: IngestConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(IngestConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_empty() {
        let config: IngestConfig = toml::from_str("").unwrap();
        assert_eq!(config.upstream.default_url, "ws://localhost:4000/ws");
    }

    #[test]
    fn url_override_is_read() {
        let config: IngestConfig = toml::from_str(
            r#"
            [upstream]
            default_url = "ws://hub.internal:4000/ws"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.default_url, "ws://hub.internal:4000/ws");
    }
}
