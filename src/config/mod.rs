//! # Configuration Management Module
//!
//! Typed configuration for the bridge, loaded from a TOML file.
//!
//! ## Configuration Structure
//!
//! - [`RadioConfig`] - target peer and advertisement filter
//! - [`CollectorConfig`] - remote collector endpoint
//! - [`LocationConfig`] - location permission and position source
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use clampa::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Collector: {}", config.collector.url());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [radio]
//! name_filter = "RAK4631"
//! target_id = "E4:5F:01:2A:9B:11"
//! target_name = "RAK4631-Field-3"
//!
//! [collector]
//! base_url = "http://collector.local:8000/"
//! endpoint = "post"
//! timeout_seconds = 10
//!
//! [location]
//! authorization = "when_in_use"
//! latitude = 42.3398
//! longitude = -71.0892
//!
//! [logging]
//! level = "info"
//! file = "clampa.log"
//! ```
//!
//! CLI arguments take precedence over the file, the file over defaults.

use crate::location::Authorization;
use crate::radio::DEFAULT_NAME_FILTER;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Substring a peer's name must contain to be listed in browse mode.
    #[serde(default = "default_name_filter")]
    pub name_filter: String,
    /// Peer to follow in `run` when `--peer` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Name shown in status lines until the peer reports its own.
    #[serde(default)]
    pub target_name: String,
    /// Which host adapter to use when several are present.
    #[serde(default)]
    pub adapter_index: usize,
    /// Try the host's record of the target before the first scan.
    #[serde(default)]
    pub cached_connect: bool,
}

fn default_name_filter() -> String {
    DEFAULT_NAME_FILTER.to_string()
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            name_filter: default_name_filter(),
            target_id: None,
            target_name: String::new(),
            adapter_index: 0,
            cached_connect: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

fn default_endpoint() -> String {
    "post".to_string()
}

fn default_timeout_seconds() -> u32 {
    10
}

impl CollectorConfig {
    /// Full submission URL: base URL joined with the endpoint path.
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let endpoint = self.endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, endpoint)
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LocationConfig {
    #[serde(default)]
    pub authorization: Authorization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
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

    pub fn validate(&self) -> Result<()> {
        let url = &self.collector.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("collector.base_url must be an http(s) URL, got '{}'", url));
        }
        if self.collector.timeout_seconds == 0 {
            return Err(anyhow!("collector.timeout_seconds must be at least 1"));
        }
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return Err(anyhow!("location.latitude and location.longitude must be set together"));
        }
        if let Some(lat) = self.location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(anyhow!("location.latitude out of range: {}", lat));
            }
        }
        if let Some(lon) = self.location.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(anyhow!("location.longitude out of range: {}", lon));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            radio: RadioConfig::default(),
            collector: CollectorConfig::default(),
            location: LocationConfig {
                authorization: Authorization::AuthorizedWhenInUse,
                latitude: None,
                longitude: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("clampa.log".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_url_joins_once() {
        let mut c = CollectorConfig::default();
        c.base_url = "https://example.org/api/".to_string();
        assert_eq!(c.url(), "https://example.org/api/post");
        c.endpoint = "/post".to_string();
        assert_eq!(c.url(), "https://example.org/api/post");
        c.base_url = "https://example.org/api".to_string();
        assert_eq!(c.url(), "https://example.org/api/post");
        c.endpoint = String::new();
        assert_eq!(c.url(), "https://example.org/api");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [collector]
            base_url = "http://10.0.0.2:8000/"
            "#,
        )
        .unwrap();
        assert_eq!(config.radio.name_filter, "RAK4631");
        assert_eq!(config.collector.endpoint, "post");
        assert_eq!(config.collector.timeout_seconds, 10);
        assert_eq!(config.location.authorization, Authorization::NotDetermined);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_authorization_aliases() {
        let config: Config = toml::from_str(
            r#"
            [collector]
            base_url = "http://h/"
            [location]
            authorization = "always"
            latitude = 1.5
            longitude = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.location.authorization, Authorization::AuthorizedAlways);
        assert_eq!(config.location.latitude, Some(1.5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.collector.base_url = "ftp://x".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.location.latitude = Some(12.0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.location.latitude = Some(91.0);
        config.location.longitude = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let serialized = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(back.collector.url(), Config::default().collector.url());
        assert_eq!(back.location, Config::default().location);
        assert_eq!(back.logging.file.as_deref(), Some("clampa.log"));
    }
}
