//! Configuration management for debrid resolution and streaming

use crate::error::{DebridError, Result};
use crate::models::{FileState, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridConfig {
    /// Debrid providers, in the order they are consulted
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Seconds before a `Missing` record is re-checked (default: 24h)
    #[serde(default = "default_wait_after_missing")]
    pub wait_after_missing_secs: u64,

    /// Seconds before a `ProviderError` record is re-checked (default: 1h)
    #[serde(default = "default_wait_after_provider_error")]
    pub wait_after_provider_error_secs: u64,

    /// Seconds before a `NetworkError` record is re-checked (default: 1m)
    #[serde(default = "default_wait_after_network_error")]
    pub wait_after_network_error_secs: u64,

    /// Seconds before a `ClientError` record is re-checked (default: 24h)
    #[serde(default = "default_wait_after_client_error")]
    pub wait_after_client_error_secs: u64,

    /// Retries after a provider 5xx (default: 2)
    #[serde(default = "default_retries_on_provider_error")]
    pub retries_on_provider_error: usize,

    /// Fixed delay between retries in milliseconds (default: 500)
    #[serde(default = "default_delay_between_retries")]
    pub delay_between_retries_ms: u64,

    /// How long a failing provider is skipped, in seconds (default: 60)
    #[serde(default = "default_circuit_breaker_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,

    /// Connect timeout for all upstream calls in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for provider API calls in milliseconds (default: 15000)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Per-read timeout while streaming media, in seconds (default: 60)
    #[serde(default = "default_stream_read_timeout")]
    pub stream_read_timeout_secs: u64,

    /// JSON file the record store persists to; in-memory only when unset
    #[serde(default)]
    pub state_file: Option<String>,

    /// Address of the health/metrics endpoint (optional)
    #[serde(default)]
    pub health_address: Option<String>,

    /// Log level for the service binary (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Configuration for a single debrid provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderId,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API base URL; the provider's public API when unset
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Sliding-window rate limit for one provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Window size in milliseconds (default: 1000)
    #[serde(default = "default_rate_window")]
    pub window_ms: u64,

    /// Calls admitted per window (default: 5)
    #[serde(default = "default_rate_quota")]
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_rate_window(),
            max_requests: default_rate_quota(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl ProviderConfig {
    pub fn new(kind: ProviderId) -> Self {
        ProviderConfig {
            kind,
            enabled: true,
            base_url: None,
            api_key: None,
            username: None,
            password: None,
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn base_url_or_default(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            match self.kind {
                ProviderId::Premiumize => "https://www.premiumize.me/api",
                ProviderId::Easynews => "https://members.easynews.com",
            }
            .to_string()
        })
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0 {
            return Err(DebridError::ConfigError(format!(
                "provider {} rate_limit window_ms and max_requests must be greater than 0",
                self.kind
            )));
        }
        if let Some(base_url) = &self.base_url {
            let url = reqwest::Url::parse(base_url).map_err(|e| {
                DebridError::ConfigError(format!(
                    "provider {} base_url {} is invalid: {}",
                    self.kind, base_url, e
                ))
            })?;
            if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                return Err(DebridError::ConfigError(format!(
                    "provider {} base_url {} must be an http(s) URL",
                    self.kind, base_url
                )));
            }
        }
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match self.kind {
            ProviderId::Premiumize if blank(&self.api_key) => Err(DebridError::ConfigError(
                "premiumize requires an api_key".to_string(),
            )),
            ProviderId::Easynews if blank(&self.username) || blank(&self.password) => {
                Err(DebridError::ConfigError(
                    "easynews requires a username and password".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_wait_after_missing() -> u64 {
    24 * 3600
}

fn default_wait_after_provider_error() -> u64 {
    3600
}

fn default_wait_after_network_error() -> u64 {
    60
}

fn default_wait_after_client_error() -> u64 {
    24 * 3600
}

fn default_retries_on_provider_error() -> usize {
    2
}

fn default_delay_between_retries() -> u64 {
    500
}

fn default_circuit_breaker_cooldown() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_read_timeout() -> u64 {
    15_000
}

fn default_stream_read_timeout() -> u64 {
    60
}

fn default_rate_window() -> u64 {
    1_000
}

fn default_rate_quota() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DebridConfig {
    fn default() -> Self {
        DebridConfig {
            providers: Vec::new(),
            wait_after_missing_secs: default_wait_after_missing(),
            wait_after_provider_error_secs: default_wait_after_provider_error(),
            wait_after_network_error_secs: default_wait_after_network_error(),
            wait_after_client_error_secs: default_wait_after_client_error(),
            retries_on_provider_error: default_retries_on_provider_error(),
            delay_between_retries_ms: default_delay_between_retries(),
            circuit_breaker_cooldown_secs: default_circuit_breaker_cooldown(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            stream_read_timeout_secs: default_stream_read_timeout(),
            state_file: None,
            health_address: None,
            log_level: default_log_level(),
        }
    }
}

impl DebridConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(DebridConfig)` if loading and validation succeed
    /// * `Err(DebridError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            DebridError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: DebridConfig = serde_yaml::from_str(content).map_err(|e| {
            DebridError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - at least one provider, each kind at most once
    /// - every enabled provider has credentials and a positive rate limit
    /// - timeouts must be > 0
    /// - `health_address`, when set, is a socket address
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(DebridError::ConfigError(
                "at least one provider must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.kind) {
                return Err(DebridError::ConfigError(format!(
                    "provider {} is configured more than once",
                    provider.kind
                )));
            }
            provider.validate()?;
        }

        if let Some(address) = &self.health_address {
            address.parse::<SocketAddr>().map_err(|e| {
                DebridError::ConfigError(format!("invalid health_address {}: {}", address, e))
            })?;
        }

        if self.connect_timeout_ms == 0
            || self.read_timeout_ms == 0
            || self.stream_read_timeout_secs == 0
        {
            return Err(DebridError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// How long a record in `state` stays fresh; `None` means never stale by age
    pub fn wait_for(&self, state: FileState) -> Option<Duration> {
        let secs = match state {
            FileState::Cached => return None,
            FileState::Missing => self.wait_after_missing_secs,
            FileState::ProviderError => self.wait_after_provider_error_secs,
            FileState::NetworkError => self.wait_after_network_error_secs,
            FileState::ClientError => self.wait_after_client_error_secs,
        };
        Some(Duration::from_secs(secs))
    }

    pub fn delay_between_retries(&self) -> Duration {
        Duration::from_millis(self.delay_between_retries_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn premiumize() -> ProviderConfig {
        let mut provider = ProviderConfig::new(ProviderId::Premiumize);
        provider.api_key = Some("key".to_string());
        provider
    }

    fn easynews() -> ProviderConfig {
        let mut provider = ProviderConfig::new(ProviderId::Easynews);
        provider.username = Some("user".to_string());
        provider.password = Some("pass".to_string());
        provider
    }

    fn valid_config() -> DebridConfig {
        DebridConfig {
            providers: vec![premiumize(), easynews()],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = DebridConfig::default();
        assert_eq!(config.retries_on_provider_error, 2);
        assert_eq!(config.delay_between_retries(), Duration::from_millis(500));
        assert_eq!(config.stream_read_timeout(), Duration::from_secs(60));
        assert!(config.state_file.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_provider() {
        assert!(DebridConfig::default().validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_provider() {
        let mut config = valid_config();
        config.providers.push(premiumize());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_credentials() {
        let mut config = valid_config();
        config.providers[0].api_key = None;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.providers[1].password = Some("  ".to_string());
        assert!(config.validate().is_err());

        // Disabled providers are not checked
        let mut config = valid_config();
        config.providers[1].password = None;
        config.providers[1].enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_quota() {
        let mut config = valid_config();
        config.providers[0].rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_base_url() {
        let mut config = valid_config();
        config.providers[1].base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.providers[1].base_url = Some("mailto:user@example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.providers[1].base_url = Some("http://127.0.0.1:8080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_health_address() {
        let mut config = valid_config();
        config.health_address = Some("localhost".to_string());
        assert!(config.validate().is_err());

        config.health_address = Some("127.0.0.1:8081".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = valid_config();
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_for_states() {
        let config = valid_config();
        assert_eq!(config.wait_for(FileState::Cached), None);
        assert_eq!(
            config.wait_for(FileState::NetworkError),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            config.wait_for(FileState::Missing),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
providers:
  - kind: premiumize
    api_key: abc
    rate_limit:
      max_requests: 10
"#;
        let config = DebridConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert!(config.providers[0].enabled);
        assert_eq!(config.providers[0].rate_limit.max_requests, 10);
        assert_eq!(config.providers[0].rate_limit.window_ms, 1_000);
        assert_eq!(
            config.providers[0].base_url_or_default(),
            "https://www.premiumize.me/api"
        );
        assert_eq!(config.log_level, "info");
    }
}
