//! Client configuration
//!
//! This module contains the local configuration of the BTN client. The
//! server-advertised capabilities live in [`crate::protocol::BtnConfig`].

use crate::error::{BtnError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Main configuration for the BTN client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtnClientConfig {
    /// Application id issued by the BTN server
    pub app_id: String,

    /// Application secret issued by the BTN server
    pub app_secret: String,

    /// Bootstrap URL returning the server's `BtnConfig`
    pub config_url: String,

    /// Submit peer snapshots (rules are still fetched when disabled)
    #[serde(default = "default_true")]
    pub submit: bool,

    /// Rule cache file, mirrored from the last successful rule fetch
    #[serde(default)]
    pub cache_file: Option<PathBuf>,

    /// How often the server config is refetched, in seconds
    #[serde(default = "default_config_refresh_interval")]
    pub config_refresh_interval_secs: u64,

    /// How often the rule document is checked, in seconds
    #[serde(default = "default_rule_interval")]
    pub rule_interval_secs: u64,

    /// How often peer snapshots are submitted, in seconds
    #[serde(default = "default_submit_interval")]
    pub submit_interval_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// HTTP configuration
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Read timeout in seconds
    pub read_timeout: u64,

    /// Maximum redirects to follow
    pub max_redirects: usize,

    /// Attempts per request, including the first one
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,

    /// Whether to accept invalid TLS certificates (dangerous!)
    pub accept_invalid_certs: bool,

    /// Proxy URL (e.g., "http://proxy:8080" or "socks5://proxy:1080")
    pub proxy_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_config_refresh_interval() -> u64 {
    3600
}

fn default_rule_interval() -> u64 {
    600
}

fn default_submit_interval() -> u64 {
    300
}

impl Default for BtnClientConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            config_url: String::new(),
            submit: true,
            cache_file: None,
            config_refresh_interval_secs: default_config_refresh_interval(),
            rule_interval_secs: default_rule_interval(),
            submit_interval_secs: default_submit_interval(),
            user_agent: format!("btn-core/{}", env!("CARGO_PKG_VERSION")),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            read_timeout: 30,
            max_redirects: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            accept_invalid_certs: false,
            proxy_url: None,
        }
    }
}

impl BtnClientConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application credentials
    pub fn credentials(mut self, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.app_secret = app_secret.into();
        self
    }

    /// Set the bootstrap config URL
    pub fn config_url(mut self, url: impl Into<String>) -> Self {
        self.config_url = url.into();
        self
    }

    /// Enable or disable peer submission
    pub fn submit(mut self, enabled: bool) -> Self {
        self.submit = enabled;
        self
    }

    /// Set the rule cache file
    pub fn cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    /// Set the rule check interval
    pub fn rule_interval(mut self, interval: Duration) -> Self {
        self.rule_interval_secs = interval.as_secs();
        self
    }

    /// Set the submission interval
    pub fn submit_interval(mut self, interval: Duration) -> Self {
        self.submit_interval_secs = interval.as_secs();
        self
    }

    /// Set the config refresh interval
    pub fn config_refresh_interval(mut self, interval: Duration) -> Self {
        self.config_refresh_interval_secs = interval.as_secs();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(BtnError::invalid_input("app_id", "Must not be empty"));
        }

        if self.app_secret.trim().is_empty() {
            return Err(BtnError::invalid_input("app_secret", "Must not be empty"));
        }

        Url::parse(&self.config_url).map_err(|e| {
            BtnError::invalid_input("config_url", format!("Invalid URL {}: {}", self.config_url, e))
        })?;

        for (field, value) in [
            ("config_refresh_interval_secs", self.config_refresh_interval_secs),
            ("rule_interval_secs", self.rule_interval_secs),
            ("submit_interval_secs", self.submit_interval_secs),
        ] {
            if value == 0 {
                return Err(BtnError::invalid_input(field, "Must be at least 1"));
            }
        }

        if self.http.max_retries == 0 {
            return Err(BtnError::invalid_input("max_retries", "Must be at least 1"));
        }

        Ok(())
    }

    /// Get the cache file path, using default if not set
    pub fn get_cache_file(&self) -> PathBuf {
        self.cache_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("btn-core")
                .join("btn-rule.json")
        })
    }
}
