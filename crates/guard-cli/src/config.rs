//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [defaults]
//! poll_interval_secs = 30
//! failure_threshold = 10
//!
//! [telegram]
//! enabled = true
//! bot_token = "123456:ABC-DEF"
//! chat_id = "987654321"
//!
//! [[site]]
//! name = "Marketing site"
//! url = "https://www.example.com"
//!
//! [[site]]
//! name = "Docs"
//! url = "https://docs.example.com"
//! keyword = "Documentation"
//! timeout_ms = 5000
//! ```
//!
//! Alternatively `sites_file = "sites.json"` points at the externally
//! maintained site list, re-read on every scheduling tick.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use guard_core::{GuardConfig, Site, TelegramConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Path of the notification-state file.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Externally maintained JSON site list; mutually exclusive with `site`.
    #[serde(default)]
    pub sites_file: Option<PathBuf>,

    #[serde(default)]
    pub site: Vec<Site>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            defaults: DefaultsConfig::default(),
            telegram: TelegramConfig::default(),
            state_file: default_state_file(),
            sites_file: None,
            site: Vec::new(),
        }
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from("notification_state.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    #[serde(default)]
    pub body_scan_limit: Option<usize>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            max_concurrent_probes: default_max_concurrent_probes(),
            body_scan_limit: None,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_max_concurrent_probes() -> usize {
    4
}

impl DefaultsConfig {
    pub fn to_guard_config(&self) -> GuardConfig {
        let mut config = GuardConfig::default()
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_failure_threshold(self.failure_threshold)
            .with_max_concurrent_probes(self.max_concurrent_probes);
        if let Some(limit) = self.body_scan_limit {
            config = config.with_body_scan_limit(limit);
        }
        config
    }
}

/// `TELEGRAM_FAILURE_THRESHOLD` overrides the configured threshold.
pub fn threshold_from_env() -> Option<u32> {
    std::env::var("TELEGRAM_FAILURE_THRESHOLD")
        .ok()
        .and_then(|v| parse_threshold(&v))
}

fn parse_threshold(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|t| *t >= 1)
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sites_file.is_some() && !self.site.is_empty() {
            return Err("Use either sites_file or [[site]] entries, not both".into());
        }

        for (i, site) in self.site.iter().enumerate() {
            if site.name.trim().is_empty() {
                return Err(format!("Site at index {} has an empty name", i));
            }
            let parsed = url::Url::parse(&site.url)
                .map_err(|e| format!("Invalid site URL '{}' at index {}: {}", site.url, i, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!(
                    "Site URL must use http or https: {}",
                    site.url
                ));
            }
        }

        let urls: Vec<&str> = self.site.iter().map(|s| s.url.as_str()).collect();
        let unique: std::collections::HashSet<&str> = urls.iter().copied().collect();
        if unique.len() != urls.len() {
            return Err("Duplicate site URLs in config".into());
        }

        if self.defaults.failure_threshold < 1 {
            return Err("failure_threshold must be >= 1".into());
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}
