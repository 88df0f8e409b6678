//! Process configuration
//!
//! Every setting is a long flag with an environment variable fallback. Parsing
//! fails before any network call when a value is missing or malformed.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{debug, info};

use crate::controller::LabelSelector;
use crate::device::{DeviceConfig, RetryPolicy, MAX_REQUEST_ATTEMPTS};
use crate::error::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the A10 device, e.g. https://a10.example.net
    #[arg(long, env = "A10_ADDRESS", value_parser = parse_base_url)]
    pub a10_address: String,

    /// Device API username
    #[arg(long, env = "A10_USERNAME", value_parser = parse_non_empty)]
    pub a10_username: String,

    /// Device API password
    #[arg(long, env = "A10_PASSWORD", value_parser = parse_non_empty, hide_env_values = true)]
    pub a10_password: String,

    /// AS number of the BGP router on the device
    #[arg(long, env = "A10_AS")]
    pub a10_as: u32,

    /// Remote AS number of managed neighbors
    #[arg(long, env = "A10_REMOTE_AS")]
    pub a10_remote_as: u32,

    /// Node label selector in the form key=value
    #[arg(long, env = "NODES_LABEL_SELECTOR", value_parser = parse_label_selector)]
    pub nodes_label_selector: LabelSelector,

    /// Per-request timeout for device calls, in seconds
    #[arg(long, env = "A10_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Delay before retrying a failed device call, in milliseconds
    #[arg(long, env = "A10_RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Interval for re-delivering every node as an update, in seconds (0 disables)
    #[arg(long, env = "NODES_RESYNC_INTERVAL_SECS", default_value_t = 600)]
    pub resync_interval_secs: u64,

    /// Enable debug logging; any non-empty DEBUG value other than "false" turns it on
    #[arg(long, env = "DEBUG", value_parser = parse_debug_flag)]
    pub debug: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            base_url: self.a10_address.clone(),
            username: self.a10_username.clone(),
            password: self.a10_password.clone(),
            local_as: self.a10_as,
            remote_as: self.a10_remote_as,
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            retry: RetryPolicy::new(
                MAX_REQUEST_ATTEMPTS,
                Duration::from_millis(self.retry_backoff_ms),
            ),
        }
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// Log the effective configuration; the password is never printed
    pub fn log(&self) {
        info!(
            a10_address = %self.a10_address,
            a10_username = %self.a10_username,
            a10_as = self.a10_as,
            remote_as = self.a10_remote_as,
            label_selector = %self.nodes_label_selector,
            "Inputs"
        );
        debug!(
            request_timeout_secs = self.request_timeout_secs,
            retry_backoff_ms = self.retry_backoff_ms,
            resync_interval_secs = self.resync_interval_secs,
            log_format = ?self.log_format,
            "Tuning"
        );
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("a10_address", &self.a10_address)
            .field("a10_username", &self.a10_username)
            .field("a10_password", &"<redacted>")
            .field("a10_as", &self.a10_as)
            .field("a10_remote_as", &self.a10_remote_as)
            .field("nodes_label_selector", &self.nodes_label_selector)
            .field("resync_interval_secs", &self.resync_interval_secs)
            .finish_non_exhaustive()
    }
}

fn parse_debug_flag(s: &str) -> Result<bool, Error> {
    let s = s.trim();
    Ok(!(s.is_empty() || s.eq_ignore_ascii_case("false")))
}

fn parse_label_selector(s: &str) -> Result<LabelSelector, Error> {
    s.parse()
}

fn parse_non_empty(s: &str) -> Result<String, Error> {
    if s.trim().is_empty() {
        return Err(Error::ConfigError("value must not be empty".to_string()));
    }
    Ok(s.to_string())
}

fn parse_base_url(s: &str) -> Result<String, Error> {
    let s = parse_non_empty(s)?;
    if !(s.starts_with("https://") || s.starts_with("http://")) {
        return Err(Error::ConfigError(format!(
            "device address {s:?} must start with https:// or http://"
        )));
    }
    Ok(s.trim_end_matches('/').to_string())
}
