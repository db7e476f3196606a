//! Service configuration (env-driven).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nettools_capture::DEFAULT_CAPTURE_LIMIT;

use crate::proxy::{ProxyOptions, DEFAULT_DIAL_TIMEOUT};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Log output format on stderr.
    pub log_format: LogFormat,

    /// Interface proxy listeners bind on.
    pub bind_ip: IpAddr,

    /// Forward host used when a start request omits one.
    pub default_forward_host: String,

    /// Capture budget used when a start request omits one.
    pub default_capture_limit: usize,

    /// Timeout for dialing a forward target.
    pub dial_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            default_forward_host: "localhost".to_string(),
            default_capture_limit: DEFAULT_CAPTURE_LIMIT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let log_level = lookup("NETTOOLS_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_format = match lookup("NETTOOLS_LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => bail!("NETTOOLS_LOG_FORMAT must be 'json' or 'text', got '{other}'."),
        };

        let bind_ip = lookup("NETTOOLS_BIND_HOST")
            .map(|v| v.parse::<IpAddr>())
            .transpose()
            .context("NETTOOLS_BIND_HOST must be an IP address.")?
            .unwrap_or(defaults.bind_ip);

        let default_forward_host = lookup("NETTOOLS_DEFAULT_FORWARD_HOST")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.default_forward_host);

        let default_capture_limit: usize = lookup("NETTOOLS_DEFAULT_CAPTURE_LIMIT")
            .map(|v| v.parse())
            .transpose()
            .context("NETTOOLS_DEFAULT_CAPTURE_LIMIT must be an integer (bytes).")?
            .unwrap_or(defaults.default_capture_limit);
        if default_capture_limit == 0 {
            bail!("NETTOOLS_DEFAULT_CAPTURE_LIMIT must be greater than zero.");
        }

        let dial_timeout = lookup("NETTOOLS_DIAL_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("NETTOOLS_DIAL_TIMEOUT_MS must be an integer (milliseconds).")?
            .map(|ms| Duration::from_millis(ms.max(50)))
            .unwrap_or(defaults.dial_timeout);

        Ok(Self {
            log_level,
            log_format,
            bind_ip,
            default_forward_host,
            default_capture_limit,
            dial_timeout,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            bind_ip: self.bind_ip,
            dial_timeout: self.dial_timeout,
        }
    }
}
