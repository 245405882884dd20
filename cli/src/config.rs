//! Environment-driven configuration
//!
//! # Variables
//!
//! ```text
//! AGENT_DETECTOR_BACKEND_URL              # required, e.g. https://happy-otter-123.example.cloud
//! AGENT_DETECTOR_AUTH_TOKEN               # optional bearer token
//! AGENT_DETECTOR_AUTO_RECONNECT           # true/false (default: true)
//! AGENT_DETECTOR_RECONNECT_DELAY_MS       # initial reconnect delay (default: 1000)
//! AGENT_DETECTOR_MAX_RECONNECT_DELAY_MS   # backoff cap (default: 30000)
//! AGENT_DETECTOR_MAX_RECONNECT_ATTEMPTS   # 0 = unlimited (default: 10)
//! AGENT_DETECTOR_REQUEST_TIMEOUT_SECS     # HTTP call timeout (default: 30)
//! ```

use detector_link::{AuthProvider, ConnectionOptions, LinkTimeouts};
use std::str::FromStr;

use crate::error::{CLIError, Result};

pub const BACKEND_URL_VAR: &str = "AGENT_DETECTOR_BACKEND_URL";
pub const AUTH_TOKEN_VAR: &str = "AGENT_DETECTOR_AUTH_TOKEN";
pub const AUTO_RECONNECT_VAR: &str = "AGENT_DETECTOR_AUTO_RECONNECT";
pub const RECONNECT_DELAY_VAR: &str = "AGENT_DETECTOR_RECONNECT_DELAY_MS";
pub const MAX_RECONNECT_DELAY_VAR: &str = "AGENT_DETECTOR_MAX_RECONNECT_DELAY_MS";
pub const MAX_RECONNECT_ATTEMPTS_VAR: &str = "AGENT_DETECTOR_MAX_RECONNECT_ATTEMPTS";
pub const REQUEST_TIMEOUT_VAR: &str = "AGENT_DETECTOR_REQUEST_TIMEOUT_SECS";

/// Application configuration resolved at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Backend deployment URL
    pub backend_url: String,

    pub auth: AuthProvider,

    /// Reconnection behaviour of the sync socket
    pub connection: ConnectionOptions,

    pub timeouts: LinkTimeouts,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through `lookup`, so tests never touch the real
    /// environment.
    ///
    /// A missing or blank backend URL is fatal.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = lookup(BACKEND_URL_VAR)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                CLIError::ConfigurationError(format!("Missing {}", BACKEND_URL_VAR))
            })?;

        let auth = AuthProvider::from_optional(lookup(AUTH_TOKEN_VAR));

        let defaults = ConnectionOptions::default();
        let max_reconnect_attempts =
            match parse_var::<u32>(&lookup, MAX_RECONNECT_ATTEMPTS_VAR)? {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.max_reconnect_attempts,
            };
        let connection = ConnectionOptions::new()
            .with_auto_reconnect(
                parse_bool(&lookup, AUTO_RECONNECT_VAR)?.unwrap_or(defaults.auto_reconnect),
            )
            .with_reconnect_delay_ms(
                parse_var(&lookup, RECONNECT_DELAY_VAR)?.unwrap_or(defaults.reconnect_delay_ms),
            )
            .with_max_reconnect_delay_ms(
                parse_var(&lookup, MAX_RECONNECT_DELAY_VAR)?
                    .unwrap_or(defaults.max_reconnect_delay_ms),
            )
            .with_max_reconnect_attempts(max_reconnect_attempts);

        let mut timeouts = LinkTimeouts::builder();
        if let Some(secs) = parse_var::<u64>(&lookup, REQUEST_TIMEOUT_VAR)? {
            timeouts = timeouts.request_timeout_secs(secs);
        }

        Ok(Self {
            backend_url,
            auth,
            connection,
            timeouts: timeouts.build(),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).map(|v| v.trim().to_string()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v.parse::<T>().map(Some).map_err(|e| {
            CLIError::ConfigurationError(format!("Invalid {}='{}': {}", name, v, e))
        }),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<bool>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(CLIError::ConfigurationError(format!(
            "Invalid {}='{}': expected true or false",
            name, other
        ))),
    }
}
