//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;
pub const DEFAULT_SESSION_FILE: &str = ".datagenesis/session.json";

/// Per-endpoint-class HTTP timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub health: Duration,
    pub request: Duration,
    pub generation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            health: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            generation: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        }
    }
}

/// Duplex channel timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// `None` retries forever after abnormal closures.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin without the `/api` suffix.
    pub api_url: String,
    /// Duplex address prefix; the correlation id is appended as a path segment.
    pub ws_url: String,
    pub timeouts: Timeouts,
    pub connection: ConnectionSettings,
    pub guest_mode: bool,
    pub session_file: PathBuf,
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `DATAGENESIS_API_URL`: default `http://127.0.0.1:8000`
    /// - `DATAGENESIS_WS_URL`: derived from the API URL when absent
    /// - `DATAGENESIS_HEALTH_TIMEOUT_SECS`: default 5
    /// - `DATAGENESIS_REQUEST_TIMEOUT_SECS`: default 30
    /// - `DATAGENESIS_GENERATION_TIMEOUT_SECS`: default 120
    /// - `DATAGENESIS_HEARTBEAT_SECS`: default 30
    /// - `DATAGENESIS_RECONNECT_DELAY_SECS`: default 3
    /// - `DATAGENESIS_MAX_RECONNECTS`: unlimited when absent
    /// - `DATAGENESIS_GUEST`: default `true`
    /// - `DATAGENESIS_SESSION_FILE`: default `.datagenesis/session.json`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when a URL has an unsupported scheme.
    pub fn from_env() -> Result<Self, ClientError> {
        let api_url = std::env::var("DATAGENESIS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        let ws_url = std::env::var("DATAGENESIS_WS_URL").ok().filter(|s| !s.is_empty());
        let mut config = Self::new(&api_url, ws_url.as_deref())?;

        config.timeouts = Timeouts {
            health: Duration::from_secs(env_parse("DATAGENESIS_HEALTH_TIMEOUT_SECS", DEFAULT_HEALTH_TIMEOUT_SECS)),
            request: Duration::from_secs(env_parse("DATAGENESIS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
            generation: Duration::from_secs(env_parse(
                "DATAGENESIS_GENERATION_TIMEOUT_SECS",
                DEFAULT_GENERATION_TIMEOUT_SECS,
            )),
        };
        config.connection = ConnectionSettings {
            heartbeat_interval: Duration::from_secs(env_parse("DATAGENESIS_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)),
            reconnect_delay: Duration::from_secs(env_parse(
                "DATAGENESIS_RECONNECT_DELAY_SECS",
                DEFAULT_RECONNECT_DELAY_SECS,
            )),
            max_reconnect_attempts: std::env::var("DATAGENESIS_MAX_RECONNECTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok()),
        };
        config.guest_mode = std::env::var("DATAGENESIS_GUEST")
            .ok()
            .map_or(true, |v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"));
        if let Some(path) = std::env::var("DATAGENESIS_SESSION_FILE").ok().filter(|s| !s.is_empty()) {
            config.session_file = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Build config with defaults for everything except the endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when either URL has an unsupported scheme.
    pub fn new(api_url: &str, ws_url: Option<&str>) -> Result<Self, ClientError> {
        let api_url = api_url.trim_end_matches('/').to_owned();
        let ws_url = match ws_url {
            Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => url.trim_end_matches('/').to_owned(),
            Some(url) => return Err(ClientError::Config(format!("websocket URL must use ws:// or wss://: {url}"))),
            None => derive_ws_url(&api_url)?,
        };

        Ok(Self {
            api_url,
            ws_url,
            timeouts: Timeouts::default(),
            connection: ConnectionSettings::default(),
            guest_mode: true,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        })
    }

    /// Base path every HTTP endpoint hangs off.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}/api", self.api_url)
    }
}

fn derive_ws_url(api_url: &str) -> Result<String, ClientError> {
    if let Some(rest) = api_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = api_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }
    Err(ClientError::Config(format!("invalid API URL: {api_url}")))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
