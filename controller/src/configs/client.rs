use std::{env, time::Duration};

use crate::error::{Result, SessionError};

const DEFAULT_SERVER: &str = "http://localhost:18000";
const DEFAULT_SILENCE_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const CHANNEL_PATH: &str = "/ws/train";

/// Where the compute service lives and how patient the client is with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the service, without a trailing slash.
    pub server_url: String,
    /// How long an open training channel may stay silent before the run is failed.
    pub channel_silence: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            channel_silence: Duration::from_secs(DEFAULT_SILENCE_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Reads the configuration from `SPLAT_SERVER`, `SPLAT_CHANNEL_SILENCE_SECS` and
    /// `SPLAT_CONNECT_TIMEOUT_SECS`, falling back to the defaults for unset variables.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable is set to something unusable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("SPLAT_SERVER") {
            let url = url.trim().trim_end_matches('/');
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SessionError::InvalidConfig(format!(
                    "SPLAT_SERVER must be an http(s) URL, got '{url}'"
                )));
            }
            config.server_url = url.to_string();
        }

        let secs = |key: &str| -> Result<Option<Duration>> {
            let Some(raw) = lookup(key) else {
                return Ok(None);
            };
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
                _ => Err(SessionError::InvalidConfig(format!(
                    "{key} must be a positive number of seconds, got '{raw}'"
                ))),
            }
        };

        if let Some(silence) = secs("SPLAT_CHANNEL_SILENCE_SECS")? {
            config.channel_silence = silence;
        }
        if let Some(timeout) = secs("SPLAT_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = timeout;
        }

        Ok(config)
    }

    /// The websocket URL of the training endpoint.
    pub fn channel_url(&self) -> String {
        let base = match self.server_url.split_once("://") {
            Some(("https", rest)) => format!("wss://{rest}"),
            Some((_, rest)) => format!("ws://{rest}"),
            None => format!("ws://{}", self.server_url),
        };
        format!("{base}{CHANNEL_PATH}")
    }
}
