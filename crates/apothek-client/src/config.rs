//! Engine configuration loaded from environment variables.
//!
//! All settings have defaults so the client can start with zero
//! configuration against a local development stack.

use std::time::Duration;

use apothek_shared::constants::{
    MESSAGE_PAGE_SIZE, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY,
};
use apothek_signal::SessionConfig;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the API server.
    /// Env: `APOTHEK_API_URL`
    /// Default: `http://127.0.0.1:8000/api`
    pub api_base_url: String,

    /// WebSocket URL of the signaling hub.
    /// Env: `APOTHEK_HUB_URL`
    /// Default: `ws://127.0.0.1:6001`
    pub hub_url: String,

    /// Messages fetched per backward-pagination page.
    /// Env: `APOTHEK_PAGE_SIZE`
    /// Default: `50`
    pub page_size: u32,

    /// First reconnect delay after the signaling channel drops.
    pub reconnect_initial_delay: Duration,

    /// Ceiling for the signaling reconnect backoff.
    pub reconnect_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            hub_url: "ws://127.0.0.1:6001".to_string(),
            page_size: MESSAGE_PAGE_SIZE,
            reconnect_initial_delay: RECONNECT_INITIAL_DELAY,
            reconnect_max_delay: RECONNECT_MAX_DELAY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("APOTHEK_API_URL") {
            config.api_base_url = url;
        }

        if let Ok(url) = std::env::var("APOTHEK_HUB_URL") {
            config.hub_url = url;
        }

        if let Ok(size) = std::env::var("APOTHEK_PAGE_SIZE") {
            if let Ok(parsed) = size.parse::<u32>() {
                config.page_size = parsed;
            } else {
                tracing::warn!(value = %size, "Invalid APOTHEK_PAGE_SIZE, using default");
            }
        }

        config
    }

    /// The signaling session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            hub_url: self.hub_url.clone(),
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, 50);
        assert!(config.hub_url.starts_with("ws://"));
    }
}
