//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.

use std::time::Duration;

/// Default HTTP/WebSocket listen address
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";

/// Default deadline for host-gated join requests, in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default guest capacity per room
const DEFAULT_MAX_GUESTS_PER_ROOM: usize = 50;

/// Default outbound queue depth per connection
const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address for the WebSocket endpoint
    /// Example: 0.0.0.0:3000
    pub http_addr: String,

    /// Optional TCP listen address for the framed transport.
    /// The TCP listener only starts when this is set.
    pub tcp_addr: Option<String>,

    /// Deadline for host-gated join requests
    pub request_timeout: Duration,

    /// Maximum guests per room (the host does not count)
    pub max_guests_per_room: usize,

    /// Outbound queue depth per connection
    pub channel_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Self {
        Self {
            http_addr: std::env::var("RELAY_HTTP_ADDR")
                .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string()),
            tcp_addr: std::env::var("RELAY_TCP_ADDR").ok(),
            request_timeout: Duration::from_secs(
                std::env::var("RELAY_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            max_guests_per_room: std::env::var("RELAY_MAX_GUESTS_PER_ROOM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_GUESTS_PER_ROOM),
            channel_buffer: std::env::var("RELAY_CHANNEL_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CHANNEL_BUFFER),
        }
    }

    /// Whether the framed-TCP transport is enabled
    pub fn has_tcp(&self) -> bool {
        self.tcp_addr.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            tcp_addr: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_guests_per_room: DEFAULT_MAX_GUESTS_PER_ROOM,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Config Struct Tests (no env var dependencies - thread safe)
    // ========================================================================

    #[test]
    fn test_default_values() {
        let config = Config::default();

        assert_eq!(config.http_addr, "0.0.0.0:3000");
        assert!(config.tcp_addr.is_none());
        assert!(!config.has_tcp());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_guests_per_room, 50);
        assert_eq!(config.channel_buffer, 64);
    }

    #[test]
    fn test_tcp_detection() {
        let config = Config {
            tcp_addr: Some("0.0.0.0:4000".to_string()),
            ..Config::default()
        };
        assert!(config.has_tcp());
    }
}
