//! Server configuration.

use pubsync_proto::Codec;
use std::net::SocketAddr;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,

    /// Frame encoding used on every connection
    pub codec: Codec,

    /// Reply with an `error` message to unknown or malformed inbound
    /// messages instead of dropping them
    pub strict: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            codec: Codec::Json,
            strict: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBSYNC_BIND`: listen address (default `127.0.0.1:3000`)
    /// - `PUBSYNC_CODEC`: `json` or `cbor`
    /// - `PUBSYNC_STRICT`: `true` or `false`
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("PUBSYNC_BIND") {
            config.bind = bind
                .parse()
                .map_err(|_| ConfigError::invalid("PUBSYNC_BIND", &bind))?;
        }

        if let Some(codec) = lookup("PUBSYNC_CODEC") {
            config.codec = codec
                .parse()
                .map_err(|_| ConfigError::invalid("PUBSYNC_CODEC", &codec))?;
        }

        if let Some(strict) = lookup("PUBSYNC_STRICT") {
            config.strict = match strict.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid("PUBSYNC_STRICT", &strict)),
            };
        }

        Ok(config)
    }
}

/// Errors for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unparsable
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
        }
    }
}
