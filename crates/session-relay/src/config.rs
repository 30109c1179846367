//! Session relay configuration.
//!
//! Configuration is loaded from environment variables. None of the
//! settings are sensitive; everything is safe to log at startup.

use std::collections::HashMap;
use std::env;

use crate::errors::RelayError;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default grace period before a whiteboard-ended session force-closes
/// remaining connections, in seconds.
pub const DEFAULT_WHITEBOARD_END_GRACE_SECONDS: u64 = 3;

/// Default mailbox capacity for session actors.
pub const DEFAULT_SESSION_MAILBOX_CAPACITY: usize = 256;

/// Default outbound frame buffer per connection.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Session relay configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Grace period between a whiteboard-end notice and the forced close
    /// of remaining connections (default: 3 seconds).
    pub whiteboard_end_grace_seconds: u64,

    /// Session actor mailbox capacity (default: 256).
    pub session_mailbox_capacity: usize,

    /// Outbound frame buffer per connection (default: 64). A client that
    /// falls this far behind is disconnected rather than allowed to stall
    /// the session.
    pub connection_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, RelayError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let whiteboard_end_grace_seconds = parse_var(
            vars,
            "RELAY_WHITEBOARD_END_GRACE_SECONDS",
            DEFAULT_WHITEBOARD_END_GRACE_SECONDS,
        )?;

        let session_mailbox_capacity = parse_var(
            vars,
            "RELAY_SESSION_MAILBOX_CAPACITY",
            DEFAULT_SESSION_MAILBOX_CAPACITY,
        )?;
        if session_mailbox_capacity == 0 {
            return Err(RelayError::Config(
                "RELAY_SESSION_MAILBOX_CAPACITY must be at least 1".to_string(),
            ));
        }

        let connection_buffer =
            parse_var(vars, "RELAY_CONNECTION_BUFFER", DEFAULT_CONNECTION_BUFFER)?;
        if connection_buffer == 0 {
            return Err(RelayError::Config(
                "RELAY_CONNECTION_BUFFER must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            bind_address,
            whiteboard_end_grace_seconds,
            session_mailbox_capacity,
            connection_buffer,
        })
    }
}

/// Parse an optional numeric variable, failing loudly on garbage rather
/// than silently falling back to the default.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, RelayError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("{name} has invalid value: {raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.whiteboard_end_grace_seconds,
            DEFAULT_WHITEBOARD_END_GRACE_SECONDS
        );
        assert_eq!(
            config.session_mailbox_capacity,
            DEFAULT_SESSION_MAILBOX_CAPACITY
        );
        assert_eq!(config.connection_buffer, DEFAULT_CONNECTION_BUFFER);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "RELAY_BIND_ADDRESS".to_string(),
                "127.0.0.1:9090".to_string(),
            ),
            (
                "RELAY_WHITEBOARD_END_GRACE_SECONDS".to_string(),
                "10".to_string(),
            ),
            ("RELAY_SESSION_MAILBOX_CAPACITY".to_string(), "8".to_string()),
            ("RELAY_CONNECTION_BUFFER".to_string(), "4".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.whiteboard_end_grace_seconds, 10);
        assert_eq!(config.session_mailbox_capacity, 8);
        assert_eq!(config.connection_buffer, 4);
    }

    #[test]
    fn test_from_vars_rejects_unparseable_numbers() {
        let vars = HashMap::from([(
            "RELAY_WHITEBOARD_END_GRACE_SECONDS".to_string(),
            "soon".to_string(),
        )]);

        let err = Config::from_vars(&vars).expect_err("garbage value should fail");
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("RELAY_WHITEBOARD_END_GRACE_SECONDS"));
    }

    #[test]
    fn test_from_vars_rejects_zero_capacities() {
        let vars = HashMap::from([(
            "RELAY_SESSION_MAILBOX_CAPACITY".to_string(),
            "0".to_string(),
        )]);
        assert!(Config::from_vars(&vars).is_err());

        let vars = HashMap::from([("RELAY_CONNECTION_BUFFER".to_string(), "0".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }
}
