//! Session relay error types.
//!
//! Most client mistakes (unauthorized host ops, unknown targets, malformed
//! frames) are silently dropped at the point of handling and never surface
//! as an error value. `RelayError` covers the cases that do need to
//! propagate: startup failures, RNG failures, and the one admission error
//! that is reported to the client as an `error` frame.

use thiserror::Error;

/// Session relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error (bad env var, unparseable value).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A video-mode join arrived for a session with no host present.
    #[error("No host found for session: {0}")]
    NoHost(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The registry actor is gone (shutdown in progress).
    #[error("Registry unavailable")]
    RegistryUnavailable,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns a client-safe error message (no internal details).
    ///
    /// `NoHost` is the only variant the wire protocol ever reports to a
    /// client; its text is part of the protocol contract.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::NoHost(_) => "No host found for this session".to_string(),
            RelayError::SessionNotFound(_) => "Session not found".to_string(),
            RelayError::Config(_) | RelayError::RegistryUnavailable | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_host_client_message_matches_wire_contract() {
        let err = RelayError::NoHost("abc123def".to_string());
        assert_eq!(err.client_message(), "No host found for this session");
    }

    #[test]
    fn internal_details_do_not_leak_to_clients() {
        let err = RelayError::Internal("mpsc channel closed at session.rs:42".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert!(err.to_string().contains("mpsc channel closed"));

        let err = RelayError::Config("RELAY_BIND_ADDRESS unparseable".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }
}
