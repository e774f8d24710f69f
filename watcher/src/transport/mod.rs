//! Real-time event sources.
//!
//! A [`Transport`] owns one live session with the messaging platform. The
//! watcher drives it as an explicit loop: `connect`, then `next_event` until
//! shutdown or a fatal error, then `close`.
//!
//! Errors are split by [`TransportError::is_fatal`]. Fatal errors end the
//! session and the process; non-fatal ones describe a single bad payload and
//! are skipped.

pub mod gateway;
mod payload;

use async_trait::async_trait;
use thiserror::Error;

use crate::credential::Credential;
use crate::types::{Event, Identity};

pub use gateway::{GatewayConfig, GatewayTransport};

/// Errors reported by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The platform rejected the credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The connection could not be established or broke.
    #[error("network error: {0}")]
    Network(String),

    /// The opening handshake did not follow the protocol.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server closed the connection.
    #[error("connection closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// The server invalidated the session.
    #[error("session invalidated by server")]
    SessionInvalidated,

    /// The server asked the client to reconnect.
    #[error("server requested reconnect")]
    ReconnectRequested,

    /// The previous heartbeat was never acknowledged.
    #[error("heartbeat not acknowledged, connection is stale")]
    HeartbeatTimeout,

    /// A single payload had an unexpected shape.
    #[error("malformed {kind} payload: {message}")]
    Malformed { kind: String, message: String },
}

impl TransportError {
    /// Returns true if the session cannot continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

/// A source of inbound [`Event`]s over a persistent connection.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the session and returns the identity it is bound to.
    async fn connect(&mut self, credential: &Credential) -> Result<Identity, TransportError>;

    /// Waits for the next message event.
    ///
    /// Returns `Ok(None)` when the stream ended cleanly.
    async fn next_event(&mut self) -> Result<Option<Event>, TransportError>;

    /// Releases the session. Safe to call more than once.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_is_recoverable() {
        let malformed = TransportError::Malformed {
            kind: "MESSAGE_CREATE".to_string(),
            message: "missing field `author`".to_string(),
        };
        assert!(!malformed.is_fatal());

        assert!(TransportError::AuthFailed("bad token".to_string()).is_fatal());
        assert!(TransportError::SessionInvalidated.is_fatal());
        assert!(TransportError::HeartbeatTimeout.is_fatal());
        assert!(TransportError::Closed {
            code: 1000,
            reason: String::new()
        }
        .is_fatal());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed {
            code: 4004,
            reason: "Authentication failed.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connection closed (code 4004): Authentication failed."
        );

        let err = TransportError::Malformed {
            kind: "MESSAGE_CREATE".to_string(),
            message: "missing field `id`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed MESSAGE_CREATE payload: missing field `id`"
        );
    }
}
