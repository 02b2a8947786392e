//! Error types for the chat relay
//!
//! Defines application-level errors.
//! Uses thiserror for ergonomic error definitions.

use std::net::SocketAddr;

use thiserror::Error;

/// Application-level errors
///
/// Covers setup failures (process exits), transport failures (one
/// connection is torn down) and protocol outcomes (reply to the client).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a socket or the poller
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listening socket could not be set up (fatal)
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Peer sent end-of-stream
    #[error("Connection closed by peer")]
    PeerClosed,

    /// Peer accepted zero bytes on a write
    #[error("Peer stopped accepting data")]
    WriteZero,

    /// Too many bytes buffered without a line terminator
    #[error("Line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    /// Too many bytes queued for a peer that is not reading
    #[error("Outbound queue exceeds {limit} bytes")]
    SlowConsumer { limit: usize },

    /// Username is claimed by another connection
    #[error("Username already in use: {0}")]
    NameConflict(String),

    /// Username is empty or too long
    #[error("Invalid username")]
    InvalidName,

    /// Registration attempted on a registered connection
    #[error("Already registered")]
    AlreadyRegistered,

    /// Chat line sent before registration
    #[error("Username required")]
    NotRegistered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = AppError::NameConflict("alice".into());
        assert_eq!(err.to_string(), "Username already in use: alice");
    }
}
