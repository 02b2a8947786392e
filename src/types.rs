//! Basic type definitions for the relay
//!
//! Provides:
//! - `ConnectionId`: reactor token for one accepted socket
//! - `Shutdown`: process-wide stop flag observed by the event loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Token;

/// Connection identifier (newtype pattern)
///
/// Wraps the mio token the socket is registered under. Id `0` belongs to
/// the listening socket; accepted connections are numbered from `1` and
/// ids are never handed out twice by the same server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    /// Reserved id of the listening socket
    pub const LISTENER: ConnectionId = ConnectionId(0);

    /// First id handed to an accepted connection
    pub const FIRST: ConnectionId = ConnectionId(1);

    /// Return this id and advance `self` to the following one
    pub fn bump(&mut self) -> Self {
        let current = *self;
        self.0 += 1;
        current
    }

    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shutdown flag shared between the entry point and the event loop
///
/// Cloning yields another handle to the same flag. The event loop checks it
/// once per wake-up, so a trigger takes effect within one poll timeout.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the event loop to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_is_monotonic() {
        let mut next = ConnectionId::FIRST;
        let a = next.bump();
        let b = next.bump();
        assert_eq!(a, ConnectionId(1));
        assert_eq!(b, ConnectionId(2));
        assert_ne!(a, ConnectionId::LISTENER);
    }

    #[test]
    fn test_token_conversion() {
        let id = ConnectionId(42);
        assert_eq!(ConnectionId::from(id.token()), id);
    }

    #[test]
    fn test_shutdown_shared_between_clones() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(!shutdown.is_triggered());

        handle.trigger();

        assert!(shutdown.is_triggered());
    }
}
