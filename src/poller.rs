//! Readiness reactor interface
//!
//! The event loop only talks to the OS through [`Poller`]: register a
//! socket, wait for readiness, deregister before closing. [`MioPoller`] is
//! the implementation used in production (epoll, kqueue or IOCP depending
//! on the target).
//!
//! mio reports readiness edge-triggered. Callers must drain accept and read
//! until `WouldBlock` before waiting again.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll};
use tracing::trace;

use crate::types::ConnectionId;

/// Max events returned by a single wait
const EVENT_CAPACITY: usize = 256;

/// One ready socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub id: ConnectionId,
    pub readable: bool,
    pub writable: bool,
    /// Peer closed its write half, or both halves
    pub hangup: bool,
    pub error: bool,
}

/// Capability interface over the OS readiness mechanism
pub trait Poller {
    fn register<S>(&mut self, source: &mut S, id: ConnectionId, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized;

    fn reregister<S>(&mut self, source: &mut S, id: ConnectionId, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized;

    fn deregister<S>(&mut self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized;

    /// Block until a registered source is ready or `timeout` elapses
    ///
    /// `ready` is cleared first. A wait interrupted by a signal returns
    /// with an empty set.
    fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;
}

pub struct MioPoller {
    poll: Poll,
    events: Events,
}

impl MioPoller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
        })
    }
}

impl Poller for MioPoller {
    fn register<S>(&mut self, source: &mut S, id: ConnectionId, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, id.token(), interest)
    }

    fn reregister<S>(&mut self, source: &mut S, id: ConnectionId, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, id.token(), interest)
    }

    fn deregister<S>(&mut self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        ready.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(|event| Readiness {
            id: ConnectionId::from(event.token()),
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }));
        trace!("{} sockets ready", ready.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_wait_times_out_without_events() {
        let mut poller = MioPoller::new().unwrap();
        let mut ready = vec![Readiness {
            id: ConnectionId(9),
            readable: true,
            writable: false,
            hangup: false,
            error: false,
        }];

        poller
            .wait(&mut ready, Some(Duration::from_millis(10)))
            .unwrap();

        assert!(ready.is_empty());
    }

    #[test]
    fn test_readable_after_peer_writes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let mut stream = mio::net::TcpStream::from_std(accepted);

        let mut poller = MioPoller::new().unwrap();
        poller
            .register(&mut stream, ConnectionId(7), Interest::READABLE)
            .unwrap();
        peer.write_all(b"ping\n").unwrap();

        let mut ready = Vec::new();
        for _ in 0..50 {
            poller
                .wait(&mut ready, Some(Duration::from_millis(100)))
                .unwrap();
            if !ready.is_empty() {
                break;
            }
        }

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, ConnectionId(7));
        assert!(ready[0].readable);

        poller.deregister(&mut stream).unwrap();
    }
}
