//! Per-socket connection state
//!
//! A `Connection` owns the accepted stream, the inbound line framer and the
//! outbound queue of bytes the peer has not accepted yet.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::framer::LineFramer;
use crate::types::ConnectionId;

/// Registration state
///
/// Closed is terminal and represented by removing the connection from the
/// server, which drops the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Only `/username` is accepted
    Unregistered,
    /// Name claimed in the registry, chat lines are broadcast
    Registered { name: String },
}

/// Outcome of reading a readable socket
#[derive(Debug, Default)]
pub struct Inbound {
    /// Complete lines in arrival order
    pub lines: Vec<String>,
    /// Why the connection ends after these lines (EOF, read error, overflow)
    pub end: Option<AppError>,
    /// Read budget ran out before the socket would block
    pub more: bool,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    stream: TcpStream,
    framer: LineFramer,
    outbound: Vec<u8>,
    max_pending_output: usize,
    /// WRITABLE interest is currently registered
    write_armed: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr, config: &ServerConfig) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Unregistered,
            stream,
            framer: LineFramer::new(config.max_line_len),
            outbound: Vec::new(),
            max_pending_output: config.max_pending_output,
            write_armed: false,
        }
    }

    /// Registered name, if any
    pub fn display_name(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Registered { name } => Some(name),
            ConnectionState::Unregistered => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, ConnectionState::Registered { .. })
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Read at most `max_reads` chunks and frame everything received
    ///
    /// Lines completed before a terminal condition are always returned
    /// alongside it. With `more` set the socket may still hold data and no
    /// further readiness edge will announce it.
    pub fn receive(&mut self, scratch: &mut [u8], max_reads: usize) -> Inbound {
        let mut inbound = Inbound::default();
        let mut reads = 0;
        while inbound.end.is_none() {
            if reads == max_reads {
                inbound.more = true;
                break;
            }
            match self.stream.read(scratch) {
                Ok(0) => inbound.end = Some(AppError::PeerClosed),
                Ok(n) => {
                    reads += 1;
                    if let Err(e) = self.framer.feed(&scratch[..n], &mut inbound.lines) {
                        inbound.end = Some(e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => inbound.end = Some(e.into()),
            }
        }
        inbound
    }

    /// Queue bytes and push as much as the socket accepts
    ///
    /// Returns `true` when everything queued has been written. Fails when
    /// more than `max_pending_output` bytes are still queued afterwards.
    pub fn send(&mut self, bytes: &[u8]) -> Result<bool, AppError> {
        self.outbound.extend_from_slice(bytes);
        let drained = self.flush()?;
        if self.outbound.len() > self.max_pending_output {
            return Err(AppError::SlowConsumer {
                limit: self.max_pending_output,
            });
        }
        Ok(drained)
    }

    /// Write queued bytes until done or the socket would block
    ///
    /// Returns `true` when the queue is empty.
    pub fn flush(&mut self) -> Result<bool, AppError> {
        let mut written = 0;
        let result = loop {
            if written == self.outbound.len() {
                break Ok(true);
            }
            match self.stream.write(&self.outbound[written..]) {
                Ok(0) => break Err(AppError::WriteZero),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };
        self.outbound.drain(..written);
        result
    }

    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    pub fn write_armed(&self) -> bool {
        self.write_armed
    }

    pub fn set_write_armed(&mut self, armed: bool) {
        self.write_armed = armed;
    }
}
