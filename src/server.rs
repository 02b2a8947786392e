//! ChatServer event loop
//!
//! One thread owns everything: the listening socket, every connection and
//! the name registry. Each wake-up of the poller is dispatched in order:
//! accept on the listener, read/frame/handle on clients, flush on
//! writable clients. No locks are needed because nothing else touches
//! this state.
//!
//! Reads are bounded per wake-up. A connection that still had data when
//! its read budget ran out is kept on a backlog and read again on the next
//! turn, which then polls without blocking.
//!
//! Connections are destroyed through [`ChatServer::close`] only, which
//! deregisters from the poller, releases the name and drops the stream,
//! in that order. A connection that fails while being written to during a
//! broadcast is collected and closed after the pass, so the iteration
//! over the connection map is never disturbed.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::AppError;
use crate::handler::{self, Action};
use crate::message::{ClientMessage, ServerMessage};
use crate::poller::{MioPoller, Poller, Readiness};
use crate::registry::NameRegistry;
use crate::types::{ConnectionId, Shutdown};

/// Size of the buffer each read fills
const READ_CHUNK: usize = 4096;

/// Reads per connection before yielding to the other ready sockets
const MAX_READS_PER_WAKE: usize = 16;

/// The chat relay
///
/// Generic over the readiness mechanism; [`ChatServer::bind`] builds the
/// mio-backed server used by the binary.
pub struct ChatServer<P: Poller = MioPoller> {
    listener: TcpListener,
    poller: P,
    /// Live connections: present iff registered with the poller
    connections: HashMap<ConnectionId, Connection>,
    registry: NameRegistry,
    config: ServerConfig,
    next_id: ConnectionId,
    scratch: Box<[u8]>,
    /// Connections whose read budget ran out before the socket drained
    unread: Vec<ConnectionId>,
}

impl ChatServer<MioPoller> {
    /// Bind the listening socket and set up the poller
    ///
    /// Failure here is fatal: the caller reports it and exits.
    pub fn bind(config: ServerConfig) -> Result<Self, AppError> {
        let listener = listen(&config).map_err(|source| AppError::Bind {
            addr: config.addr,
            source,
        })?;
        let poller = MioPoller::new()?;
        Self::with_poller(listener, poller, config)
    }
}

impl<P: Poller> ChatServer<P> {
    /// Assemble a server from an already listening socket
    pub fn with_poller(
        mut listener: TcpListener,
        mut poller: P,
        config: ServerConfig,
    ) -> Result<Self, AppError> {
        poller.register(&mut listener, ConnectionId::LISTENER, Interest::READABLE)?;
        Ok(Self {
            listener,
            poller,
            connections: HashMap::new(),
            registry: NameRegistry::new(),
            config,
            next_id: ConnectionId::FIRST,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            unread: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Run the event loop until `shutdown` is triggered
    ///
    /// Only a failing poller ends the loop with an error. Either way every
    /// connection is closed before returning.
    pub fn run(&mut self, shutdown: &Shutdown) -> Result<(), AppError> {
        info!("ChatServer listening on {}", self.local_addr()?);

        let mut ready: Vec<Readiness> = Vec::new();
        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }
            if let Err(e) = self.turn(&mut ready, self.config.poll_timeout) {
                error!("Readiness wait failed: {}", e);
                break Err(AppError::Io(e));
            }
        };

        self.close_all();
        info!("ChatServer shutting down");
        result
    }

    /// Wait once and handle everything that became ready
    ///
    /// Does not block while connections are left on the read backlog.
    fn turn(&mut self, ready: &mut Vec<Readiness>, timeout: Duration) -> io::Result<()> {
        let timeout = if self.unread.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };
        self.poller.wait(ready, Some(timeout))?;

        let backlog = mem::take(&mut self.unread);
        for event in ready.iter().copied() {
            self.dispatch(event);
        }
        for id in backlog {
            // Already read again for a fresh event in this turn
            if !self.unread.contains(&id) {
                self.handle_readable(id);
            }
        }
        Ok(())
    }

    /// Handle one ready socket
    fn dispatch(&mut self, event: Readiness) {
        if event.id == ConnectionId::LISTENER {
            self.accept_pending();
            return;
        }
        // Closed earlier in this same wake-up
        if !self.connections.contains_key(&event.id) {
            return;
        }

        if event.readable || event.hangup || event.error {
            self.handle_readable(event.id);
        }
        if event.writable && self.connections.contains_key(&event.id) {
            self.handle_writable(event.id);
        }
    }

    /// Accept until the listener would block
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Start tracking an accepted stream
    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.bump();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }
        if let Err(e) = self.poller.register(&mut stream, id, Interest::READABLE) {
            warn!("Failed to register connection from {}: {}", peer, e);
            return;
        }

        info!("Client {} connected from {}", id, peer);
        self.connections
            .insert(id, Connection::new(id, stream, peer, &self.config));
        debug!("Total connections: {}", self.connections.len());
    }

    /// Read within budget, handle each resolved line in order, then act on
    /// whatever ended the read
    fn handle_readable(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let inbound = conn.receive(&mut self.scratch, MAX_READS_PER_WAKE);

        for line in inbound.lines {
            self.handle_line(id, &line);
            // Replying to the sender may have failed
            if !self.connections.contains_key(&id) {
                return;
            }
        }

        if let Some(reason) = inbound.end {
            self.close(id, &reason);
        } else if inbound.more && !self.unread.contains(&id) {
            self.unread.push(id);
        }
    }

    /// Continue a flush that previously would have blocked
    fn handle_writable(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let result = conn
            .flush()
            .and_then(|drained| update_interest(&mut self.poller, conn, drained));
        if let Err(e) = result {
            self.close(id, &e);
        }
    }

    fn handle_line(&mut self, id: ConnectionId, line: &str) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        debug!("Line from {}: {:?}", id, line);

        let msg = ClientMessage::parse(line);
        let action = handler::handle_message(
            &mut conn.state,
            &mut self.registry,
            msg,
            self.config.max_name_len,
        );

        match action {
            Action::Reply(reply) => self.reply(id, &reply),
            Action::Broadcast(chat) => self.broadcast(id, &chat),
            Action::Ignore => {}
        }
    }

    /// Send a line to one connection, closing it on failure
    fn reply(&mut self, id: ConnectionId, msg: &ServerMessage) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if let Err(e) = send_to(&mut self.poller, conn, &msg.to_bytes()) {
            self.close(id, &e);
        }
    }

    /// Fan a line out to every registered connection except the sender
    ///
    /// Failed targets are closed after the pass; the remaining targets still
    /// receive the line.
    fn broadcast(&mut self, sender: ConnectionId, msg: &ServerMessage) {
        let bytes = msg.to_bytes();
        let mut failed = Vec::new();

        for (&id, conn) in self.connections.iter_mut() {
            if id == sender || !conn.is_registered() {
                continue;
            }
            if let Err(e) = send_to(&mut self.poller, conn, &bytes) {
                failed.push((id, e));
            }
        }

        for (id, e) in failed {
            self.close(id, &e);
        }
    }

    /// Destroy a connection: deregister, release its name, close the socket
    ///
    /// Closing an id that is already gone does nothing.
    fn close(&mut self, id: ConnectionId, reason: &AppError) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };

        if let Err(e) = self.poller.deregister(conn.stream_mut()) {
            warn!("Failed to deregister {}: {}", id, e);
        }
        if let ConnectionState::Registered { name } = &conn.state {
            self.registry.release(name);
        }

        match reason {
            AppError::PeerClosed => info!("Client {} ({}) disconnected", id, conn.peer),
            other => info!("Client {} ({}) dropped: {}", id, conn.peer, other),
        }
        debug!(
            "Total connections: {}, registered names: {}",
            self.connections.len(),
            self.registry.len()
        );
    }

    fn close_all(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close(id, &AppError::PeerClosed);
        }
        if let Err(e) = self.poller.deregister(&mut self.listener) {
            debug!("Failed to deregister listener: {}", e);
        }
    }
}

/// Queue and flush bytes, keeping WRITABLE interest in step with the queue
fn send_to<P: Poller>(poller: &mut P, conn: &mut Connection, bytes: &[u8]) -> Result<(), AppError> {
    let drained = conn.send(bytes)?;
    update_interest(poller, conn, drained)
}

/// Arm WRITABLE while output is queued, disarm once drained
fn update_interest<P: Poller>(poller: &mut P, conn: &mut Connection, drained: bool) -> Result<(), AppError> {
    let want_write = !drained;
    if want_write == conn.write_armed() {
        return Ok(());
    }
    let interest = if want_write {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    let id = conn.id;
    poller.reregister(conn.stream_mut(), id, interest)?;
    conn.set_write_armed(want_write);
    Ok(())
}

/// Build the non-blocking listening socket with the configured backlog
fn listen(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(config.addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&config.addr.into())?;
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream as StdStream;
    use std::thread;
    use std::time::Instant;

    use socket2::SockRef;

    const TURN: Duration = Duration::from_millis(10);

    fn test_config() -> ServerConfig {
        ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            poll_timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let server = ChatServer::bind(test_config()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count(), 0);
        assert!(server.registry().is_empty());
    }

    #[test]
    fn test_bind_conflict_is_fatal_setup_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            addr: taken.local_addr().unwrap(),
            ..test_config()
        };

        let err = ChatServer::bind(config).err().unwrap();

        assert!(matches!(err, AppError::Bind { .. }));
    }

    #[test]
    fn test_run_returns_after_shutdown() {
        let mut server = ChatServer::bind(test_config()).unwrap();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        assert!(server.run(&shutdown).is_ok());
    }

    #[test]
    fn test_register_and_release_on_disconnect() {
        let mut server = ChatServer::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let stop = shutdown.clone();
        let handle = thread::spawn(move || {
            server.run(&stop).unwrap();
            server
        });

        let mut client = StdStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"/username alice\n").unwrap();
        let mut reader = BufReader::new(client.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "OK\n");

        drop(reader);
        drop(client);
        thread::sleep(Duration::from_millis(200));
        shutdown.trigger();
        let server = handle.join().unwrap();

        assert_eq!(server.connection_count(), 0);
        assert!(!server.registry().is_taken("alice"));
    }

    /// Pump the loop on this thread until `done` holds
    fn pump_until(
        server: &mut ChatServer,
        ready: &mut Vec<Readiness>,
        mut done: impl FnMut(&ChatServer) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&*server) {
            assert!(Instant::now() < deadline, "server never reached the state");
            server.turn(ready, TURN).unwrap();
        }
    }

    fn id_of(server: &ChatServer, name: &str) -> ConnectionId {
        server
            .connections
            .values()
            .find(|conn| conn.display_name() == Some(name))
            .map(|conn| conn.id)
            .unwrap()
    }

    /// Connect and register every name, consuming the `OK` replies
    fn connect_all(
        server: &mut ChatServer,
        ready: &mut Vec<Readiness>,
        names: &[&str],
    ) -> Vec<BufReader<StdStream>> {
        let addr = server.local_addr().unwrap();
        let mut clients = Vec::new();
        for name in names {
            let mut client = StdStream::connect(addr).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            client
                .write_all(format!("/username {}\n", name).as_bytes())
                .unwrap();
            clients.push(BufReader::new(client));
        }
        pump_until(server, ready, |s| s.registry().len() == names.len());

        for client in clients.iter_mut() {
            let mut line = String::new();
            client.read_line(&mut line).unwrap();
            assert_eq!(line, "OK\n");
        }
        clients
    }

    /// Read lines until `alice: done`
    fn collect_until_done(mut reader: BufReader<StdStream>) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut lines = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    panic!("closed before the last line");
                }
                if line == "alice: done\n" {
                    return lines;
                }
                lines.push(line);
            }
        })
    }

    #[test]
    fn test_slow_target_is_closed_while_broadcast_continues() {
        let mut server = ChatServer::bind(ServerConfig {
            max_pending_output: 8 * 1024,
            ..test_config()
        })
        .unwrap();
        let mut ready = Vec::new();
        let mut clients = connect_all(&mut server, &mut ready, &["alice", "bob", "carol", "dave"]);
        let dave = clients.pop().unwrap();
        let carol = clients.pop().unwrap();
        let bob = clients.pop().unwrap();

        let alice_id = id_of(&server, "alice");
        let carol_id = id_of(&server, "carol");
        let carol_conn = server.connections.get_mut(&carol_id).unwrap();
        SockRef::from(&*carol_conn.stream_mut())
            .set_send_buffer_size(4096)
            .unwrap();
        SockRef::from(carol.get_ref())
            .set_recv_buffer_size(4096)
            .unwrap();

        let bob_reader = collect_until_done(bob);
        let dave_reader = collect_until_done(dave);

        // carol never reads, so her queue eventually passes the cap
        let mut sent = Vec::new();
        for i in 0..2000 {
            let text = format!("{:04} {}", i, "x".repeat(1000));
            server.broadcast(
                alice_id,
                &ServerMessage::Chat {
                    from: "alice".into(),
                    text: text.clone(),
                },
            );
            sent.push(format!("alice: {}\n", text));
            server.turn(&mut ready, Duration::ZERO).unwrap();
            if !server.connections.contains_key(&carol_id) {
                break;
            }
        }
        assert!(!server.connections.contains_key(&carol_id));

        server.broadcast(
            alice_id,
            &ServerMessage::Chat {
                from: "alice".into(),
                text: "done".into(),
            },
        );
        pump_until(&mut server, &mut ready, |_| {
            bob_reader.is_finished() && dave_reader.is_finished()
        });

        assert_eq!(bob_reader.join().unwrap(), sent);
        assert_eq!(dave_reader.join().unwrap(), sent);

        assert_eq!(server.connection_count(), 3);
        assert_eq!(server.registry().len(), 3);
        assert!(!server.registry().is_taken("carol"));

        // A second close of the same id is a no-op
        server.close(carol_id, &AppError::PeerClosed);
        assert_eq!(server.connection_count(), 3);
        assert_eq!(server.registry().len(), 3);
        drop(carol);
    }

    #[test]
    fn test_lines_before_overflow_are_broadcast() {
        let mut server = ChatServer::bind(ServerConfig {
            max_line_len: 64,
            ..test_config()
        })
        .unwrap();
        let mut ready = Vec::new();
        let mut clients = connect_all(&mut server, &mut ready, &["alice", "bob"]);
        let mut bob = clients.pop().unwrap();
        let mut alice = clients.pop().unwrap();

        let mut flood = b"important\n".to_vec();
        flood.extend_from_slice(&[b'x'; 200]);
        alice.get_mut().write_all(&flood).unwrap();
        pump_until(&mut server, &mut ready, |s| s.connection_count() == 1);

        let mut line = String::new();
        bob.read_line(&mut line).unwrap();
        assert_eq!(line, "alice: important\n");
        assert!(!server.registry().is_taken("alice"));

        line.clear();
        assert_eq!(alice.read_line(&mut line).unwrap_or(0), 0);
    }

    #[test]
    fn test_read_budget_backlog_is_drained() {
        let mut server = ChatServer::bind(test_config()).unwrap();
        let mut ready = Vec::new();
        let mut clients = connect_all(&mut server, &mut ready, &["alice", "bob"]);
        let bob = clients.pop().unwrap();
        let mut alice = clients.pop().unwrap();

        // Far more than one wake-up's worth of reads
        let line = format!("{}\n", "y".repeat(500));
        let count = READ_CHUNK * MAX_READS_PER_WAKE * 2 / line.len();
        let writer = thread::spawn(move || {
            for _ in 0..count {
                alice.get_mut().write_all(line.as_bytes()).unwrap();
            }
            alice
        });

        let reader = thread::spawn(move || {
            let mut bob = bob;
            let mut received = 0;
            let mut buf = String::new();
            while received < count {
                buf.clear();
                assert!(bob.read_line(&mut buf).unwrap() > 0);
                received += 1;
            }
            received
        });

        pump_until(&mut server, &mut ready, |_| reader.is_finished());
        assert_eq!(reader.join().unwrap(), count);
        let _alice = writer.join().unwrap();
        assert_eq!(server.connection_count(), 2);
    }
}
