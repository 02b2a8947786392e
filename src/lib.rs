//! Line-oriented TCP Chat Relay Library
//!
//! Clients connect over TCP, claim a unique display name with
//! `/username <name>`, and every line they send afterwards is relayed to
//! all other registered clients as `<name>: <line>`.
//!
//! # Features
//! - Newline framing tolerant of arbitrary split points
//! - Name registration with duplicate arbitration and retry
//! - Broadcast fan-out with per-connection partial-write queues
//! - Disconnect and failed-write cleanup that frees the name
//! - Bounded buffers for peers that never send a newline or never read
//!
//! # Architecture
//! A single-threaded reactor:
//! - `ChatServer` owns the listener, all connections and the name registry
//! - `Poller` is the readiness interface, implemented on mio
//! - No locks needed - all state is touched from the one loop thread
//!
//! # Example
//! ```no_run
//! use chat_relay::{ChatServer, ServerConfig, Shutdown};
//!
//! fn main() -> Result<(), chat_relay::AppError> {
//!     let mut server = ChatServer::bind(ServerConfig::default())?;
//!     let shutdown = Shutdown::new();
//!     server.run(&shutdown)
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod handler;
pub mod message;
pub mod poller;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{ServerArgs, ServerConfig};
pub use connection::{Connection, ConnectionState, Inbound};
pub use error::AppError;
pub use framer::LineFramer;
pub use handler::{handle_message, Action};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use poller::{MioPoller, Poller, Readiness};
pub use registry::NameRegistry;
pub use server::ChatServer;
pub use types::{ConnectionId, Shutdown};
