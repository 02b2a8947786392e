//! Server configuration
//!
//! `ServerConfig` carries every tunable of the relay. `ServerArgs` is the
//! clap front end used by the server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

/// Default listen port
pub const DEFAULT_PORT: u16 = 25565;

/// Default pending-accept backlog
pub const DEFAULT_BACKLOG: i32 = 128;

/// Default cap on bytes buffered without a line terminator
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Default cap on a display name, in bytes
pub const DEFAULT_MAX_NAME_LEN: usize = 63;

/// Default cap on bytes queued for a peer that is not reading
pub const DEFAULT_MAX_PENDING_OUTPUT: usize = 64 * 1024;

/// Default readiness wait, bounds how long a shutdown request goes unnoticed
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listening socket binds to
    pub addr: SocketAddr,
    /// Pending-accept backlog passed to listen(2)
    pub backlog: i32,
    /// Max unterminated bytes per connection
    pub max_line_len: usize,
    /// Max display name length in bytes
    pub max_name_len: usize,
    /// Max queued outbound bytes per connection
    pub max_pending_output: usize,
    /// Upper bound on one readiness wait
    pub poll_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            backlog: DEFAULT_BACKLOG,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Command line arguments of the server binary
#[derive(Parser, Debug)]
#[clap(author, version, about = "Line-oriented TCP chat relay")]
pub struct ServerArgs {
    /// IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: IpAddr,
    /// Port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Pending-accept backlog
    #[clap(short, long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: i32,
    /// Max bytes buffered per connection without a newline
    #[clap(long, default_value_t = DEFAULT_MAX_LINE_LEN)]
    pub max_line: usize,
    /// Readiness wait timeout in milliseconds
    #[clap(long, default_value_t = 1000)]
    pub poll_timeout_ms: u64,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            addr: SocketAddr::new(args.host, args.port),
            backlog: args.backlog,
            max_line_len: args.max_line,
            poll_timeout: Duration::from_millis(args.poll_timeout_ms),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.to_string(), "127.0.0.1:25565");
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_args_into_config() {
        let args = ServerArgs::parse_from(["chat_relay", "-H", "0.0.0.0", "-p", "4000", "-b", "16"]);
        let config = ServerConfig::from(args);
        assert_eq!(config.addr.to_string(), "0.0.0.0:4000");
        assert_eq!(config.backlog, 16);
        assert_eq!(config.max_line_len, DEFAULT_MAX_LINE_LEN);
    }
}
