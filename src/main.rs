//! Chat Relay Server - Entry Point
//!
//! Binds the listener, runs the reactor on a blocking thread and turns
//! Ctrl+C into a shutdown request.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, ServerArgs, ServerConfig, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = ServerConfig::from(ServerArgs::parse());

    // Setup failures end the process before the loop starts
    let mut server = match ChatServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    let mut reactor = {
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || server.run(&shutdown))
    };

    tokio::select! {
        result = &mut reactor => {
            // Loop ended on its own, only a poller failure does that
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            shutdown.trigger();
        }
    }

    // The reactor notices the flag within one poll timeout
    reactor.await??;
    info!("Server stopped gracefully");
    Ok(())
}
