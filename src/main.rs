//! Pooled WebSocket Chat Relay - Entry Point
//!
//! Loads configuration, binds the listener and runs the accept loop.

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_chat::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=relay_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay_chat=info")),
        )
        .init();

    // Bind address from the command line, pool size and secret from the environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let server = ChatServer::new(&config)?;
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(
        "Chat relay listening on {} (max {} connections)",
        config.bind_addr, config.max_pool_size
    );

    server.run(listener).await;
    Ok(())
}
