//! Chat server accept loop
//!
//! Owns the listening socket. Each accepted socket either gets a pool slot
//! and its own worker task, or is closed on the spot when the pool is full.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::{handle_connection, RelayContext};
use crate::pool::ConnectionPool;
use crate::session::ServerSecret;

/// The chat relay server
///
/// Composition root for the pool and the session secret; both are shared
/// with every connection worker through a `RelayContext`.
pub struct ChatServer {
    ctx: Arc<RelayContext>,
}

impl ChatServer {
    /// Build a server from configuration
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let secret = config.server_secret()?;
        let pool = Arc::new(ConnectionPool::new(config.max_pool_size));
        Ok(Self::with_parts(pool, secret))
    }

    /// Build a server around an existing pool and secret
    pub fn with_parts(pool: Arc<ConnectionPool>, secret: ServerSecret) -> Self {
        Self {
            ctx: Arc::new(RelayContext { pool, secret }),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.ctx.pool
    }

    /// Run the accept loop forever
    ///
    /// Accept errors are logged and do not stop the loop.
    pub async fn run(self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("ChatServer listening on {}", addr),
            Err(_) => info!("ChatServer started"),
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.accept(stream, addr),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Take a pool slot for `stream` and spawn its worker
    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let connection = match self.ctx.pool.checkout() {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Rejecting {}: {}", addr, e);
                drop(stream);
                return;
            }
        };

        info!("New connection from {} on slot {}", addr, connection.id());
        debug!("Pool: {:?}", self.ctx.pool.stats());

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, connection, ctx).await {
                error!("Connection handler error for {}: {}", addr, e);
            }
        });
    }
}
