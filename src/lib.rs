//! Pooled WebSocket Chat Relay Library
//!
//! A chat relay built with tokio-tungstenite: every authenticated client's
//! messages are fanned out to every other authenticated client.
//!
//! # Features
//! - Bounded connection pool with slot reuse
//! - Username handshake issuing an HMAC-SHA256 session key
//! - Session key check on every chat frame
//! - Best-effort broadcast to all authenticated connections
//! - Background client worker with a drainable inbox
//!
//! # Architecture
//! - `ChatServer` owns the listener and an explicit `ConnectionPool`
//! - Each accepted socket gets a pool slot and a worker task running the
//!   stage pipeline: authentication, then broadcast
//! - Outbound frames go through a per-connection mpsc channel and write task
//! - Broadcast iterates a pool snapshot, never holding the pool lock over I/O
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use relay_chat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> relay_chat::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let listener = TcpListener::bind(&config.bind_addr).await?;
//!     ChatServer::new(&config)?.run(listener).await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod message;
pub mod pool;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ClientState, FailureHandler};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{AppError, Result, SendError};
pub use handler::{handle_connection, RelayContext, Stage, StageOutcome};
pub use message::{Payload, TransportEntity};
pub use pool::{ConnectionPool, PoolStats, PooledConnection, DEFAULT_MAX_POOL_SIZE};
pub use server::ChatServer;
pub use session::{derive_session_key, ServerSecret, Session};
pub use types::ConnectionId;
