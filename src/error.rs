//! Error types for the chat relay
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::ConnectionId;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;

/// Application-level errors
///
/// Per-connection errors (transport, protocol, authentication) are fatal to
/// the affected connection only. Configuration errors are fatal at startup.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Every pool slot is in use
    #[error("Connection pool exhausted ({max} connections in use)")]
    Capacity { max: usize },

    /// Released a connection that is not in use
    #[error("Connection {0} is not in use")]
    NotFound(ConnectionId),

    /// Rejected argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Startup configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Frame did not match what the current stage expects
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A chat frame carried a session key that does not belong to the sender
    #[error("Session key mismatch for '{username}'")]
    AuthMismatch { username: String },

    /// Peer closed the stream
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client worker has no open connection
    #[error("Not connected")]
    NotConnected,

    /// Client worker stopped after a failure
    #[error("Worker failed")]
    WorkerFailed,
}

/// Message send errors
///
/// Occurs when attempting to deliver frames through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Connection has no write channel bound
    #[error("Connection not bound")]
    Unbound,

    /// Connection has not completed the handshake
    #[error("Connection not authenticated")]
    Unauthenticated,

    /// Destination is not keeping up; the frame was dropped
    #[error("Channel full")]
    Full,
}
