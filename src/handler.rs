//! WebSocket connection handler
//!
//! Runs one accepted socket through the stage pipeline: WebSocket handshake,
//! then [`Stage::Authenticate`], then [`Stage::Broadcast`]. Outbound frames go
//! through an mpsc channel drained by a dedicated write task, so broadcasts
//! from other connections never touch this socket directly.

use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::auth::authenticate;
use crate::broadcast::relay;
use crate::connection::Connection;
use crate::error::{AppError, Result};
use crate::frame::to_message;
use crate::message::TransportEntity;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::session::ServerSecret;

/// Outbound frame buffer per connection
const FRAME_CHANNEL_SIZE: usize = 32;

/// State shared by every connection worker
#[derive(Debug)]
pub struct RelayContext {
    pub pool: Arc<ConnectionPool>,
    pub secret: ServerSecret,
}

/// Signal returned by each stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Hand the connection to the next stage
    Continue,
    /// Stop processing and close the connection
    Halt,
}

/// Processing stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    Broadcast,
}

/// The stage pipeline every connection runs
pub const PIPELINE: [Stage; 2] = [Stage::Authenticate, Stage::Broadcast];

/// Handle one accepted TCP connection on an already acquired pool slot
///
/// The slot is released when `connection` drops, whichever way this
/// function exits.
pub async fn handle_connection(
    stream: TcpStream,
    connection: PooledConnection,
    ctx: Arc<RelayContext>,
) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Channel for frames to this socket
    let (frame_tx, mut frame_rx) = mpsc::channel::<TransportEntity>(FRAME_CHANNEL_SIZE);
    connection.bind(peer_addr, frame_tx);
    info!("Connection {} bound to {}", connection.id(), peer_addr);

    // Spawn write task (TransportEntity -> WebSocket); ends once the slot
    // is released and every sender clone is gone
    let conn_id = connection.id();
    tokio::spawn(async move {
        while let Some(entity) = frame_rx.recv().await {
            match to_message(&entity) {
                Ok(message) => {
                    if ws_sender.send(message).await.is_err() {
                        debug!("WebSocket send failed, ending write task for {}", conn_id);
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                }
            }
        }
        debug!("Write task ended for {}", conn_id);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    let result = run_pipeline(&connection, &mut ws_receiver, &ctx).await;

    match &result {
        Ok(()) => info!("Connection {} closed", connection.id()),
        Err(AppError::ConnectionClosed) => {
            info!("Connection {} disconnected", connection.id());
        }
        Err(AppError::AuthMismatch { username }) => {
            warn!(
                "Connection {} dropped: bad session key for '{}'",
                connection.id(),
                username
            );
        }
        Err(e) => error!("Connection {} failed: {}", connection.id(), e),
    }

    drop(connection);
    debug!("Pool after release: {:?}", ctx.pool.stats());

    match result {
        Err(AppError::ConnectionClosed) | Err(AppError::AuthMismatch { .. }) => Ok(()),
        other => other,
    }
}

/// Run [`PIPELINE`] until a stage halts or fails
pub async fn run_pipeline<S>(
    connection: &Connection,
    stream: &mut S,
    ctx: &RelayContext,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    for stage in PIPELINE {
        let outcome = match stage {
            Stage::Authenticate => authenticate(connection, stream, &ctx.secret).await?,
            Stage::Broadcast => relay(connection, stream, &ctx.pool, &ctx.secret).await?,
        };

        if outcome == StageOutcome::Halt {
            debug!("Connection {} halted in {:?}", connection.id(), stage);
            break;
        }
    }
    Ok(())
}
