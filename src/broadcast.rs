//! Broadcast stage
//!
//! Steady-state loop of an authenticated connection: every chat frame with a
//! valid session key is stripped of that key and fanned out to all
//! authenticated connections in the pool, sender included.

use futures_util::Stream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{AppError, Result, SendError};
use crate::frame::{read_frame, Inbound};
use crate::handler::StageOutcome;
use crate::message::{Payload, TransportEntity};
use crate::pool::ConnectionPool;
use crate::session::ServerSecret;

/// Relay chat frames until the socket fails or a key check fails
///
/// Frames of any other kind, and undecodable frames, are logged and skipped.
pub async fn relay<S>(
    connection: &Connection,
    stream: &mut S,
    pool: &ConnectionPool,
    secret: &ServerSecret,
) -> Result<StageOutcome>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let entity = match read_frame(stream).await? {
            Inbound::Entity(entity) => entity,
            Inbound::Malformed(reason) => {
                warn!("Connection {} sent malformed frame: {}", connection.id(), reason);
                continue;
            }
        };

        let TransportEntity {
            timestamp,
            session_key,
            payload,
        } = entity;
        let body = match payload {
            Payload::ChatMessage { body, .. } => body,
            Payload::Auth { .. } => {
                warn!("Connection {} sent unexpected auth frame", connection.id());
                continue;
            }
        };

        let session = connection.session();
        let Some(username) = session.username() else {
            return Err(AppError::Protocol("chat on unauthenticated connection".to_string()));
        };

        let presented = session_key.as_deref().unwrap_or_default();
        if !secret.verify(username, presented) {
            warn!(
                "Connection {} presented a bad session key for '{}'",
                connection.id(),
                username
            );
            return Err(AppError::AuthMismatch {
                username: username.to_string(),
            });
        }

        let outgoing = TransportEntity {
            timestamp,
            session_key: None,
            payload: Payload::ChatMessage {
                sender_username: username.to_string(),
                body,
            },
        };
        let delivered = broadcast(pool, outgoing);
        debug!("Message from '{}' delivered to {} connections", username, delivered);
    }
}

/// Deliver one frame to every authenticated in-use connection
///
/// Walks a pool snapshot and enqueues without waiting, so a destination
/// that stops reading loses frames instead of stalling the sender. Failed
/// destinations are logged and skipped. Returns how many deliveries
/// succeeded.
pub fn broadcast(pool: &ConnectionPool, mut entity: TransportEntity) -> usize {
    entity.session_key = None;

    pool.active_connections()
        .iter()
        .filter(|connection| match connection.try_deliver(entity.clone()) {
            Ok(()) => true,
            Err(SendError::Unauthenticated) => false,
            Err(e) => {
                debug!("Skipping connection {}: {}", connection.id(), e);
                false
            }
        })
        .count()
}
