//! Authentication stage
//!
//! Turns an anonymous socket into an authenticated connection. The first
//! `Auth` frame wins; the key is always derived server-side from the
//! username, and whatever key the client put on the frame is ignored.

use futures_util::Stream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{AppError, Result};
use crate::frame::{read_frame, Inbound};
use crate::handler::StageOutcome;
use crate::message::{Payload, TransportEntity};
use crate::session::{ServerSecret, Session};

/// Non-`Auth` frames tolerated before the handshake is abandoned
pub const MAX_MALFORMED_FRAMES: usize = 10;

/// Run the handshake on a bound connection
///
/// Returns `Continue` once the session is installed and the signed `Auth`
/// reply is queued, or `Halt` after `MAX_MALFORMED_FRAMES` rejected frames.
/// No frame is read past the last tolerated one.
pub async fn authenticate<S>(
    connection: &Connection,
    stream: &mut S,
    secret: &ServerSecret,
) -> Result<StageOutcome>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let mut malformed = 0;

    while malformed < MAX_MALFORMED_FRAMES {
        let username = match read_frame(stream).await? {
            Inbound::Entity(TransportEntity {
                payload: Payload::Auth { username },
                ..
            }) => username,
            Inbound::Entity(entity) => {
                debug!(
                    "Connection {} sent {} before auth",
                    connection.id(),
                    entity.kind()
                );
                malformed += 1;
                continue;
            }
            Inbound::Malformed(reason) => {
                debug!("Connection {} sent malformed frame: {}", connection.id(), reason);
                malformed += 1;
                continue;
            }
        };

        let session_key = secret.derive_key(&username);
        connection.authenticate(Session::authenticated(username.clone(), session_key.clone()));

        let reply = TransportEntity::auth(username.clone()).with_session_key(session_key);
        connection
            .send(reply)
            .await
            .map_err(|_| AppError::ChannelSend)?;

        info!("Connection {} authenticated as '{}'", connection.id(), username);
        return Ok(StageOutcome::Continue);
    }

    warn!(
        "Connection {} abandoned handshake after {} malformed frames",
        connection.id(),
        malformed
    );
    Ok(StageOutcome::Halt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::sync::mpsc;

    type Frame = std::result::Result<Message, tungstenite::Error>;

    fn text(entity: &TransportEntity) -> Frame {
        Ok(Message::Text(entity.encode().unwrap().into()))
    }

    fn bound_connection() -> (Connection, mpsc::Receiver<TransportEntity>) {
        let connection = Connection::new();
        let (tx, rx) = mpsc::channel(8);
        connection.bind("127.0.0.1:9000".parse().unwrap(), tx);
        (connection, rx)
    }

    #[tokio::test]
    async fn test_auth_installs_server_derived_key() {
        let (connection, mut rx) = bound_connection();
        let secret = ServerSecret::new("S1").unwrap();
        let client_frame = TransportEntity::auth("alice").with_session_key("client-temp-key");
        let mut frames = stream::iter(vec![text(&client_frame)]);

        let outcome = authenticate(&connection, &mut frames, &secret).await.unwrap();

        assert_eq!(outcome, StageOutcome::Continue);
        let expected = secret.derive_key("alice");
        let session = connection.session();
        assert_eq!(session.username(), Some("alice"));
        assert_eq!(session.session_key(), Some(expected.as_str()));

        let reply = rx.recv().await.unwrap();
        assert!(reply.is_auth());
        assert_eq!(reply.session_key.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_chat_before_auth_is_discarded() {
        let (connection, mut rx) = bound_connection();
        let secret = ServerSecret::new("S1").unwrap();
        let mut frames = stream::iter(vec![
            text(&TransportEntity::chat("alice", "too early")),
            Ok(Message::Text("garbage".to_string().into())),
            text(&TransportEntity::auth("alice")),
        ]);

        let outcome = authenticate(&connection, &mut frames, &secret).await.unwrap();

        assert_eq!(outcome, StageOutcome::Continue);
        // Only the auth reply was written
        assert!(rx.recv().await.unwrap().is_auth());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abandons_after_ten_malformed_frames() {
        let (connection, mut rx) = bound_connection();
        let secret = ServerSecret::new("S1").unwrap();
        let mut frames: Vec<Frame> = (0..MAX_MALFORMED_FRAMES)
            .map(|i| text(&TransportEntity::chat("mallory", format!("junk {}", i))))
            .collect();
        frames.push(text(&TransportEntity::auth("mallory")));
        let mut frames = stream::iter(frames);

        let outcome = authenticate(&connection, &mut frames, &secret).await.unwrap();

        assert_eq!(outcome, StageOutcome::Halt);
        assert!(!connection.is_authenticated());
        assert!(rx.try_recv().is_err());

        // The 11th frame is still unread
        let remaining: Vec<Frame> = futures_util::StreamExt::collect(frames).await;
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_stream_is_error() {
        let (connection, _rx) = bound_connection();
        let secret = ServerSecret::new("S1").unwrap();
        let mut frames = stream::iter(vec![text(&TransportEntity::chat("a", "b"))]);

        let result = authenticate(&connection, &mut frames, &secret).await;

        assert!(matches!(result, Err(AppError::ConnectionClosed)));
        assert!(!connection.is_authenticated());
    }
}
