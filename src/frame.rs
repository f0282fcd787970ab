//! WebSocket framing for `TransportEntity`
//!
//! Shared by the server stages and the client worker. One text message
//! carries one frame; ping/pong are transport housekeeping and never surface
//! as frames.

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{AppError, Result};
use crate::message::TransportEntity;

/// One application-level frame read from the socket
#[derive(Debug)]
pub enum Inbound {
    /// Decoded frame
    Entity(TransportEntity),
    /// Data frame that is not a valid `TransportEntity`
    Malformed(String),
}

/// Read the next application-level frame
///
/// Returns `AppError::ConnectionClosed` on a close frame or end of stream.
pub async fn read_frame<S>(stream: &mut S) -> Result<Inbound>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let Some(message) = stream.next().await else {
            return Err(AppError::ConnectionClosed);
        };

        match message? {
            Message::Text(text) => {
                return Ok(match TransportEntity::decode(&text) {
                    Ok(entity) => Inbound::Entity(entity),
                    Err(e) => Inbound::Malformed(e.to_string()),
                });
            }
            Message::Binary(data) => {
                return Ok(Inbound::Malformed(format!("binary frame ({} bytes)", data.len())));
            }
            Message::Close(_) => return Err(AppError::ConnectionClosed),
            // Ping, Pong and raw frames
            _ => continue,
        }
    }
}

/// Encode a frame as a WebSocket text message
pub fn to_message(entity: &TransportEntity) -> Result<Message> {
    Ok(Message::Text(entity.encode()?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn ok(message: Message) -> std::result::Result<Message, tungstenite::Error> {
        Ok(message)
    }

    #[tokio::test]
    async fn test_skips_control_frames() {
        let auth = TransportEntity::auth("alice").encode().unwrap();
        let mut frames = stream::iter(vec![
            ok(Message::Ping(vec![1u8].into())),
            ok(Message::Pong(vec![1u8].into())),
            ok(Message::Text(auth.into())),
        ]);

        match read_frame(&mut frames).await.unwrap() {
            Inbound::Entity(entity) => assert!(entity.is_auth()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let mut frames = stream::iter(vec![ok(Message::Text("{not json".to_string().into()))]);
        assert!(matches!(
            read_frame(&mut frames).await.unwrap(),
            Inbound::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_binary_is_malformed() {
        let mut frames = stream::iter(vec![ok(Message::Binary(vec![0u8, 1, 2].into()))]);
        assert!(matches!(
            read_frame(&mut frames).await.unwrap(),
            Inbound::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_end_of_stream_is_closed() {
        let mut frames = stream::iter(Vec::<std::result::Result<Message, tungstenite::Error>>::new());
        assert!(matches!(
            read_frame(&mut frames).await,
            Err(AppError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_frame_is_closed() {
        let mut frames = stream::iter(vec![ok(Message::Close(None))]);
        assert!(matches!(
            read_frame(&mut frames).await,
            Err(AppError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_to_message_is_text() {
        let message = to_message(&TransportEntity::chat("a", "b")).unwrap();
        assert!(message.is_text());
    }
}
