//! Client connection worker
//!
//! Drives the protocol from the client side on a background task:
//! connect, send `Auth`, wait for the server-signed `Auth`, then queue every
//! inbound chat frame until suspended or the connection fails.
//!
//! State machine: `Idle → Connecting → Authenticating → Active → Terminated`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::frame::{read_frame, to_message, Inbound};
use crate::message::{Payload, TransportEntity};
use crate::session::{Session, GENERATED_KEY_LEN};
use crate::types::random_alphanumeric;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Failure observer callback
///
/// Called once per failure, after the worker has reset its state.
pub type FailureHandler = Box<dyn Fn(&AppError) + Send + Sync>;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Authenticating,
    Active,
    Terminated,
}

/// Write half and identity, guarded together so a send always stamps the
/// key that belongs to the socket it writes to
#[derive(Default)]
struct ClientIo {
    sink: Option<WsSink>,
    session: Session,
}

struct Shared {
    io: AsyncMutex<ClientIo>,
    inbox: Mutex<VecDeque<TransportEntity>>,
    running: AtomicBool,
    failed: AtomicBool,
    /// Bumped by every `start`, so a superseded task stops touching state
    generation: AtomicU64,
    state: watch::Sender<ClientState>,
    observers: Mutex<Vec<FailureHandler>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn keep_running(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.is_current(generation)
    }

    fn set_state(&self, state: ClientState) {
        debug!("Client state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Close the socket after a cooperative stop
    async fn stop(&self) {
        let mut io = self.io.lock().await;
        if let Some(mut sink) = io.sink.take() {
            let _ = sink.close().await;
        }
        drop(io);

        self.running.store(false, Ordering::SeqCst);
        self.set_state(ClientState::Terminated);
        info!("Client worker suspended");
    }

    /// Reset everything transient, then tell the observers
    async fn fail(&self, error: AppError) {
        self.failed.store(true, Ordering::SeqCst);
        *self.io.lock().await = ClientIo::default();
        self.inbox.lock().clear();
        self.running.store(false, Ordering::SeqCst);
        self.set_state(ClientState::Terminated);

        warn!("Client worker failed: {}", error);
        for observer in self.observers.lock().iter() {
            observer(&error);
        }
    }
}

/// Background connection to a chat server
///
/// Cheap to clone; clones share one worker.
#[derive(Clone)]
pub struct ChatClient {
    shared: Arc<Shared>,
}

impl ChatClient {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            shared: Arc::new(Shared {
                io: AsyncMutex::new(ClientIo::default()),
                inbox: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                state,
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a failure observer
    pub fn on_failure<F>(&self, handler: F)
    where
        F: Fn(&AppError) + Send + Sync + 'static,
    {
        self.shared.observers.lock().push(Box::new(handler));
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Current session; carries the server-issued key once active
    pub async fn session(&self) -> Session {
        self.shared.io.lock().await.session.clone()
    }

    /// Connect to `host:port` and authenticate as `session`'s username
    ///
    /// Returns `false` without doing anything if the worker is already
    /// running. Must be called from within a tokio runtime.
    pub fn start(&self, session: Session, host: &str, port: u16) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Client worker already running");
            return false;
        }

        self.shared.failed.store(false, Ordering::SeqCst);
        self.shared.inbox.lock().clear();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let shared = Arc::clone(&self.shared);
        let url = format!("ws://{}:{}", host, port);
        tokio::spawn(async move {
            let result = drive(&shared, generation, session, &url).await;

            if !shared.is_current(generation) {
                debug!("Superseded client worker exited");
                return;
            }
            match result {
                Ok(()) => shared.stop().await,
                Err(e) => shared.fail(e).await,
            }
        });
        true
    }

    /// Ask the worker to stop after its current read returns
    pub fn suspend(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Stamp `entity` with the current session key and write it
    pub async fn send(&self, mut entity: TransportEntity) -> Result<()> {
        if self.has_failed() {
            return Err(AppError::WorkerFailed);
        }

        let mut guard = self.shared.io.lock().await;
        let io = &mut *guard;
        let sink = io.sink.as_mut().ok_or(AppError::NotConnected)?;

        entity.session_key = io.session.session_key().map(str::to_string);
        sink.send(to_message(&entity)?).await?;
        Ok(())
    }

    /// Drain every queued chat frame, oldest first
    pub fn get_messages(&self) -> Vec<TransportEntity> {
        std::mem::take(&mut *self.shared.inbox.lock()).into()
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the worker task; `Ok` means it was suspended
///
/// Valid frames other than chat are ignored; undecodable ones fail the worker.
async fn drive(shared: &Shared, generation: u64, session: Session, url: &str) -> Result<()> {
    let username = session
        .username()
        .ok_or_else(|| AppError::InvalidArgument("session has no username".to_string()))?
        .to_string();

    shared.set_state(ClientState::Connecting);
    let (ws_stream, _) = connect_async(url).await?;
    let (mut sink, mut source) = ws_stream.split();
    info!("Connected to {}", url);

    shared.set_state(ClientState::Authenticating);
    // The server derives its own key; this one only fills the field
    let auth = TransportEntity::auth(username.clone())
        .with_session_key(random_alphanumeric(GENERATED_KEY_LEN));
    sink.send(to_message(&auth)?).await?;
    *shared.io.lock().await = ClientIo {
        sink: Some(sink),
        session,
    };

    let Some(session) = await_signed_auth(shared, generation, &mut source).await? else {
        return Ok(());
    };
    info!("Authenticated as '{}'", session.display_name());
    shared.io.lock().await.session = session;
    shared.set_state(ClientState::Active);

    while shared.keep_running(generation) {
        match read_frame(&mut source).await? {
            Inbound::Entity(entity) if entity.is_chat() => {
                shared.inbox.lock().push_back(entity);
            }
            Inbound::Entity(entity) => debug!("Ignoring {} frame", entity.kind()),
            Inbound::Malformed(reason) => return Err(AppError::Protocol(reason)),
        }
    }
    Ok(())
}

/// Discard valid frames until the server's `Auth` reply arrives
///
/// An undecodable frame is a failure. Returns `None` if the worker was suspended first.
async fn await_signed_auth(
    shared: &Shared,
    generation: u64,
    source: &mut WsSource,
) -> Result<Option<Session>> {
    while shared.keep_running(generation) {
        match read_frame(source).await? {
            Inbound::Entity(TransportEntity {
                session_key: Some(key),
                payload: Payload::Auth { username },
                ..
            }) => return Ok(Some(Session::authenticated(username, key))),
            Inbound::Entity(entity) => debug!("Discarding {} frame before auth", entity.kind()),
            Inbound::Malformed(reason) => return Err(AppError::Protocol(reason)),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn test_new_client_is_idle() {
        let client = ChatClient::new();
        assert_eq!(client.state(), ClientState::Idle);
        assert!(!client.is_running());
        assert!(!client.has_failed());
        assert!(client.get_messages().is_empty());
    }

    #[test]
    fn test_get_messages_drains_once() {
        let client = ChatClient::new();
        {
            let mut inbox = client.shared.inbox.lock();
            inbox.push_back(TransportEntity::chat("alice", "one"));
            inbox.push_back(TransportEntity::chat("alice", "two"));
        }

        let first = client.get_messages();
        let bodies: Vec<_> = first
            .iter()
            .map(|entity| match &entity.payload {
                Payload::ChatMessage { body, .. } => body.as_str(),
                _ => panic!("Wrong variant"),
            })
            .collect();
        assert_eq!(bodies, ["one", "two"]);

        assert!(client.get_messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_before_start_not_connected() {
        let client = ChatClient::new();
        let result = client.send(TransportEntity::chat("alice", "hi")).await;
        assert!(matches!(result, Err(AppError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_after_failure_rejected() {
        let client = ChatClient::new();
        client.shared.failed.store(true, Ordering::SeqCst);
        let result = client.send(TransportEntity::chat("alice", "hi")).await;
        assert!(matches!(result, Err(AppError::WorkerFailed)));
    }

    #[tokio::test]
    async fn test_connect_failure_notifies_observers_after_reset() {
        // Reserve a port, then free it so the connect is refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ChatClient::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observed = client.clone();
        client.on_failure(move |_| {
            let _ = tx.send((observed.state(), observed.is_running()));
        });

        assert!(client.start(Session::for_user("alice"), "127.0.0.1", port));

        let (state, running) = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ClientState::Terminated);
        assert!(!running);
        assert!(client.has_failed());
        assert!(client.session().await.username().is_none());
    }

    #[tokio::test]
    async fn test_start_without_username_fails() {
        let client = ChatClient::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on_failure(move |e| {
            let _ = tx.send(matches!(e, AppError::InvalidArgument(_)));
        });

        client.start(Session::new(), "127.0.0.1", 1);

        let invalid = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(invalid);
    }

    #[tokio::test]
    async fn test_start_is_noop_while_running() {
        let client = ChatClient::new();
        client.shared.running.store(true, Ordering::SeqCst);
        assert!(!client.start(Session::for_user("alice"), "127.0.0.1", 1));
        assert_eq!(client.state(), ClientState::Idle);
    }
}
