//! Pooled connection slot
//!
//! A `Connection` is the unit the pool hands out. It owns the write channel
//! of one accepted socket (drained by that socket's writer task), the peer
//! address, and the `Session` established by the handshake.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::message::TransportEntity;
use crate::session::Session;
use crate::types::ConnectionId;

/// Per-socket state, cleared on release
#[derive(Debug, Default)]
struct Slot {
    /// Remote address of the bound socket
    peer_addr: Option<SocketAddr>,
    /// Server → socket frame channel
    sender: Option<mpsc::Sender<TransportEntity>>,
    /// Identity established by the handshake
    session: Session,
}

/// One pool slot
///
/// The ID survives reuse; everything else is reset when the slot returns to
/// the free list.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    slot: Mutex<Slot>,
}

impl Connection {
    /// Create an empty, unbound connection
    pub(crate) fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Attach an accepted socket's write channel
    pub fn bind(&self, peer_addr: SocketAddr, sender: mpsc::Sender<TransportEntity>) {
        let mut slot = self.slot.lock();
        slot.peer_addr = Some(peer_addr);
        slot.sender = Some(sender);
    }

    /// Install the session produced by a successful handshake
    pub fn authenticate(&self, session: Session) {
        self.slot.lock().session = session;
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.slot.lock().session.clone()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.slot.lock().peer_addr
    }

    pub fn is_authenticated(&self) -> bool {
        self.slot.lock().session.is_authenticated()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.lock().sender.is_some()
    }

    /// Queue a frame for this connection's socket
    ///
    /// The slot lock is released before awaiting channel capacity.
    pub async fn send(&self, entity: TransportEntity) -> Result<(), SendError> {
        let sender = self.slot.lock().sender.clone().ok_or(SendError::Unbound)?;
        sender
            .send(entity)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a relayed frame without waiting
    ///
    /// The session check and the enqueue happen under one slot lock, so a
    /// slot released and re-acquired since a pool snapshot is never handed a
    /// frame before its new socket authenticates. A full channel drops the
    /// frame for this destination only.
    pub fn try_deliver(&self, entity: TransportEntity) -> Result<(), SendError> {
        let slot = self.slot.lock();
        if !slot.session.is_authenticated() {
            return Err(SendError::Unauthenticated);
        }
        let sender = slot.sender.as_ref().ok_or(SendError::Unbound)?;
        sender.try_send(entity).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Clear socket and session fields
    pub(crate) fn reset(&self) {
        *self.slot.lock() = Slot::default();
    }
}
