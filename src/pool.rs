//! Bounded connection pool
//!
//! Keeps every `Connection` slot in exactly one of two maps, `free` or
//! `in_use`, under a single lock. Slots are created lazily and reused; the
//! pool never destroys them.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{AppError, Result};
use crate::types::ConnectionId;

/// Default maximum number of in-use connections
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

/// A slot plus the instant it entered its current map
#[derive(Debug)]
struct PoolEntry {
    connection: Arc<Connection>,
    since: Instant,
}

impl PoolEntry {
    fn now(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            since: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct PoolState {
    free: HashMap<ConnectionId, PoolEntry>,
    in_use: HashMap<ConnectionId, PoolEntry>,
    max_pool_size: usize,
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub in_use: usize,
    pub max: usize,
}

/// Bounded registry of connection slots
#[derive(Debug)]
pub struct ConnectionPool {
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Create an empty pool allowing `max_pool_size` concurrent connections
    pub fn new(max_pool_size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: HashMap::new(),
                in_use: HashMap::new(),
                max_pool_size,
            }),
        }
    }

    /// Take a slot for a new socket
    ///
    /// Reuses a free slot when one exists, otherwise creates one. Fails with
    /// `AppError::Capacity` without touching either map once `in_use` has
    /// reached the maximum.
    pub fn acquire(&self) -> Result<Arc<Connection>> {
        let mut state = self.state.lock();

        if state.in_use.len() >= state.max_pool_size {
            return Err(AppError::Capacity {
                max: state.max_pool_size,
            });
        }

        let reusable = state.free.keys().next().copied();
        let connection = match reusable.and_then(|id| state.free.remove(&id)) {
            Some(entry) => {
                debug!(
                    "Reusing connection {} (idle {:?})",
                    entry.connection.id(),
                    entry.since.elapsed()
                );
                entry.connection
            }
            None => {
                let connection = Arc::new(Connection::new());
                debug!("Created connection {}", connection.id());
                connection
            }
        };

        state
            .in_use
            .insert(connection.id(), PoolEntry::now(Arc::clone(&connection)));
        Ok(connection)
    }

    /// Return a slot to the free list
    ///
    /// Fails with `AppError::NotFound` if the slot is not in use, which
    /// catches double release.
    pub fn release(&self, connection: &Connection) -> Result<()> {
        let mut state = self.state.lock();

        let Some(entry) = state.in_use.remove(&connection.id()) else {
            return Err(AppError::NotFound(connection.id()));
        };

        debug!(
            "Released connection {} (in use {:?})",
            connection.id(),
            entry.since.elapsed()
        );
        entry.connection.reset();
        state
            .free
            .insert(connection.id(), PoolEntry::now(entry.connection));
        Ok(())
    }

    /// Acquire a slot wrapped in a guard that releases it on drop
    pub fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        let connection = self.acquire()?;
        Ok(PooledConnection {
            pool: Arc::clone(self),
            connection,
        })
    }

    /// Change the in-use bound
    ///
    /// Applies to the next `acquire`. Shrinking below the current occupancy
    /// evicts nothing.
    pub fn set_max_pool_size(&self, max_pool_size: usize) {
        self.state.lock().max_pool_size = max_pool_size;
    }

    pub fn max_pool_size(&self) -> usize {
        self.state.lock().max_pool_size
    }

    /// Snapshot of in-use slots
    ///
    /// The pool lock is dropped before returning, so callers may do I/O
    /// over the result while other tasks acquire and release.
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .in_use
            .values()
            .map(|entry| Arc::clone(&entry.connection))
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            free: state.free.len(),
            in_use: state.in_use.len(),
            max: state.max_pool_size,
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOL_SIZE)
    }
}

/// In-use slot that goes back to its pool when dropped
///
/// Release happens on every exit path of a connection worker, including
/// unwinding.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Arc<Connection>,
}

impl PooledConnection {
    /// Shared handle to the underlying slot
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release(&self.connection) {
            warn!("Failed to release connection: {}", e);
        }
    }
}
