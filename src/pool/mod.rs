//! Session-affine backend connection pool.
//!
//! The pool keeps at most one backend connection per [`PoolKey`]:
//! - a connection is checked out by exactly one request at a time, a second
//!   concurrent checkout fails fast with [`ServerError::SessionInUse`]
//! - checking a connection back in arms an idle timer, checking it out again
//!   cancels the timer
//! - a timer only ever closes the entry it was armed for, and only while that
//!   entry is still checked in and has not been re-armed since
//!
//! Concurrent first use of a new key dials one connection per caller; the
//! first one published wins and the others are closed.

mod key;

pub use key::PoolKey;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument};

use crate::backend::{escape_identifier, BackendConnection, BackendDialer};
use crate::error::{BackendError, ServerError};

type SharedConnection = Arc<AsyncMutex<Box<dyn BackendConnection>>>;
type ConnectionGuard = OwnedMutexGuard<Box<dyn BackendConnection>>;

/// Counters exposed on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub total_connections: usize,
    pub checked_out: usize,
    pub idle_timeout_ms: u64,
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    dialer: Arc<dyn BackendDialer>,
    entries: RwLock<HashMap<PoolKey, Arc<PoolEntry>>>,
    idle_timeout: Duration,
}

struct PoolEntry {
    key: PoolKey,
    conn: SharedConnection,
    state: Mutex<EntryState>,
}

/// Checkout bookkeeping, locked separately from the connection.
#[derive(Default)]
struct EntryState {
    /// Bumped on every checkout, check-in and eviction.
    generation: u64,
    idle_timer: Option<AbortHandle>,
    /// Set once the entry has left the map.
    evicted: bool,
}

impl EntryState {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

impl ConnectionPool {
    pub fn new(dialer: Arc<dyn BackendDialer>, idle_timeout: Duration) -> Self {
        info!(
            idle_timeout_ms = idle_timeout.as_millis() as u64,
            "connection pool initialized"
        );
        Self {
            shared: Arc::new(PoolShared {
                dialer,
                entries: RwLock::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    /// Check out the connection for `key`, dialing one if none exists.
    #[instrument(skip(self), fields(session_id = %key.session_id()))]
    pub async fn acquire(&self, key: PoolKey) -> Result<PooledConnection, ServerError> {
        loop {
            if let Some(conn) = self.shared.checkout(&key)? {
                return Ok(conn);
            }

            let conn = self.shared.dial(&key).await?;
            let spare = {
                let mut entries = self.shared.entries.write().unwrap_or_else(|p| p.into_inner());
                match entries.entry(key.clone()) {
                    Entry::Occupied(_) => Some(conn),
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::new(PoolEntry::new(key.clone(), conn)));
                        None
                    }
                }
            };
            if let Some(mut spare) = spare {
                debug!("lost first-dial race, closing redundant connection");
                spare.close().await;
            }
        }
    }

    /// Drop the entry for `key` and close its connection. Absent keys are a
    /// no-op; a checked-out connection is closed when its holder releases it.
    #[instrument(skip(self), fields(session_id = %key.session_id()))]
    pub async fn close(&self, key: &PoolKey) {
        let removed = self
            .shared
            .entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        let Some(entry) = removed else {
            return;
        };

        let guard = {
            let mut state = entry.state.lock().unwrap_or_else(|p| p.into_inner());
            state.cancel_timer();
            state.evicted = true;
            entry.conn.clone().try_lock_owned().ok()
        };
        match guard {
            Some(guard) => {
                close_connection(guard).await;
                debug!("closed session connection");
            }
            None => debug!("connection checked out, closing on release"),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let entries = self.shared.entries.read().unwrap_or_else(|p| p.into_inner());
        PoolSnapshot {
            total_connections: entries.len(),
            checked_out: entries
                .values()
                .filter(|entry| entry.conn.try_lock().is_err())
                .count(),
            idle_timeout_ms: self.shared.idle_timeout.as_millis() as u64,
        }
    }
}

impl PoolShared {
    fn checkout(self: &Arc<Self>, key: &PoolKey) -> Result<Option<PooledConnection>, ServerError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };

        let mut state = entry.state.lock().unwrap_or_else(|p| p.into_inner());
        match entry.conn.clone().try_lock_owned() {
            Ok(guard) => {
                state.cancel_timer();
                Ok(Some(PooledConnection {
                    entry: entry.clone(),
                    pool: Arc::downgrade(self),
                    guard: Some(guard),
                }))
            }
            Err(_) => Err(ServerError::SessionInUse(key.session_id().to_string())),
        }
    }

    async fn dial(&self, key: &PoolKey) -> Result<Box<dyn BackendConnection>, BackendError> {
        let mut conn = self.dialer.dial(key.username(), key.secret()).await?;
        if !key.database().is_empty() {
            let select_db = format!("USE {}", escape_identifier(key.database()));
            if let Err(err) = conn.execute(&select_db, 1).await {
                conn.close().await;
                return Err(err);
            }
        }
        debug!(database = key.database(), "dialed new session connection");
        Ok(conn)
    }

    /// Check a connection back in and arm its idle timer.
    fn release(self: &Arc<Self>, entry: &Arc<PoolEntry>, guard: ConnectionGuard) {
        let mut state = entry.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.evicted {
            drop(state);
            spawn_close(guard);
            return;
        }

        state.cancel_timer();
        let generation = state.generation;
        let pool = Arc::downgrade(self);
        let target = Arc::downgrade(entry);
        let idle_timeout = self.idle_timeout;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let timer = runtime.spawn(async move {
                tokio::time::sleep(idle_timeout).await;
                if let (Some(pool), Some(entry)) = (pool.upgrade(), target.upgrade()) {
                    pool.close_idle(&entry, generation).await;
                }
            });
            state.idle_timer = Some(timer.abort_handle());
        }
        drop(guard);
    }

    /// Evict `entry` if it is still the published, checked-in entry armed at
    /// `generation`.
    async fn close_idle(&self, entry: &Arc<PoolEntry>, generation: u64) {
        let guard = {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            let mut state = entry.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.generation != generation || state.evicted {
                return;
            }
            if !entries
                .get(&entry.key)
                .is_some_and(|current| Arc::ptr_eq(current, entry))
            {
                return;
            }
            let Ok(guard) = entry.conn.clone().try_lock_owned() else {
                return;
            };
            entries.remove(&entry.key);
            state.idle_timer = None;
            state.evicted = true;
            guard
        };

        info!(session_id = %entry.key.session_id(), "closing idle connection");
        close_connection(guard).await;
    }
}

impl PoolEntry {
    fn new(key: PoolKey, conn: Box<dyn BackendConnection>) -> Self {
        Self {
            key,
            conn: Arc::new(AsyncMutex::new(conn)),
            state: Mutex::new(EntryState::default()),
        }
    }
}

async fn close_connection(mut guard: ConnectionGuard) {
    guard.close().await;
}

fn spawn_close(guard: ConnectionGuard) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(close_connection(guard));
    }
}

/// Exclusive handle on a pooled connection. Dropping it checks the
/// connection back in.
pub struct PooledConnection {
    entry: Arc<PoolEntry>,
    pool: Weak<PoolShared>,
    guard: Option<ConnectionGuard>,
}

impl Deref for PooledConnection {
    type Target = dyn BackendConnection;

    fn deref(&self) -> &Self::Target {
        match &self.guard {
            Some(guard) => &***guard,
            None => unreachable!("guard is only taken on drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.guard {
            Some(guard) => &mut ***guard,
            None => unreachable!("guard is only taken on drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.release(&self.entry, guard),
            None => spawn_close(guard),
        }
    }
}
