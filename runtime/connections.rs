/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Connection registry: supervises one broadcaster task per client.
//!
//! Owns:
//! - a map of live connections with their send frequency
//! - a parent [`CancellationToken`]; each connection gets a child token
//! - a [`JoinSet`] supervising the broadcaster tasks
//!
//! Cancelling one connection never touches another. [`ConnectionRegistry::shutdown`]
//! cancels the parent token and joins every task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returned to the transport when a connection is registered.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once the connection is closed, for any reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
struct Entry {
    frequency: Duration,
    cancel: CancellationToken,
}

pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Arc<Mutex<HashMap<ConnectionId, Entry>>>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Records a connection and spawns `run` for it on the current runtime.
    ///
    /// `run` receives the connection's own token and must return once it is
    /// cancelled. The entry is removed when `run` returns.
    ///
    /// # Panics
    ///
    /// Outside of a tokio runtime.
    pub(crate) fn register<F, Fut>(&self, frequency: Duration, run: F) -> ConnectionHandle
    where
        F: FnOnce(ConnectionId, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.cancel.child_token();
        self.entries.lock().insert(
            id,
            Entry {
                frequency,
                cancel: cancel.clone(),
            },
        );

        let entries = Arc::clone(&self.entries);
        let done = cancel.clone();
        let task = run(id, cancel.clone());
        let mut tasks = self.tasks.lock();
        // Drop the results of connections that already ended.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            task.await;
            entries.lock().remove(&id);
            done.cancel();
            log::debug!("connections: {id} released");
        });
        log::debug!(
            "connections: {id} registered at {frequency:?} ({} live)",
            self.entries.lock().len()
        );

        ConnectionHandle { id, cancel }
    }

    /// Cancels one connection. Returns `false` if it was not live.
    pub(crate) fn unregister(&self, id: ConnectionId) -> bool {
        match self.entries.lock().remove(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                log::debug!("connections: {id} unregistered");
                true
            }
            None => false,
        }
    }

    pub(crate) fn frequency(&self, id: ConnectionId) -> Option<Duration> {
        self.entries.lock().get(&id).map(|entry| entry.frequency)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Cancels every connection and waits for all broadcaster tasks.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        log::debug!(
            "connections: shutdown requested, joining {} tasks",
            tasks.len()
        );
        while tasks.join_next().await.is_some() {}
        self.entries.lock().clear();
        log::debug!("connections: all tasks joined");
    }
}
