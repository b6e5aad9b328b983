//! Connection lifecycle tracking.

use super::ServerTask;
use crate::queue::TaskQueue;
use crate::{Result, RpcError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type ConnectionId = u64;

/// Lifecycle of one client connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Reading requests and executing them.
    Active,
    /// No longer reading; the worker finishes its current task.
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Active, ConnectionState::Closing)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }

    /// Move to `next`, rejecting any transition other than the next step.
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(RpcError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct ConnectionEntry {
    peer: SocketAddr,
    state: ConnectionState,
    queue: Arc<TaskQueue<ServerTask>>,
}

struct TableInner {
    next_id: ConnectionId,
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

/// Live connections and their task queues.
///
/// Created by the accept loop and handed to each connection so it can
/// deregister itself; shutting the server down closes every queue through it.
#[derive(Clone)]
pub struct ConnectionTable {
    inner: Arc<Mutex<TableInner>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableInner {
                next_id: 1,
                entries: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an active connection and return its id.
    pub fn register(&self, peer: SocketAddr, queue: Arc<TaskQueue<ServerTask>>) -> ConnectionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            ConnectionEntry {
                peer,
                state: ConnectionState::Active,
                queue,
            },
        );
        id
    }

    /// Mark a connection as closing and shut its queue down.
    ///
    /// Returns the number of queued tasks discarded.
    pub fn begin_close(&self, id: ConnectionId) -> Result<usize> {
        let queue = {
            let mut inner = self.lock();
            let entry = inner
                .entries
                .get_mut(&id)
                .ok_or(RpcError::InvalidTransition {
                    from: "unregistered",
                    to: ConnectionState::Closing.as_str(),
                })?;
            entry.state.transition(ConnectionState::Closing)?;
            entry.queue.clone()
        };
        Ok(queue.shutdown())
    }

    /// Mark a closing connection closed and forget it.
    pub fn finish_close(&self, id: ConnectionId) -> Result<()> {
        let mut inner = self.lock();
        let mut entry = inner.entries.remove(&id).ok_or(RpcError::InvalidTransition {
            from: "unregistered",
            to: ConnectionState::Closed.as_str(),
        })?;
        if let Err(e) = entry.state.transition(ConnectionState::Closed) {
            inner.entries.insert(id, entry);
            return Err(e);
        }
        Ok(())
    }

    /// Close every active connection's queue. Returns the number of queued
    /// tasks discarded across all connections.
    pub fn close_all(&self) -> usize {
        let queues: Vec<Arc<TaskQueue<ServerTask>>> = {
            let mut inner = self.lock();
            inner
                .entries
                .values_mut()
                .filter_map(|entry| {
                    entry
                        .state
                        .transition(ConnectionState::Closing)
                        .ok()
                        .map(|_| entry.queue.clone())
                })
                .collect()
        };
        queues.iter().map(|queue| queue.shutdown()).sum()
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.lock().entries.get(&id).map(|entry| entry.state)
    }

    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.lock().entries.get(&id).map(|entry| entry.peer)
    }

    /// Number of registered connections, closing ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("connections", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_state_moves_forward_only() {
        let mut state = ConnectionState::Active;
        assert!(state.transition(ConnectionState::Closed).is_err());
        state.transition(ConnectionState::Closing).unwrap();
        assert!(state.transition(ConnectionState::Active).is_err());
        assert!(state.transition(ConnectionState::Closing).is_err());
        state.transition(ConnectionState::Closed).unwrap();
        assert!(state.transition(ConnectionState::Active).is_err());
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn test_table_lifecycle() {
        let table = ConnectionTable::new();
        let queue = Arc::new(TaskQueue::new());
        let id = table.register(peer(), queue.clone());
        assert_eq!(table.state(id), Some(ConnectionState::Active));
        assert_eq!(table.peer(id), Some(peer()));

        // Finishing before closing is rejected and keeps the entry
        assert!(table.finish_close(id).is_err());
        assert_eq!(table.len(), 1);

        queue
            .push(ServerTask {
                connection: id,
                request: Request::GetAlignment,
            })
            .unwrap();
        assert_eq!(table.begin_close(id).unwrap(), 1);
        assert!(!queue.is_running());
        assert_eq!(table.state(id), Some(ConnectionState::Closing));
        assert!(table.begin_close(id).is_err());

        table.finish_close(id).unwrap();
        assert!(table.is_empty());
        assert!(table.finish_close(id).is_err());
    }

    #[test]
    fn test_close_all_stops_every_queue() {
        let table = ConnectionTable::new();
        let queues: Vec<_> = (0..3).map(|_| Arc::new(TaskQueue::new())).collect();
        let ids: Vec<_> = queues
            .iter()
            .map(|queue| table.register(peer(), queue.clone()))
            .collect();
        assert_ne!(ids[0], ids[1]);

        table.close_all();
        assert!(queues.iter().all(|queue| !queue.is_running()));
        assert!(ids
            .iter()
            .all(|id| table.state(*id) == Some(ConnectionState::Closing)));
    }

    #[test]
    fn test_close_all_skips_connections_already_closing() {
        let table = ConnectionTable::new();
        let closing = Arc::new(TaskQueue::new());
        let active = Arc::new(TaskQueue::new());
        let closing_id = table.register(peer(), closing.clone());
        let active_id = table.register(peer(), active.clone());

        table.begin_close(closing_id).unwrap();
        for _ in 0..2 {
            let task = ServerTask {
                connection: active_id,
                request: Request::GetAlignment,
            };
            assert!(active.push(task).is_ok());
        }

        assert_eq!(table.close_all(), 2);
        assert_eq!(table.state(active_id), Some(ConnectionState::Closing));
        assert_eq!(table.state(closing_id), Some(ConnectionState::Closing));
        assert_eq!(table.close_all(), 0);
    }
}
