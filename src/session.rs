//! Per-connection session state and the table of connected sessions

use crate::protocol::Value;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Identifies a session; the remote address of its connection
pub type SessionId = String;

/// Default number of values a session's outbound queue holds before
/// publishers start skipping it
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Server-side state for one connected client
///
/// Everything destined for the client, replies and pub/sub pushes alike,
/// goes through `outbound` so it reaches the socket in production order.
/// The queue is bounded: the session's own replies wait for room, pub/sub
/// pushes from other sessions are dropped when it is full.
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<Value>,
    subscriptions: HashSet<Bytes>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, outbound: mpsc::Sender<Value>) -> Self {
        Self {
            id: id.into(),
            outbound,
            subscriptions: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a value for the client, waiting for room.
    /// Returns false once the writer is gone.
    pub async fn push(&self, value: Value) -> bool {
        self.outbound.send(value).await.is_ok()
    }

    /// Resolves once the writer side has shut down
    pub async fn closed(&self) {
        self.outbound.closed().await
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Value> {
        self.outbound.clone()
    }

    pub fn subscriptions(&self) -> &HashSet<Bytes> {
        &self.subscriptions
    }

    pub(crate) fn subscriptions_mut(&mut self) -> &mut HashSet<Bytes> {
        &mut self.subscriptions
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }
}

/// Table of every connected session
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, Instant>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(id.to_string(), Instant::now());
    }

    /// Remove a session, returning how long it was connected
    pub async fn deregister(&self, id: &str) -> Option<Duration> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(id).map(|since| since.elapsed())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_after_writer_dropped() {
        let (tx, rx) = mpsc::channel(DEFAULT_OUTBOUND_CAPACITY);
        let session = Session::new("127.0.0.1:5000", tx);
        assert!(session.push(Value::ok()).await);
        drop(rx);
        assert!(!session.push(Value::ok()).await);
    }

    #[tokio::test]
    async fn test_session_table() {
        let table = SessionTable::new();
        table.register("a").await;
        table.register("b").await;
        assert_eq!(table.len().await, 2);

        assert!(table.deregister("a").await.is_some());
        assert!(table.deregister("a").await.is_none());
        assert_eq!(table.len().await, 1);
    }
}
