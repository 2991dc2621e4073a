//! Scripted transport for deterministic tests.
//!
//! [`MockTransport`] plays back a script of [`MockOpen`] outcomes, one per
//! `open()` call, and records every interaction in a shared [`Journal`] so
//! tests can assert on ordering across transport and subscribers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tether_core::ConnectionId;
use tokio::sync::broadcast;

use crate::connection::{CloseSignal, Connection, ConnectionRef, Transport};
use crate::error::TransportError;

/// Ordered log of interactions shared between mocks.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Number of entries starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Outcome of one scripted `open()` call.
#[derive(Clone, Debug)]
pub enum MockOpen {
    /// Return a connected [`MockConnection`].
    Succeed,
    /// Fail with a connect error carrying this reason.
    Fail(String),
    /// Wait, then apply the inner outcome.
    Delay(Duration, Box<MockOpen>),
}

impl MockOpen {
    /// Convenience: wrap an outcome with a delay.
    pub fn delayed(delay: Duration, inner: MockOpen) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Transport that plays back scripted outcomes. Unscripted calls succeed.
pub struct MockTransport {
    script: Mutex<VecDeque<MockOpen>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    journal: Journal,
}

impl MockTransport {
    /// Transport whose every `open()` succeeds.
    pub fn new(journal: Journal) -> Self {
        Self::with_script(journal, Vec::new())
    }

    /// Transport that plays `script` in order, then succeeds.
    pub fn with_script(journal: Journal, script: Vec<MockOpen>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connections: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Number of `open()` calls so far.
    pub fn open_count(&self) -> usize {
        self.journal.count_prefix("open:")
    }

    /// Connections handed out so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    /// Most recently opened connection.
    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, hostname: &str) -> Result<ConnectionRef, TransportError> {
        self.journal.record(format!("open:{hostname}"));
        let mut outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(MockOpen::Succeed);

        loop {
            match outcome {
                MockOpen::Succeed => {
                    let conn = Arc::new(MockConnection::new(hostname, self.journal.clone()));
                    self.connections.lock().push(Arc::clone(&conn));
                    return Ok(conn);
                }
                MockOpen::Fail(reason) => {
                    return Err(TransportError::Connect {
                        target: hostname.to_string(),
                        reason,
                    });
                }
                MockOpen::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
            }
        }
    }
}

/// Connection handed out by [`MockTransport`].
pub struct MockConnection {
    id: ConnectionId,
    hostname: String,
    connected: AtomicBool,
    close_signal: CloseSignal,
    inbound: broadcast::Sender<Arc<str>>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    journal: Journal,
}

impl MockConnection {
    fn new(hostname: &str, journal: Journal) -> Self {
        let (inbound, _) = broadcast::channel(64);
        Self {
            id: ConnectionId::new(),
            hostname: hostname.to_string(),
            connected: AtomicBool::new(true),
            close_signal: CloseSignal::new(),
            inbound,
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            journal,
        }
    }

    /// Hostname this connection was opened for.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Simulate the remote dropping the link.
    pub fn drop_remote(&self) {
        self.connected.store(false, Ordering::Release);
        if self.close_signal.link_dropped() {
            self.journal.record(format!("remote_close:{}", self.hostname));
        }
    }

    /// Simulate the link going stale without a close notification.
    pub fn go_stale(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Deliver an inbound frame to subscribers.
    pub fn push_inbound(&self, frame: &str) {
        let _ = self.inbound.send(Arc::from(frame));
    }

    /// Frames sent through [`Connection::send_text`].
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Number of local `close()` calls.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.close_signal.mark_local();
        self.connected.store(false, Ordering::Release);
        let _ = self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.journal.record(format!("close:{}", self.hostname));
    }

    fn on_unsolicited_close(&self) -> BoxFuture<'static, ()> {
        self.close_signal.wait()
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<str>> {
        self.inbound.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_open_succeeds() {
        let journal = Journal::new();
        let transport = MockTransport::new(journal.clone());

        let conn = transport.open("chat.example.com").await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(journal.entries(), vec!["open:chat.example.com"]);
    }

    #[tokio::test]
    async fn script_plays_in_order() {
        let transport = MockTransport::with_script(
            Journal::new(),
            vec![MockOpen::Fail("refused".into()), MockOpen::Succeed],
        );

        let first = transport.open("h").await;
        assert!(matches!(first, Err(TransportError::Connect { .. })));
        assert!(transport.open("h").await.is_ok());
        assert_eq!(transport.connections().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_waits_before_outcome() {
        let transport = MockTransport::with_script(
            Journal::new(),
            vec![MockOpen::delayed(Duration::from_secs(5), MockOpen::Succeed)],
        );
        let started = tokio::time::Instant::now();
        assert!(transport.open("h").await.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn local_close_is_journaled_and_silent() {
        let journal = Journal::new();
        let transport = MockTransport::new(journal.clone());
        let _ = transport.open("h").await.unwrap();
        let conn = transport.last_connection().unwrap();

        conn.close().await;
        conn.drop_remote();

        assert!(!conn.is_connected());
        assert_eq!(conn.close_count(), 1);
        assert_eq!(journal.entries(), vec!["open:h", "close:h"]);
    }

    #[tokio::test]
    async fn remote_drop_resolves_unsolicited_close() {
        let transport = MockTransport::new(Journal::new());
        let conn = transport.open("h").await.unwrap();
        let closed = conn.on_unsolicited_close();

        transport.last_connection().unwrap().drop_remote();

        tokio::time::timeout(Duration::from_secs(1), closed)
            .await
            .expect("unsolicited close should fire");
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let transport = MockTransport::new(Journal::new());
        let conn = transport.open("h").await.unwrap();
        conn.send_text("ping".into()).await.unwrap();
        conn.close().await;
        assert!(matches!(
            conn.send_text("late".into()).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(transport.last_connection().unwrap().sent(), vec!["ping"]);
    }

    #[tokio::test]
    async fn inbound_frames_fan_out() {
        let transport = MockTransport::new(Journal::new());
        let conn = transport.open("h").await.unwrap();
        let mut rx = conn.inbound();
        transport.last_connection().unwrap().push_inbound("{\"msg\":\"ping\"}");
        assert_eq!(&*rx.recv().await.unwrap(), "{\"msg\":\"ping\"}");
    }
}
