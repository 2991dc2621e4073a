//! Transport and connection traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tether_core::ConnectionId;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Shared handle to a live connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Opens connections against a hostname.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection. Fails on unreachable or refused endpoints.
    async fn open(&self, hostname: &str) -> Result<ConnectionRef, TransportError>;
}

/// One physical connection to a remote endpoint.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier of this connection instance.
    fn id(&self) -> &ConnectionId;

    /// Whether the link is still open.
    fn is_connected(&self) -> bool;

    /// Queue a text frame for the remote.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Close the link locally. Never fires [`Connection::on_unsolicited_close`].
    async fn close(&self);

    /// Resolves once, when the remote or the network ends the link without a
    /// local [`Connection::close`].
    fn on_unsolicited_close(&self) -> BoxFuture<'static, ()>;

    /// Subscribe to inbound text frames.
    fn inbound(&self) -> broadcast::Receiver<Arc<str>>;
}

/// One-shot close notification that distinguishes local from remote closes.
#[derive(Clone, Debug, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    closed_locally: Arc<AtomicBool>,
}

impl CloseSignal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the local side is closing. Must happen before the link drops.
    pub fn mark_local(&self) {
        self.closed_locally.store(true, Ordering::Release);
    }

    /// Whether [`CloseSignal::mark_local`] was called.
    pub fn is_local(&self) -> bool {
        self.closed_locally.load(Ordering::Acquire)
    }

    /// The link dropped. Fires the signal unless the close was local.
    ///
    /// Returns `true` if the signal fired.
    pub fn link_dropped(&self) -> bool {
        if self.is_local() || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the unsolicited close already fired.
    pub fn has_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future resolving when the unsolicited close fires.
    pub fn wait(&self) -> BoxFuture<'static, ()> {
        self.token.clone().cancelled_owned().boxed()
    }
}
