//! Obtains the one live connection an actor owns.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tether_core::EndpointId;
use tether_transport::{ConnectionRef, Transport, TransportError};
use tracing::debug;

use crate::errors::LifecycleError;
use crate::store::ConfigStore;

/// Outcome of [`ConnectionEstablisher::prepare`].
pub enum Prepared {
    /// The current connection is still live.
    Reuse(ConnectionRef),
    /// A new connection must be opened. The future is `'static` so the actor
    /// can spawn it and keep serving its mailbox meanwhile.
    Open(BoxFuture<'static, Result<ConnectionRef, LifecycleError>>),
}

/// Fetches the endpoint record and opens or reuses the connection.
pub struct ConnectionEstablisher {
    endpoint_id: EndpointId,
    store: Arc<dyn ConfigStore>,
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    active: Option<ConnectionRef>,
}

impl ConnectionEstablisher {
    /// Create an establisher with no connection.
    pub fn new(
        endpoint_id: EndpointId,
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint_id,
            store,
            transport,
            connect_timeout,
            active: None,
        }
    }

    /// Look up the endpoint and decide between reusing and opening.
    ///
    /// Fails without touching the transport when the record is absent or not
    /// connectable.
    pub fn prepare(&self) -> Result<Prepared, LifecycleError> {
        let config = self
            .store
            .fetch(&self.endpoint_id)
            .ok_or_else(|| LifecycleError::EndpointNotFound(self.endpoint_id.clone()))?;

        if let Some(conn) = self.active.as_ref().filter(|c| c.is_connected()) {
            return Ok(Prepared::Reuse(Arc::clone(conn)));
        }
        if !config.is_connectable() {
            return Err(LifecycleError::NotConnectable(self.endpoint_id.clone()));
        }

        let transport = Arc::clone(&self.transport);
        let hostname = config.hostname;
        let timeout = self.connect_timeout;
        debug!(endpoint_id = %self.endpoint_id, %hostname, "opening connection");

        Ok(Prepared::Open(
            async move {
                let result = tokio::time::timeout(timeout, transport.open(&hostname)).await;
                match result {
                    Ok(result) => result.map_err(LifecycleError::from),
                    Err(_) => Err(LifecycleError::from(TransportError::Timeout {
                        target: hostname,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })),
                }
            }
            .boxed(),
        ))
    }

    /// Adopt a freshly opened connection.
    pub fn install(&mut self, connection: ConnectionRef) {
        self.active = Some(connection);
    }

    /// The connection currently owned, live or not.
    pub fn current(&self) -> Option<&ConnectionRef> {
        self.active.as_ref()
    }

    /// Whether the owned connection is still live.
    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Close and forget the owned connection.
    pub async fn close(&mut self) {
        if let Some(conn) = self.active.take() {
            conn.close().await;
            debug!(endpoint_id = %self.endpoint_id, connection_id = %conn.id(), "connection closed");
        }
    }
}
