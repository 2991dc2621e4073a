//! Config store and diagnostics boundaries.
//!
//! Actors read endpoint records through [`ConfigStore`] and report connect
//! failures through [`DiagnosticsSink`]. [`InMemoryEndpointStore`] implements
//! both, recording an error by writing it into the record's
//! `connection_error` so the next sync sees a non-connectable endpoint.

use std::collections::HashMap;

use parking_lot::RwLock;
use tether_core::{EndpointConfig, EndpointId};
use tracing::debug;

use crate::errors::LifecycleError;

/// Read-only lookup of endpoint records.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send + Sync {
    /// Current snapshot for `endpoint_id`, or `None` if no record exists.
    fn fetch(&self, endpoint_id: &EndpointId) -> Option<EndpointConfig>;
}

/// Fire-and-forget sink for connection failures.
pub trait DiagnosticsSink: Send + Sync {
    /// Record a failed connect attempt. Must not fail or block.
    fn record_connection_error(&self, endpoint_id: &EndpointId, error: &LifecycleError);
}

/// Endpoint records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryEndpointStore {
    records: RwLock<HashMap<EndpointId, EndpointConfig>>,
}

impl InMemoryEndpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Returns the previous one.
    pub fn upsert(&self, endpoint_id: EndpointId, config: EndpointConfig) -> Option<EndpointConfig> {
        self.records.write().insert(endpoint_id, config)
    }

    /// Remove a record.
    pub fn remove(&self, endpoint_id: &EndpointId) -> Option<EndpointConfig> {
        self.records.write().remove(endpoint_id)
    }

    /// Clear a recorded connection error so the endpoint may connect again.
    pub fn clear_error(&self, endpoint_id: &EndpointId) -> bool {
        match self.records.write().get_mut(endpoint_id) {
            Some(record) => record.connection_error.take().is_some(),
            None => false,
        }
    }

    /// IDs of every stored record.
    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.records.read().keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryEndpointStore {
    fn fetch(&self, endpoint_id: &EndpointId) -> Option<EndpointConfig> {
        self.records.read().get(endpoint_id).cloned()
    }
}

impl DiagnosticsSink for InMemoryEndpointStore {
    fn record_connection_error(&self, endpoint_id: &EndpointId, error: &LifecycleError) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(endpoint_id) {
            record.connection_error = Some(error.to_string());
            debug!(%endpoint_id, error = %error, "connection error recorded");
        } else {
            debug!(%endpoint_id, error = %error, "connection error for unknown endpoint dropped");
        }
    }
}
