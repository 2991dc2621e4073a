//! Endpoint configuration snapshots.
//!
//! An [`EndpointConfig`] is a read-only copy of one server record as seen at
//! fetch time. It is never owned by a lifecycle actor; the actor fetches a new
//! snapshot whenever it needs one.

use serde::{Deserialize, Serialize};

/// Snapshot of one endpoint's connection settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Remote host to connect to. May be empty while the record is incomplete.
    #[serde(default)]
    pub hostname: String,
    /// Last recorded connection error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl EndpointConfig {
    /// Snapshot for a host with no recorded error.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            connection_error: None,
        }
    }

    /// Replace the recorded connection error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.connection_error = Some(error.into());
        self
    }

    /// Whether a connection should be attempted for this snapshot.
    ///
    /// A blank hostname or a non-empty connection error both mean
    /// "do not connect".
    #[must_use]
    pub fn is_connectable(&self) -> bool {
        !self.hostname.trim().is_empty()
            && self
                .connection_error
                .as_deref()
                .is_none_or(str::is_empty)
    }
}

/// Whether an optional snapshot permits connecting. `None` never does.
#[must_use]
pub fn is_connectable(config: Option<&EndpointConfig>) -> bool {
    config.is_some_and(EndpointConfig::is_connectable)
}
