//! Lifecycle error types.

use tether_core::EndpointId;
use tether_transport::TransportError;

/// Errors raised while establishing or driving an endpoint's connection.
///
/// None of these reach the caller of `sync_state_with`; the actor logs them
/// and reports transport failures to the diagnostics sink.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The config store has no record for the endpoint.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(EndpointId),

    /// The record exists but must not be connected (empty hostname or a
    /// recorded connection error).
    #[error("Endpoint not connectable: {0}")]
    NotConnectable(EndpointId),

    /// Opening the connection failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The spawned connect task panicked or was aborted.
    #[error("Connect task failed: {0}")]
    ConnectTask(String),

    /// The actor has terminated and no longer accepts commands.
    #[error("Actor stopped: {0}")]
    ActorStopped(EndpointId),
}

impl LifecycleError {
    /// Whether this failure should be written to the diagnostics sink.
    ///
    /// Configuration problems are reconciled silently on the next sync.
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectTask(_))
    }

    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::EndpointNotFound(_) => "endpoint_not_found",
            Self::NotConnectable(_) => "not_connectable",
            Self::Transport(e) => e.category(),
            Self::ConnectTask(_) => "connect_task",
            Self::ActorStopped(_) => "actor_stopped",
        }
    }
}

/// Errors raised by a subscriber while it is built or driven.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// The catalog factory could not build the subscriber.
    #[error("Construct error: {0}")]
    Construct(String),

    /// Sending on the bound connection failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Any other subscriber-side failure.
    #[error("Subscriber error: {0}")]
    Failed(String),
}
