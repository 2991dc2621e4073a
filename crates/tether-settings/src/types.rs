//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Lifecycle actor settings.
    pub actor: ActorSettings,
    /// WebSocket transport settings.
    pub transport: TransportSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.actor.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "actor.mailboxCapacity must be greater than zero".into(),
            ));
        }
        if self.actor.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "actor.connectTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.transport.send_queue == 0 || self.transport.inbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "transport queues must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Per-endpoint lifecycle actor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorSettings {
    /// Mailbox capacity for queued commands.
    pub mailbox_capacity: usize,
    /// Upper bound on one connect attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// Periodic keepalive tick in milliseconds. `0` disables the timer; keepalive
    /// then only runs after `sync_state_with`.
    pub keepalive_interval_ms: u64,
}

impl ActorSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keepalive period, or `None` when the timer is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            connect_timeout_ms: 30_000,
            keepalive_interval_ms: 0,
        }
    }
}

/// WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Use `wss://` when building a URL from a bare hostname.
    pub secure: bool,
    /// Path appended to a bare hostname.
    pub path: String,
    /// Outbound frame queue per connection.
    pub send_queue: usize,
    /// Inbound broadcast buffer per connection.
    pub inbound_buffer: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            secure: true,
            path: "/websocket".to_string(),
            send_queue: 256,
            inbound_buffer: 256,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
