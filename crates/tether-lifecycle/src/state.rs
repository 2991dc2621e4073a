//! Link state machine for one endpoint.
//!
//! ```text
//! Idle ──ConnectStarted──▶ Connecting ──ConnectSucceeded──▶ Connected
//!  ▲                          │                                │
//!  └────────ConnectFailed─────┘                  ListenersRegistered
//!  ▲                                                           ▼
//!  └───────────────Released (stale link)─────────────────── Active
//!
//! any live state ──TeardownStarted──▶ TearingDown ──TeardownFinished──▶ Terminated
//! ```
//!
//! "Socket exists" and "listeners registered" are derived from the state, so
//! registered-without-socket cannot be represented.

use std::fmt;

/// Lifecycle state of one endpoint actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No connection and no attempt in flight.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected, subscribers not yet registered.
    Connected,
    /// Connected with subscribers registered.
    Active,
    /// Teardown is running.
    TearingDown,
    /// The actor has stopped. Absorbing.
    Terminated,
}

/// Input to [`LinkState::transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connect attempt was issued.
    ConnectStarted,
    /// The connect attempt produced a live connection.
    ConnectSucceeded,
    /// The connect attempt failed.
    ConnectFailed,
    /// The catalog was registered against the connection.
    ListenersRegistered,
    /// A stale connection was closed so a new one can be opened.
    Released,
    /// Stop, remote close, or bad config began teardown.
    TeardownStarted,
    /// Teardown completed.
    TeardownFinished,
}

/// A transition not allowed from the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid link transition: {event:?} in state {from}")]
pub struct InvalidTransition {
    /// State the event arrived in.
    pub from: LinkState,
    /// Rejected event.
    pub event: LinkEvent,
}

impl LinkState {
    /// Apply `event`, returning the next state.
    pub fn transition(self, event: LinkEvent) -> Result<Self, InvalidTransition> {
        use LinkEvent as E;
        use LinkState as S;

        let next = match (self, event) {
            (S::Idle, E::ConnectStarted) => S::Connecting,
            (S::Connecting, E::ConnectSucceeded) => S::Connected,
            (S::Connecting, E::ConnectFailed) | (S::Connected | S::Active, E::Released) => S::Idle,
            (S::Connected, E::ListenersRegistered) => S::Active,
            (S::Idle | S::Connecting | S::Connected | S::Active, E::TeardownStarted) => S::TearingDown,
            (S::TearingDown, E::TeardownFinished) => S::Terminated,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// A connect attempt has been issued and not yet torn down.
    pub fn socket_exists(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Active)
    }

    /// Subscribers are attached to a live socket.
    pub fn listeners_registered(self) -> bool {
        self == Self::Active
    }

    /// Whether the actor has stopped.
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Active => "active",
            Self::TearingDown => "tearing_down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const ALL: [LinkState; 6] = [
        LinkState::Idle,
        LinkState::Connecting,
        LinkState::Connected,
        LinkState::Active,
        LinkState::TearingDown,
        LinkState::Terminated,
    ];

    #[test]
    fn happy_path() {
        let s = LinkState::Idle
            .transition(LinkEvent::ConnectStarted)
            .and_then(|s| s.transition(LinkEvent::ConnectSucceeded))
            .and_then(|s| s.transition(LinkEvent::ListenersRegistered))
            .unwrap();
        assert_eq!(s, LinkState::Active);
        assert!(s.socket_exists());
        assert!(s.listeners_registered());
    }

    #[test]
    fn failed_connect_returns_to_idle() {
        let s = LinkState::Connecting.transition(LinkEvent::ConnectFailed).unwrap();
        assert_eq!(s, LinkState::Idle);
        assert!(!s.socket_exists());
    }

    #[test]
    fn registered_implies_socket() {
        for s in ALL {
            assert!(!s.listeners_registered() || s.socket_exists(), "{s}");
        }
    }

    #[test]
    fn every_live_state_can_tear_down() {
        for s in [LinkState::Idle, LinkState::Connecting, LinkState::Connected, LinkState::Active] {
            let s = s.transition(LinkEvent::TeardownStarted).unwrap();
            assert_eq!(s.transition(LinkEvent::TeardownFinished).unwrap(), LinkState::Terminated);
        }
    }

    #[test]
    fn terminated_is_absorbing() {
        for event in [
            LinkEvent::ConnectStarted,
            LinkEvent::ConnectSucceeded,
            LinkEvent::ConnectFailed,
            LinkEvent::ListenersRegistered,
            LinkEvent::Released,
            LinkEvent::TeardownStarted,
            LinkEvent::TeardownFinished,
        ] {
            assert_matches!(
                LinkState::Terminated.transition(event),
                Err(InvalidTransition { from: LinkState::Terminated, .. })
            );
        }
    }

    #[test]
    fn duplicate_connect_rejected() {
        assert_matches!(LinkState::Connecting.transition(LinkEvent::ConnectStarted), Err(_));
        assert_matches!(LinkState::Active.transition(LinkEvent::ConnectStarted), Err(_));
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(LinkState::TearingDown.to_string(), "tearing_down");
        let err = LinkState::Idle.transition(LinkEvent::ListenersRegistered).unwrap_err();
        assert_eq!(err.to_string(), "invalid link transition: ListenersRegistered in state idle");
    }
}
