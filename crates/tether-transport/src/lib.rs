//! # tether-transport
//!
//! The socket boundary consumed by lifecycle actors.
//!
//! - [`Transport`] opens a [`Connection`] against a hostname
//! - [`Connection`] reports liveness, closes, and exposes a one-shot
//!   unsolicited-close future
//! - [`WsTransport`] implements both over `tokio-tungstenite`
//! - [`mock`] provides a scripted transport for deterministic tests

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod mock;
pub mod websocket;

pub use connection::{CloseSignal, Connection, ConnectionRef, Transport};
pub use error::TransportError;
pub use websocket::{WsConnection, WsTransport, endpoint_url};
