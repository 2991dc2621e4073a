//! # tether-core
//!
//! Foundation types shared by every tether crate.
//!
//! - **Branded IDs**: [`EndpointId`] and [`ConnectionId`] as newtypes for type safety
//! - **Endpoint snapshots**: [`EndpointConfig`] with the "should we connect" rule
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod endpoint;
pub mod ids;
pub mod logging;

pub use endpoint::EndpointConfig;
pub use ids::{ConnectionId, EndpointId};
