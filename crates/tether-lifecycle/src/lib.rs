//! # tether-lifecycle
//!
//! Per-endpoint connection lifecycle actors.
//!
//! Each endpoint gets one actor that owns exactly one logical connection and
//! drives it through connect, subscriber registration, keepalive, and ordered
//! teardown (unregister every subscriber, then close).
//!
//! - [`actor`]: the actor task, [`ActorHandle`], [`StopMode`]
//! - [`establisher`]: opens or reuses the connection
//! - [`registry`]: the live subscriber set
//! - [`state`]: [`LinkState`] and its transition function
//! - [`store`]: config store and diagnostics boundaries, in-memory store
//! - [`subscriber`]: [`Subscriber`] trait and [`SubscriberCatalog`]
//! - [`supervisor`]: one actor per endpoint id
//! - [`mock`]: journaling subscribers for tests

#![deny(unsafe_code)]

pub mod actor;
pub mod errors;
pub mod establisher;
pub mod mock;
pub mod registry;
pub mod state;
pub mod store;
pub mod subscriber;
pub mod supervisor;

pub use actor::{ActorDeps, ActorHandle, StopMode, start};
pub use errors::{LifecycleError, SubscriberError};
pub use establisher::{ConnectionEstablisher, Prepared};
pub use registry::ListenerRegistry;
pub use state::{InvalidTransition, LinkEvent, LinkState};
pub use store::{ConfigStore, DiagnosticsSink, InMemoryEndpointStore};
pub use subscriber::{CatalogEntry, Subscriber, SubscriberCatalog, SubscriberContext, SubscriberFactory};
pub use supervisor::EndpointSupervisor;
