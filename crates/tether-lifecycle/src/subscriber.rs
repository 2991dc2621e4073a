//! Subscribers and the catalog they are built from.
//!
//! A [`SubscriberCatalog`] is a fixed, ordered table of named factories. Each
//! factory builds one [`Subscriber`] bound to the current connection.
//! Application state a subscriber needs is captured by its factory closure.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::EndpointId;
use tether_transport::ConnectionRef;

use crate::errors::SubscriberError;

/// What a factory gets to bind a subscriber to.
#[derive(Clone)]
pub struct SubscriberContext {
    /// Endpoint the connection belongs to.
    pub endpoint_id: EndpointId,
    /// Live connection the subscriber is bound to.
    pub connection: ConnectionRef,
}

/// A listener attached to one connection.
#[async_trait]
pub trait Subscriber: Send {
    /// Attach to the connection (e.g. send a subscribe frame).
    async fn register(&mut self) -> Result<(), SubscriberError>;

    /// Periodic liveness tick.
    async fn keepalive(&mut self) -> Result<(), SubscriberError> {
        Ok(())
    }

    /// Detach from the connection. Runs before the connection closes.
    async fn unregister(&mut self) -> Result<(), SubscriberError>;
}

/// Builds a subscriber for one connection.
pub type SubscriberFactory =
    Arc<dyn Fn(&SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> + Send + Sync>;

/// One named catalog entry.
#[derive(Clone)]
pub struct CatalogEntry {
    name: String,
    factory: SubscriberFactory,
}

impl CatalogEntry {
    /// Entry name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a subscriber for `ctx`.
    pub fn build(&self, ctx: &SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Ordered table of subscriber factories.
#[derive(Clone, Debug, Default)]
pub struct SubscriberCatalog {
    entries: Vec<CatalogEntry>,
}

impl SubscriberCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory, builder style.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> + Send + Sync + 'static,
    {
        self.push(name, factory);
        self
    }

    /// Append a factory.
    pub fn push<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> + Send + Sync + 'static,
    {
        self.entries.push(CatalogEntry {
            name: name.into(),
            factory: Arc::new(factory),
        });
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
