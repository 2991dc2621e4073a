//! Live subscriber set for the current connection.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::subscriber::{Subscriber, SubscriberCatalog, SubscriberContext};

struct LiveSubscriber {
    name: String,
    subscriber: Box<dyn Subscriber>,
}

/// Subscribers registered against the current connection, in registration
/// order.
///
/// Failures are isolated per entry: one subscriber failing to build or
/// register never stops its siblings.
#[derive(Default)]
pub struct ListenerRegistry {
    live: VecDeque<LiveSubscriber>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register one subscriber per catalog entry.
    ///
    /// Returns how many registered successfully.
    pub async fn register_all(&mut self, catalog: &SubscriberCatalog, ctx: &SubscriberContext) -> usize {
        let mut registered = 0;
        for entry in catalog.entries() {
            let mut subscriber = match entry.build(ctx) {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    warn!(subscriber = entry.name(), error = %e, "subscriber construction failed");
                    continue;
                }
            };
            if let Err(e) = subscriber.register().await {
                warn!(subscriber = entry.name(), error = %e, "subscriber registration failed");
                continue;
            }
            debug!(subscriber = entry.name(), "subscriber registered");
            self.live.push_back(LiveSubscriber {
                name: entry.name().to_string(),
                subscriber,
            });
            registered += 1;
        }
        registered
    }

    /// Tick every live subscriber in registration order.
    pub async fn keepalive_all(&mut self) {
        for live in &mut self.live {
            if let Err(e) = live.subscriber.keepalive().await {
                warn!(subscriber = %live.name, error = %e, "subscriber keepalive failed");
            }
        }
    }

    /// Unregister and drop every live subscriber in registration order.
    ///
    /// Each entry leaves the live set before its `unregister()` runs.
    pub async fn unregister_all(&mut self) {
        while let Some(mut live) = self.live.pop_front() {
            match live.subscriber.unregister().await {
                Ok(()) => debug!(subscriber = %live.name, "subscriber unregistered"),
                Err(e) => warn!(subscriber = %live.name, error = %e, "subscriber unregister failed"),
            }
        }
    }

    /// Names of live subscribers in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.live.iter().map(|l| l.name.as_str()).collect()
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no subscriber is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tether_core::EndpointId;
    use tether_core::logging::capture_logs;
    use tether_transport::Transport;
    use tether_transport::mock::{Journal, MockTransport};
    use tracing::Level;

    use super::*;
    use crate::mock::{FailAt, failing, recording};

    async fn context(journal: &Journal) -> SubscriberContext {
        let transport = MockTransport::new(journal.clone());
        SubscriberContext {
            endpoint_id: EndpointId::from("srv-1"),
            connection: transport.open("chat.example.com").await.unwrap(),
        }
    }

    #[tokio::test]
    async fn registers_every_entry_in_order() {
        let journal = Journal::new();
        let ctx = context(&journal).await;
        let catalog = SubscriberCatalog::new()
            .with("rooms", recording("rooms", &journal))
            .with("presence", recording("presence", &journal));

        let mut registry = ListenerRegistry::new();
        assert_eq!(registry.register_all(&catalog, &ctx).await, 2);
        assert_eq!(registry.names(), vec!["rooms", "presence"]);
        assert_eq!(
            journal.entries(),
            vec!["open:chat.example.com", "register:rooms", "register:presence"]
        );
    }

    #[tokio::test]
    async fn construct_failure_is_isolated() {
        let (logs, _guard) = capture_logs();
        let journal = Journal::new();
        let ctx = context(&journal).await;
        let catalog = SubscriberCatalog::new()
            .with("first", recording("first", &journal))
            .with("second", failing("second", &journal, FailAt::Construct))
            .with("third", recording("third", &journal));

        let mut registry = ListenerRegistry::new();
        assert_eq!(registry.register_all(&catalog, &ctx).await, 2);
        assert_eq!(registry.names(), vec!["first", "third"]);
        assert!(logs.has_event(Level::WARN, "subscriber construction failed"));
        assert_eq!(logs.events_with_field("subscriber", "second").len(), 1);
    }

    #[tokio::test]
    async fn register_failure_is_not_tracked() {
        let journal = Journal::new();
        let ctx = context(&journal).await;
        let catalog = SubscriberCatalog::new()
            .with("flaky", failing("flaky", &journal, FailAt::Register))
            .with("steady", recording("steady", &journal));

        let mut registry = ListenerRegistry::new();
        assert_eq!(registry.register_all(&catalog, &ctx).await, 1);
        assert_eq!(registry.names(), vec!["steady"]);

        registry.unregister_all().await;
        assert!(journal.position("unregister:flaky").is_none());
    }

    #[tokio::test]
    async fn keepalive_ticks_in_registration_order_despite_failures() {
        let journal = Journal::new();
        let ctx = context(&journal).await;
        let catalog = SubscriberCatalog::new()
            .with("a", failing("a", &journal, FailAt::Keepalive))
            .with("b", recording("b", &journal));

        let mut registry = ListenerRegistry::new();
        let _ = registry.register_all(&catalog, &ctx).await;
        registry.keepalive_all().await;

        let a = journal.position("keepalive:a").unwrap();
        let b = journal.position("keepalive:b").unwrap();
        assert!(a < b);
    }

    #[tokio::test]
    async fn unregister_all_empties_set_in_registration_order() {
        let journal = Journal::new();
        let ctx = context(&journal).await;
        let catalog = SubscriberCatalog::new()
            .with("a", recording("a", &journal))
            .with("b", failing("b", &journal, FailAt::Unregister))
            .with("c", recording("c", &journal));

        let mut registry = ListenerRegistry::new();
        let _ = registry.register_all(&catalog, &ctx).await;
        registry.unregister_all().await;

        assert!(registry.is_empty());
        let order: Vec<_> = ["unregister:a", "unregister:b", "unregister:c"]
            .iter()
            .map(|e| journal.position(e).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }
}
