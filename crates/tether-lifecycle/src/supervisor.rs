//! One actor per endpoint, keyed by [`EndpointId`].

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tether_core::EndpointId;
use tether_core::endpoint::is_connectable;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::actor::{self, ActorDeps, ActorHandle, StopMode};
use crate::errors::LifecycleError;

/// Claimed before the actor starts, so concurrent syncs share one start.
type Slot = Arc<OnceCell<ActorHandle>>;

/// Keeps at most one live [`ActorHandle`] per endpoint.
pub struct EndpointSupervisor {
    deps: ActorDeps,
    actors: DashMap<EndpointId, Slot>,
}

impl EndpointSupervisor {
    /// Create a supervisor that starts actors with `deps`.
    pub fn new(deps: ActorDeps) -> Self {
        Self {
            deps,
            actors: DashMap::new(),
        }
    }

    /// Reconcile `endpoint_id` with its current record.
    ///
    /// Forwards the snapshot to the running actor. When none is alive and the
    /// record is connectable, starts one. A non-connectable record stops and
    /// forgets the actor.
    #[instrument(skip_all, fields(endpoint_id = %endpoint_id))]
    pub async fn sync(&self, endpoint_id: &EndpointId) -> Result<(), LifecycleError> {
        let _ = self
            .actors
            .remove_if(endpoint_id, |_, slot| slot.get().is_some_and(|h| !h.is_alive()));
        let config = self.deps.store.fetch(endpoint_id);
        let connectable = is_connectable(config.as_ref());

        if !connectable {
            let existing = self.actors.get(endpoint_id).map(|s| Arc::clone(&s));
            let Some(slot) = existing else {
                debug!("no actor and nothing to connect");
                return Ok(());
            };
            if let Some(handle) = slot.get() {
                handle.sync_state_with(config.as_ref()).await;
            }
            let _ = self.actors.remove_if(endpoint_id, |_, s| Arc::ptr_eq(s, &slot));
            debug!("actor stopped for non-connectable endpoint");
            return Ok(());
        }

        let slot = Arc::clone(&self.actors.entry(endpoint_id.clone()).or_default());
        let started = slot
            .get_or_try_init(|| async {
                let handle = actor::start(endpoint_id.clone(), self.deps.clone()).await?;
                info!("actor started");
                Ok::<_, LifecycleError>(handle)
            })
            .await;
        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self
                    .actors
                    .remove_if(endpoint_id, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                return Err(e);
            }
        };
        handle.sync_state_with(config.as_ref()).await;
        Ok(())
    }

    /// Stop and forget the actor for `endpoint_id`. Returns whether one existed.
    pub async fn remove(&self, endpoint_id: &EndpointId, mode: StopMode) -> bool {
        let Some((_, slot)) = self.actors.remove(endpoint_id) else {
            return false;
        };
        match slot.get() {
            Some(handle) => {
                handle.stop(mode).await;
                true
            }
            None => false,
        }
    }

    /// Stop every actor and wait for all teardowns to finish.
    pub async fn shutdown(&self, mode: StopMode) {
        let ids: Vec<EndpointId> = self.actors.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let removed = self.actors.remove(&id).and_then(|(_, slot)| slot.get().cloned());
            if let Some(handle) = removed {
                handle.stop(mode).await;
                handles.push(handle);
            }
        }
        let count = handles.len();
        let _ = join_all(handles.iter().map(ActorHandle::terminated)).await;
        info!(count, "all endpoint actors stopped");
    }

    /// Handle for `endpoint_id`, if one is tracked.
    pub fn handle(&self, endpoint_id: &EndpointId) -> Option<ActorHandle> {
        self.actors.get(endpoint_id).and_then(|s| s.get().cloned())
    }

    /// Endpoints with a live actor.
    pub fn active_endpoints(&self) -> Vec<EndpointId> {
        self.actors
            .iter()
            .filter(|e| e.value().get().is_some_and(ActorHandle::is_alive))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Number of tracked actors, including ones still starting or tearing down.
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Whether no actor is tracked.
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tether_core::EndpointConfig;
    use tether_settings::ActorSettings;
    use tether_transport::Transport;
    use tether_transport::mock::{Journal, MockOpen, MockTransport};

    use super::*;
    use crate::mock::recording;
    use crate::state::LinkState;
    use crate::store::{ConfigStore, DiagnosticsSink, InMemoryEndpointStore};
    use crate::subscriber::SubscriberCatalog;

    struct Fixture {
        store: Arc<InMemoryEndpointStore>,
        transport: Arc<MockTransport>,
        supervisor: EndpointSupervisor,
    }

    fn fixture() -> Fixture {
        fixture_with(Vec::new())
    }

    fn fixture_with(script: Vec<MockOpen>) -> Fixture {
        let journal = Journal::new();
        let store = Arc::new(InMemoryEndpointStore::new());
        let transport = Arc::new(MockTransport::with_script(journal.clone(), script));
        let supervisor = EndpointSupervisor::new(ActorDeps {
            store: Arc::clone(&store) as Arc<dyn ConfigStore>,
            diagnostics: Arc::clone(&store) as Arc<dyn DiagnosticsSink>,
            transport: Arc::clone(&transport) as Arc<dyn Transport>,
            catalog: SubscriberCatalog::new().with("rooms", recording("rooms", &journal)),
            settings: ActorSettings::default(),
        });
        Fixture {
            store,
            transport,
            supervisor,
        }
    }

    #[tokio::test]
    async fn sync_starts_one_actor_per_endpoint() {
        let f = fixture();
        let id = EndpointId::from("srv-1");
        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com"));

        f.supervisor.sync(&id).await.unwrap();
        f.supervisor.sync(&id).await.unwrap();

        let handle = f.supervisor.handle(&id).unwrap();
        assert!(handle.wait_for_state(LinkState::Active).await);
        handle.ensure_connection().await.unwrap();
        assert_eq!(f.supervisor.len(), 1);
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_first_syncs_open_once() {
        let f = fixture_with(vec![
            MockOpen::delayed(Duration::from_millis(50), MockOpen::Succeed),
            MockOpen::delayed(Duration::from_millis(50), MockOpen::Succeed),
        ]);
        let id = EndpointId::from("srv-1");
        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com"));

        let (a, b) = tokio::join!(f.supervisor.sync(&id), f.supervisor.sync(&id));
        a.unwrap();
        b.unwrap();

        let handle = f.supervisor.handle(&id).unwrap();
        handle.ensure_connection().await.unwrap();
        assert_eq!(handle.state(), LinkState::Active);
        assert_eq!(f.transport.open_count(), 1);
        assert_eq!(f.supervisor.len(), 1);
    }

    #[tokio::test]
    async fn sync_without_record_starts_nothing() {
        let f = fixture();
        f.supervisor.sync(&EndpointId::from("ghost")).await.unwrap();
        assert!(f.supervisor.is_empty());
        assert_eq!(f.transport.open_count(), 0);
    }

    #[tokio::test]
    async fn non_connectable_record_stops_and_forgets_actor() {
        let f = fixture();
        let id = EndpointId::from("srv-1");
        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com"));
        f.supervisor.sync(&id).await.unwrap();
        let handle = f.supervisor.handle(&id).unwrap();
        assert!(handle.wait_for_state(LinkState::Active).await);

        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com").with_error("auth failed"));
        f.supervisor.sync(&id).await.unwrap();

        handle.terminated().await;
        assert!(f.supervisor.handle(&id).is_none());
        assert_eq!(f.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn dead_actor_is_replaced_on_next_sync() {
        let f = fixture();
        let id = EndpointId::from("srv-1");
        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com"));
        f.supervisor.sync(&id).await.unwrap();
        let first = f.supervisor.handle(&id).unwrap();
        assert!(first.wait_for_state(LinkState::Active).await);

        f.transport.last_connection().unwrap().drop_remote();
        first.terminated().await;
        assert!(f.supervisor.active_endpoints().is_empty());

        f.supervisor.sync(&id).await.unwrap();
        let second = f.supervisor.handle(&id).unwrap();
        assert!(second.wait_for_state(LinkState::Active).await);
        assert_eq!(f.transport.open_count(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let f = fixture();
        for (id, host) in [("a", "a.example.com"), ("b", "b.example.com")] {
            let _ = f.store.upsert(EndpointId::from(id), EndpointConfig::new(host));
            f.supervisor.sync(&EndpointId::from(id)).await.unwrap();
        }
        let handles: Vec<_> = ["a", "b"]
            .iter()
            .map(|id| f.supervisor.handle(&EndpointId::from(*id)).unwrap())
            .collect();

        f.supervisor.shutdown(StopMode::Drain).await;

        assert!(f.supervisor.is_empty());
        assert!(handles.iter().all(|h| h.state() == LinkState::Terminated));
    }

    #[tokio::test]
    async fn remove_reports_whether_tracked() {
        let f = fixture();
        let id = EndpointId::from("srv-1");
        let _ = f.store.upsert(id.clone(), EndpointConfig::new("chat.example.com"));
        f.supervisor.sync(&id).await.unwrap();

        assert!(f.supervisor.remove(&id, StopMode::Immediate).await);
        assert!(!f.supervisor.remove(&id, StopMode::Immediate).await);
    }
}
