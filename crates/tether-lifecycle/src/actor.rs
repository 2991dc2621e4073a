//! The per-endpoint lifecycle actor.
//!
//! One tokio task per endpoint owns the connection, the subscriber set, and
//! the [`LinkState`]. Every mutation happens on that task. Callers talk to it
//! through an [`ActorHandle`] backed by a bounded mailbox.
//!
//! The connect itself runs on a spawned task so the actor keeps serving its
//! mailbox; its result is picked up by the actor loop as a continuation.
//! Teardown (unregister every subscriber, then close) always runs before the
//! task exits, whether it was asked to stop, the remote closed the link, or
//! every handle was dropped.

use std::future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tether_core::endpoint::is_connectable;
use tether_core::{EndpointConfig, EndpointId};
use tether_settings::ActorSettings;
use tether_transport::{ConnectionRef, Transport};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::errors::LifecycleError;
use crate::establisher::{ConnectionEstablisher, Prepared};
use crate::registry::ListenerRegistry;
use crate::state::{LinkEvent, LinkState};
use crate::store::{ConfigStore, DiagnosticsSink};
use crate::subscriber::{SubscriberCatalog, SubscriberContext};

/// Collaborators an actor is started with.
#[derive(Clone)]
pub struct ActorDeps {
    /// Endpoint record lookup.
    pub store: Arc<dyn ConfigStore>,
    /// Where connect failures are reported.
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    /// Opens connections.
    pub transport: Arc<dyn Transport>,
    /// Subscribers registered on every new connection.
    pub catalog: SubscriberCatalog,
    /// Mailbox, timeout and keepalive settings.
    pub settings: ActorSettings,
}

impl ActorDeps {
    /// Collaborators with actor settings taken from the global
    /// [`tether_settings::get_settings`].
    pub fn new(
        store: Arc<dyn ConfigStore>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        transport: Arc<dyn Transport>,
        catalog: SubscriberCatalog,
    ) -> Self {
        Self {
            store,
            diagnostics,
            transport,
            catalog,
            settings: tether_settings::get_settings().actor.clone(),
        }
    }
}

/// How [`ActorHandle::stop`] treats queued work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// Skip queued commands; stop once the current one finishes.
    Immediate,
    /// Process everything queued before the stop request first.
    Drain,
}

enum Command {
    Sync,
    Ensure(oneshot::Sender<()>),
    Keepalive,
    Stop,
}

/// Follow-up owed once an `ensure_connection` settles.
enum Settled {
    Reply(oneshot::Sender<()>),
    Keepalive,
}

type ConnectResult = Result<ConnectionRef, LifecycleError>;

/// Start an actor for `endpoint_id`.
///
/// Resolves once the actor task is running. The actor immediately attempts a
/// first connection on its own.
pub async fn start(endpoint_id: EndpointId, deps: ActorDeps) -> Result<ActorHandle, LifecycleError> {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(deps.settings.mailbox_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(LinkState::Idle);
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let keepalive = deps.settings.keepalive_interval().map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let actor = EndpointActor {
        endpoint_id: endpoint_id.clone(),
        establisher: ConnectionEstablisher::new(
            endpoint_id.clone(),
            deps.store,
            deps.transport,
            deps.settings.connect_timeout(),
        ),
        diagnostics: deps.diagnostics,
        catalog: deps.catalog,
        registry: ListenerRegistry::new(),
        state: LinkState::Idle,
        state_tx,
        connecting: None,
        waiters: Vec::new(),
        unsolicited_close: None,
        inbound_tap: None,
        keepalive,
        self_tx: mailbox_tx.downgrade(),
    };

    let span = info_span!("endpoint_actor", endpoint_id = %endpoint_id);
    let _task = tokio::spawn(actor.run(mailbox_rx, cancel.clone(), ready_tx).instrument(span));

    ready_rx
        .await
        .map_err(|_| LifecycleError::ActorStopped(endpoint_id.clone()))?;

    Ok(ActorHandle {
        endpoint_id,
        mailbox: mailbox_tx,
        cancel,
        state: state_rx,
    })
}

/// Cloneable handle to a running actor.
///
/// Dropping every handle stops the actor as if [`StopMode::Drain`] was
/// requested.
#[derive(Clone, Debug)]
pub struct ActorHandle {
    endpoint_id: EndpointId,
    mailbox: mpsc::Sender<Command>,
    cancel: CancellationToken,
    state: watch::Receiver<LinkState>,
}

impl ActorHandle {
    /// Endpoint this actor serves.
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    /// Reconcile the actor with a fresh config snapshot.
    ///
    /// An absent or non-connectable snapshot stops the actor immediately.
    /// Otherwise the connection is ensured and a keepalive tick follows once
    /// that settles, successful or not. Never fails.
    pub async fn sync_state_with(&self, config: Option<&EndpointConfig>) {
        if !is_connectable(config) {
            debug!(endpoint_id = %self.endpoint_id, "config not connectable, stopping actor");
            self.stop(StopMode::Immediate).await;
            return;
        }
        if self.mailbox.send(Command::Sync).await.is_err() {
            debug!(endpoint_id = %self.endpoint_id, "sync dropped, actor already stopped");
        }
    }

    /// Make sure a live connection exists, opening one if needed.
    ///
    /// Resolves when the attempt settles. A failed connect still resolves
    /// `Ok`; only a stopped actor is an error.
    pub async fn ensure_connection(&self) -> Result<(), LifecycleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox
            .send(Command::Ensure(reply_tx))
            .await
            .map_err(|_| LifecycleError::ActorStopped(self.endpoint_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| LifecycleError::ActorStopped(self.endpoint_id.clone()))
    }

    /// Ask the actor to tear down and stop.
    pub async fn stop(&self, mode: StopMode) {
        match mode {
            StopMode::Immediate => self.cancel.cancel(),
            StopMode::Drain => {
                // already gone is fine
                let _ = self.mailbox.send(Command::Stop).await;
            }
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Whether the actor still accepts work.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
            && !self.mailbox.is_closed()
            && !matches!(self.state(), LinkState::TearingDown | LinkState::Terminated)
    }

    /// Wait until the actor reaches `target`. Returns `false` if it
    /// terminated first.
    pub async fn wait_for_state(&self, target: LinkState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map(|s| *s == target);
        reached.unwrap_or_else(|_| *self.state.borrow() == target)
    }

    /// Wait until teardown has finished.
    pub async fn terminated(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }
}

struct EndpointActor {
    endpoint_id: EndpointId,
    establisher: ConnectionEstablisher,
    diagnostics: Arc<dyn DiagnosticsSink>,
    catalog: SubscriberCatalog,
    registry: ListenerRegistry,
    state: LinkState,
    state_tx: watch::Sender<LinkState>,
    connecting: Option<JoinHandle<ConnectResult>>,
    waiters: Vec<Settled>,
    unsolicited_close: Option<BoxFuture<'static, ()>>,
    inbound_tap: Option<JoinHandle<()>>,
    keepalive: Option<Interval>,
    self_tx: mpsc::WeakSender<Command>,
}

impl EndpointActor {
    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        ready: oneshot::Sender<()>,
    ) {
        let _ = ready.send(());
        info!("endpoint actor started");
        self.ensure_connection(None).await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("immediate stop requested");
                    break;
                }
                () = wait_unsolicited_close(&mut self.unsolicited_close) => {
                    info!("connection closed by remote, tearing down");
                    break;
                }
                joined = wait_connect(&mut self.connecting) => {
                    self.connect_settled(joined).await;
                }
                () = next_tick(&mut self.keepalive) => {
                    self.keepalive_all().await;
                }
                cmd = mailbox.recv() => match cmd {
                    Some(Command::Sync) => self.ensure_connection(Some(Settled::Keepalive)).await,
                    Some(Command::Ensure(reply)) => {
                        self.ensure_connection(Some(Settled::Reply(reply))).await;
                    }
                    Some(Command::Keepalive) => self.keepalive_all().await,
                    Some(Command::Stop) => {
                        debug!("drain stop reached");
                        self.drain_keepalives(&mut mailbox).await;
                        break;
                    }
                    None => {
                        debug!("all handles dropped");
                        break;
                    }
                },
            }
        }

        mailbox.close();
        self.teardown().await;
    }

    async fn ensure_connection(&mut self, waiter: Option<Settled>) {
        match self.state {
            LinkState::Connecting => {
                // settles with the attempt already in flight
                if let Some(waiter) = waiter {
                    self.waiters.push(waiter);
                }
                return;
            }
            LinkState::Connected | LinkState::Active => {
                if self.establisher.is_connected() {
                    self.settle(waiter);
                    return;
                }
                warn!(state = %self.state, "connection went stale, reconnecting");
                self.release_connection().await;
            }
            LinkState::Idle => {}
            LinkState::TearingDown | LinkState::Terminated => {
                self.settle(waiter);
                return;
            }
        }

        match self.establisher.prepare() {
            Ok(Prepared::Open(connect)) => {
                self.apply(LinkEvent::ConnectStarted);
                self.connecting = Some(tokio::spawn(connect.in_current_span()));
                if let Some(waiter) = waiter {
                    self.waiters.push(waiter);
                }
            }
            Ok(Prepared::Reuse(conn)) => {
                self.apply(LinkEvent::ConnectStarted);
                self.connection_established(conn).await;
                self.settle(waiter);
            }
            Err(e) => {
                self.report_connect_failure(&e);
                self.settle(waiter);
            }
        }
    }

    async fn connect_settled(&mut self, joined: Result<ConnectResult, JoinError>) {
        self.connecting = None;
        let outcome = joined.unwrap_or_else(|e| Err(LifecycleError::ConnectTask(e.to_string())));
        match outcome {
            Ok(conn) => self.connection_established(conn).await,
            Err(e) => {
                self.apply(LinkEvent::ConnectFailed);
                self.report_connect_failure(&e);
            }
        }
        for waiter in std::mem::take(&mut self.waiters) {
            self.settle(Some(waiter));
        }
    }

    async fn connection_established(&mut self, conn: ConnectionRef) {
        self.apply(LinkEvent::ConnectSucceeded);
        info!(connection_id = %conn.id(), "connected");

        self.unsolicited_close = Some(conn.on_unsolicited_close());
        self.inbound_tap = Some(tokio::spawn(log_inbound(conn.inbound()).in_current_span()));
        self.establisher.install(Arc::clone(&conn));

        let ctx = SubscriberContext {
            endpoint_id: self.endpoint_id.clone(),
            connection: conn,
        };
        let registered = self.registry.register_all(&self.catalog, &ctx).await;
        self.apply(LinkEvent::ListenersRegistered);
        info!(registered, catalog = self.catalog.len(), "listeners registered");
    }

    fn report_connect_failure(&self, error: &LifecycleError) {
        if error.is_reportable() {
            warn!(error = %error, category = error.category(), "connect failed");
            self.diagnostics.record_connection_error(&self.endpoint_id, error);
        } else {
            debug!(error = %error, "connect skipped");
        }
    }

    async fn keepalive_all(&mut self) {
        if self.state.socket_exists() && self.state.listeners_registered() {
            self.registry.keepalive_all().await;
        }
    }

    /// Run keepalives that work settled before the stop request still owes.
    /// Anything else queued behind the stop is dropped.
    async fn drain_keepalives(&mut self, mailbox: &mut mpsc::Receiver<Command>) {
        mailbox.close();
        let mut skipped = 0usize;
        while let Ok(cmd) = mailbox.try_recv() {
            match cmd {
                Command::Keepalive => self.keepalive_all().await,
                Command::Sync | Command::Ensure(_) | Command::Stop => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "commands queued after drain stop dropped");
        }
    }

    /// Drop a stale connection so a new one can be opened.
    async fn release_connection(&mut self) {
        self.unsolicited_close = None;
        if let Some(tap) = self.inbound_tap.take() {
            tap.abort();
        }
        self.registry.unregister_all().await;
        self.establisher.close().await;
        self.apply(LinkEvent::Released);
    }

    async fn teardown(&mut self) {
        let registered = self.state.listeners_registered();
        self.apply(LinkEvent::TeardownStarted);

        if let Some(pending) = self.connecting.take() {
            debug!("waiting for in-flight connect before teardown");
            let outcome = pending
                .await
                .unwrap_or_else(|e| Err(LifecycleError::ConnectTask(e.to_string())));
            match outcome {
                // landed after stop; never registered
                Ok(conn) => conn.close().await,
                Err(e) => self.report_connect_failure(&e),
            }
        }

        self.unsolicited_close = None;
        if let Some(tap) = self.inbound_tap.take() {
            tap.abort();
        }
        if registered {
            self.registry.unregister_all().await;
        }
        self.establisher.close().await;

        for waiter in std::mem::take(&mut self.waiters) {
            if let Settled::Reply(reply) = waiter {
                let _ = reply.send(());
            }
        }
        self.apply(LinkEvent::TeardownFinished);
        info!("endpoint actor terminated");
    }

    fn settle(&self, waiter: Option<Settled>) {
        match waiter {
            Some(Settled::Reply(reply)) => {
                let _ = reply.send(());
            }
            Some(Settled::Keepalive) => self.post_keepalive(),
            None => {}
        }
    }

    /// Queue a keepalive behind whatever is already in the mailbox.
    fn post_keepalive(&self) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        match tx.try_send(Command::Keepalive) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                let _ = tokio::spawn(async move {
                    let _ = tx.send(cmd).await;
                });
            }
        }
    }

    fn apply(&mut self, event: LinkEvent) {
        match self.state.transition(event) {
            Ok(next) => {
                debug!(from = %self.state, to = %next, ?event, "link state changed");
                self.state = next;
                let _ = self.state_tx.send_replace(next);
            }
            Err(e) => warn!(error = %e, "ignored link transition"),
        }
    }
}

async fn wait_unsolicited_close(close: &mut Option<BoxFuture<'static, ()>>) {
    match close {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

async fn wait_connect(connecting: &mut Option<JoinHandle<ConnectResult>>) -> Result<ConnectResult, JoinError> {
    match connecting {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn log_inbound(mut inbound: broadcast::Receiver<Arc<str>>) {
    loop {
        match inbound.recv().await {
            Ok(frame) => debug!(frame = %frame, "inbound frame"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "inbound tap lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
