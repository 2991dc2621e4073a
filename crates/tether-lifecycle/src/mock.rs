//! Recording subscribers for deterministic tests.
//!
//! Every call lands in a shared [`Journal`] as `"<stage>:<name>"`, next to the
//! `open:`/`close:` entries written by the mock transport, so tests can assert
//! on cross-component ordering.

use async_trait::async_trait;
use tether_transport::ConnectionRef;
use tether_transport::mock::Journal;

use crate::errors::SubscriberError;
use crate::subscriber::{Subscriber, SubscriberContext};

/// Stage at which a [`RecordingSubscriber`] fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailAt {
    /// Never fail.
    Never,
    /// The factory refuses to build the subscriber.
    Construct,
    /// `register()` fails.
    Register,
    /// `keepalive()` fails.
    Keepalive,
    /// `unregister()` fails.
    Unregister,
}

/// Subscriber that journals each lifecycle call and sends a frame on the
/// bound connection when it registers.
pub struct RecordingSubscriber {
    name: String,
    connection: ConnectionRef,
    journal: Journal,
    fail_at: FailAt,
}

impl RecordingSubscriber {
    fn step(&self, stage: &str, fail: FailAt) -> Result<(), SubscriberError> {
        self.journal.record(format!("{stage}:{}", self.name));
        if self.fail_at == fail {
            return Err(SubscriberError::Failed(format!("{} {stage} failed", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn register(&mut self) -> Result<(), SubscriberError> {
        self.step("register", FailAt::Register)?;
        self.connection.send_text(format!("sub:{}", self.name)).await?;
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<(), SubscriberError> {
        self.step("keepalive", FailAt::Keepalive)
    }

    async fn unregister(&mut self) -> Result<(), SubscriberError> {
        self.step("unregister", FailAt::Unregister)
    }
}

/// Factory for a [`RecordingSubscriber`] that never fails.
pub fn recording(
    name: &str,
    journal: &Journal,
) -> impl Fn(&SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> + Send + Sync + 'static {
    failing(name, journal, FailAt::Never)
}

/// Factory for a [`RecordingSubscriber`] that fails at `fail_at`.
pub fn failing(
    name: &str,
    journal: &Journal,
    fail_at: FailAt,
) -> impl Fn(&SubscriberContext) -> Result<Box<dyn Subscriber>, SubscriberError> + Send + Sync + 'static {
    let name = name.to_string();
    let journal = journal.clone();
    move |ctx: &SubscriberContext| {
        if fail_at == FailAt::Construct {
            journal.record(format!("construct_failed:{name}"));
            return Err(SubscriberError::Construct(format!("{name} refused to build")));
        }
        Ok(Box::new(RecordingSubscriber {
            name: name.clone(),
            connection: ctx.connection.clone(),
            journal: journal.clone(),
            fail_at,
        }) as Box<dyn Subscriber>)
    }
}
