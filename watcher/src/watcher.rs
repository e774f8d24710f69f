//! The watcher loop.
//!
//! [`Watcher`] ties a [`Transport`] to the classifier, the [`Notifier`] and the
//! [`DedupStore`]. It runs as an explicit loop over
//! [`Transport::next_event`], handling one event at a time:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> ShuttingDown -> Stopped
//!                      \             \
//!                       +-------------+--> Stopped   (fatal transport error)
//! ```
//!
//! Shutdown is requested through a `tokio::sync::watch` flag. The flag is
//! only observed between events, so an event whose notification is in flight
//! is always finished and recorded before the loop exits.

use std::fmt;
use std::str::FromStr;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::credential::Credential;
use crate::dedup::DedupStore;
use crate::error::WatcherError;
use crate::notifier::Notifier;
use crate::transport::{Transport, TransportError};
use crate::types::{Classification, Event, Identity};

/// When a notified event's id is written to the dedup store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordPolicy {
    /// Record after every delivery attempt, successful or not. A failed
    /// notification is never retried.
    #[default]
    AfterAttempt,

    /// Record only after the sink accepted the notification. A failed
    /// notification is retried if the same event is seen again.
    AfterSuccess,
}

impl RecordPolicy {
    /// Returns true if the id should be recorded given the delivery outcome.
    #[must_use]
    pub fn should_record(self, delivered: bool) -> bool {
        match self {
            Self::AfterAttempt => true,
            Self::AfterSuccess => delivered,
        }
    }
}

impl FromStr for RecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "attempt" => Ok(Self::AfterAttempt),
            "success" => Ok(Self::AfterSuccess),
            _ => Err(format!("expected 'attempt' or 'success', got '{s}'")),
        }
    }
}

/// Lifecycle of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of racing the shutdown flag against the transport.
enum Step<T> {
    Shutdown,
    Ready(T),
}

/// Relays direct messages and mentions from a transport to the notifier.
pub struct Watcher<T: Transport> {
    transport: T,
    notifier: Notifier,
    store: DedupStore,
    policy: RecordPolicy,
    state: WatcherState,
    identity: Option<Identity>,
}

impl<T: Transport> Watcher<T> {
    /// Creates a watcher with the default [`RecordPolicy`].
    ///
    /// `store` is expected to be loaded already.
    #[must_use]
    pub fn new(transport: T, notifier: Notifier, store: DedupStore) -> Self {
        Self {
            transport,
            notifier,
            store,
            policy: RecordPolicy::default(),
            state: WatcherState::Disconnected,
            identity: None,
        }
    }

    #[must_use]
    pub fn with_record_policy(mut self, policy: RecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn state(&self) -> WatcherState {
        self.state
    }

    #[must_use]
    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The account the session is bound to, once connected.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Connects and processes events until shutdown or a fatal error.
    ///
    /// Returns `Ok(())` when `shutdown` is set or the event stream ends
    /// cleanly. In every case the dedup store is flushed and the transport
    /// closed before returning.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::Transport` if the connection cannot be
    /// established or fails fatally while running.
    pub async fn run(
        &mut self,
        credential: &Credential,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WatcherError> {
        self.set_state(WatcherState::Connecting);

        let connected = tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown) => Step::Shutdown,
            result = self.transport.connect(credential) => Step::Ready(result),
        };

        let identity = match connected {
            Step::Shutdown => {
                info!("Shutdown requested while connecting");
                self.shutdown().await;
                return Ok(());
            }
            Step::Ready(Ok(identity)) => identity,
            Step::Ready(Err(e)) => {
                error!(error = %e, "Failed to connect");
                return Err(self.fail(e).await);
            }
        };

        info!(user = %identity, "Connected, watching for DMs and mentions");
        self.identity = Some(identity.clone());
        self.set_state(WatcherState::Connected);

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => Step::Shutdown,
                next = self.transport.next_event() => Step::Ready(next),
            };

            match next {
                Step::Shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                Step::Ready(Ok(Some(event))) => {
                    self.handle_event(&identity, &event).await;
                }
                Step::Ready(Ok(None)) => {
                    info!("Event stream ended");
                    break;
                }
                Step::Ready(Err(e)) if !e.is_fatal() => {
                    warn!(error = %e, "Skipping unreadable event");
                }
                Step::Ready(Err(e)) => {
                    error!(error = %e, "Connection lost");
                    return Err(self.fail(e).await);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Classifies one event and notifies if it needs attention.
    async fn handle_event(&mut self, identity: &Identity, event: &Event) -> Classification {
        let classification = classify(event, identity, &self.store);

        let Classification::Notify(category) = classification else {
            debug!(message_id = %event.id, ?classification, "Event ignored");
            return classification;
        };

        info!(
            category = %category,
            author = %event.author,
            channel = %event.origin.name(),
            message_id = %event.id,
            "Message needs attention"
        );

        let delivered = self.notifier.notify(event, category).await.is_ok();

        if self.policy.should_record(delivered) {
            self.store.record(event.id.clone());
        } else {
            warn!(
                message_id = %event.id,
                "Notification failed, leaving message unrecorded"
            );
        }

        classification
    }

    async fn shutdown(&mut self) {
        self.set_state(WatcherState::ShuttingDown);
        self.persist();
        self.transport.close().await;
        self.set_state(WatcherState::Stopped);
        info!("Watcher stopped");
    }

    async fn fail(&mut self, err: TransportError) -> WatcherError {
        self.persist();
        self.transport.close().await;
        self.set_state(WatcherState::Stopped);
        WatcherError::Transport(err)
    }

    fn persist(&self) {
        if let Err(e) = self.store.flush() {
            error!(path = %self.store.path().display(), error = %e, "Failed to save state");
        }
    }

    fn set_state(&mut self, next: WatcherState) {
        debug!(from = %self.state, to = %next, "Watcher state change");
        self.state = next;
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone
/// without having set it.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
