//! Integration tests for the watcher pipeline.
//!
//! These tests drive a [`Watcher`] with a scripted in-memory transport and a
//! `sh` notification sink that appends each subject to a file, then check
//! which notifications were sent and which ids ended up in the state file.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use discord_watcher::credential::{Credential, TokenSource};
use discord_watcher::dedup::DedupStore;
use discord_watcher::error::WatcherError;
use discord_watcher::notifier::{Notifier, NotifierConfig};
use discord_watcher::transport::{Transport, TransportError};
use discord_watcher::types::{Event, EventId, Identity, Origin};
use discord_watcher::watcher::{RecordPolicy, Watcher, WatcherState};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Test Helpers
// =============================================================================

/// Transport that replays a fixed script of events.
#[derive(Default)]
struct ScriptedTransport {
    identity: Option<Identity>,
    connect_error: Option<TransportError>,
    script: VecDeque<Result<Event, TransportError>>,
    /// Pend forever once the script is exhausted instead of ending the stream.
    hold_open: bool,
    closed: bool,
}

impl ScriptedTransport {
    fn new(events: Vec<Event>) -> Self {
        Self {
            identity: Some(me()),
            script: events.into_iter().map(Ok).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self, _credential: &Credential) -> Result<Identity, TransportError> {
        if let Some(err) = self.connect_error.take() {
            return Err(err);
        }
        Ok(self.identity.clone().unwrap_or_else(me))
    }

    async fn next_event(&mut self) -> Result<Option<Event>, TransportError> {
        match self.script.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(err)) => Err(err),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Scratch directory holding the state file and the sink's call log.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn state_file(&self) -> PathBuf {
        self.dir.path().join("daemon").join("discord_watcher_state.json")
    }

    fn calls_file(&self) -> PathBuf {
        self.dir.path().join("calls.txt")
    }

    /// Subjects passed to the sink, in call order.
    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_file())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Sink that logs the subject (`$3`) and exits with `exit_code`.
    fn notifier(&self, exit_code: i32) -> Notifier {
        let script = format!(
            "printf '%s\\n' \"$3\" >> '{}'; echo 'mail queue unavailable' >&2; exit {exit_code}",
            self.calls_file().display()
        );
        Notifier::new(
            NotifierConfig::new("sh", vec!["-c".to_string(), script, "sink".to_string()], "mayor/")
                .with_timeout(Duration::from_secs(10)),
        )
    }

    fn store(&self) -> DedupStore {
        DedupStore::load(self.state_file(), 1000)
    }

    fn persisted_ids(&self) -> Vec<EventId> {
        DedupStore::load(self.state_file(), 1000).ids().cloned().collect()
    }
}

fn me() -> Identity {
    Identity::new("1000", "watcher-bot")
}

fn credential() -> Credential {
    Credential::new("test-token", TokenSource::Environment)
}

fn dm(id: u64, author: &str, content: &str) -> Event {
    Event {
        id: EventId::Numeric(id),
        author: Identity::new(format!("{author}-id"), author),
        origin: Origin::DirectMessage {
            channel_id: "500".to_string(),
        },
        content: content.to_string(),
        mentions: Vec::new(),
        timestamp: None,
    }
}

fn channel_message(id: u64, author: &str, mentions: Vec<Identity>) -> Event {
    Event {
        id: EventId::Numeric(id),
        author: Identity::new(format!("{author}-id"), author),
        origin: Origin::Channel {
            channel_id: "600".to_string(),
            name: "general".to_string(),
            guild_id: "700".to_string(),
        },
        content: "hello there".to_string(),
        mentions,
        timestamp: None,
    }
}

async fn run_to_end(watcher: &mut Watcher<ScriptedTransport>) -> Result<(), WatcherError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(30), watcher.run(&credential(), shutdown_rx))
        .await
        .expect("watcher should finish")
}

// =============================================================================
// Classification Scenarios
// =============================================================================

#[tokio::test]
async fn test_direct_message_is_notified_and_recorded() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help")]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls(), vec!["Discord DM: alice".to_string()]);
    assert_eq!(fx.persisted_ids(), vec![EventId::Numeric(42)]);
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(watcher.transport().closed);
}

#[tokio::test]
async fn test_mention_is_notified_and_recorded() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![channel_message(43, "bob", vec![me()])]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls(), vec!["Discord MENTION: bob".to_string()]);
    assert!(watcher.store().contains(&EventId::Numeric(43)));
    assert_eq!(fx.persisted_ids(), vec![EventId::Numeric(43)]);
}

#[tokio::test]
async fn test_unaddressed_channel_message_is_ignored() {
    let fx = Fixture::new();
    let other = Identity::new("3000", "carol");
    let transport = ScriptedTransport::new(vec![channel_message(44, "bob", vec![other])]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert!(fx.calls().is_empty());
    assert!(!watcher.store().contains(&EventId::Numeric(44)));
}

#[tokio::test]
async fn test_duplicate_delivery_notifies_once() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help"), dm(42, "alice", "help")]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls().len(), 1);
    assert_eq!(watcher.store().len(), 1);
}

#[tokio::test]
async fn test_own_messages_are_never_notified() {
    let fx = Fixture::new();
    let mut own_dm = dm(50, "watcher-bot", "sent by me");
    own_dm.author = me();
    let mut own_mention = channel_message(51, "watcher-bot", vec![me()]);
    own_mention.author = me();

    let transport = ScriptedTransport::new(vec![own_dm, own_mention]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert!(fx.calls().is_empty());
    assert!(watcher.store().is_empty());
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test]
async fn test_failed_delivery_is_still_recorded_by_default() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help"), dm(45, "dave", "hi")]);
    let mut watcher = Watcher::new(transport, fx.notifier(1), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    // Both events were attempted and the loop kept going after the failure.
    assert_eq!(fx.calls().len(), 2);
    assert_eq!(
        fx.persisted_ids(),
        vec![EventId::Numeric(42), EventId::Numeric(45)]
    );
}

#[tokio::test]
async fn test_failed_delivery_retried_under_success_policy() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help"), dm(42, "alice", "help")]);
    let mut watcher = Watcher::new(transport, fx.notifier(1), fx.store())
        .with_record_policy(RecordPolicy::AfterSuccess);

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls().len(), 2);
    assert!(watcher.store().is_empty());
}

#[tokio::test]
async fn test_missing_sink_program_does_not_stop_watcher() {
    let fx = Fixture::new();
    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help")]);
    let notifier = Notifier::new(NotifierConfig::new(
        "definitely-not-a-real-program-3f9a",
        Vec::new(),
        "mayor/",
    ));
    let mut watcher = Watcher::new(transport, notifier, fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert!(watcher.store().contains(&EventId::Numeric(42)));
}

#[tokio::test]
async fn test_corrupt_state_starts_empty_and_renotifies() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.state_file().parent().unwrap()).unwrap();
    fs::write(fx.state_file(), r#"{"processed_messages": [42, 4"#).unwrap();

    let store = fx.store();
    assert!(store.is_empty());

    let transport = ScriptedTransport::new(vec![dm(42, "alice", "help")]);
    let mut watcher = Watcher::new(transport, fx.notifier(0), store);

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls(), vec!["Discord DM: alice".to_string()]);
    assert_eq!(fx.persisted_ids(), vec![EventId::Numeric(42)]);
}

#[tokio::test]
async fn test_restart_remembers_processed_ids() {
    let fx = Fixture::new();

    let mut first = Watcher::new(
        ScriptedTransport::new(vec![dm(42, "alice", "help")]),
        fx.notifier(0),
        fx.store(),
    );
    assert_ok!(run_to_end(&mut first).await);

    let mut second = Watcher::new(
        ScriptedTransport::new(vec![dm(42, "alice", "help"), dm(46, "alice", "again")]),
        fx.notifier(0),
        fx.store(),
    );
    assert_ok!(run_to_end(&mut second).await);

    assert_eq!(
        fx.calls(),
        vec!["Discord DM: alice".to_string(), "Discord DM: alice".to_string()]
    );
    assert_eq!(
        fx.persisted_ids(),
        vec![EventId::Numeric(42), EventId::Numeric(46)]
    );
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let fx = Fixture::new();
    let mut transport = ScriptedTransport::new(Vec::new());
    transport.script.push_back(Err(TransportError::Malformed {
        kind: "MESSAGE_CREATE".to_string(),
        message: "missing field `author`".to_string(),
    }));
    transport.script.push_back(Ok(dm(42, "alice", "help")));
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    assert_ok!(run_to_end(&mut watcher).await);

    assert_eq!(fx.calls().len(), 1);
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let fx = Fixture::new();
    let transport = ScriptedTransport {
        connect_error: Some(TransportError::AuthFailed("Authentication failed.".to_string())),
        ..ScriptedTransport::default()
    };
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    let err = assert_err!(run_to_end(&mut watcher).await);

    assert!(err.is_auth_failure());
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(watcher.identity().is_none());
    assert!(fx.calls().is_empty());
}

#[tokio::test]
async fn test_connection_loss_flushes_state_and_fails() {
    let fx = Fixture::new();
    let mut transport = ScriptedTransport::new(vec![dm(42, "alice", "help")]);
    transport.script.push_back(Err(TransportError::HeartbeatTimeout));
    transport.script.push_back(Ok(dm(47, "alice", "never seen")));
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    let err = assert_err!(run_to_end(&mut watcher).await);

    assert!(matches!(
        err,
        WatcherError::Transport(TransportError::HeartbeatTimeout)
    ));
    assert_eq!(fx.persisted_ids(), vec![EventId::Numeric(42)]);
    assert!(watcher.transport().closed);
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_signal_stops_idle_watcher() {
    let fx = Fixture::new();
    let mut transport = ScriptedTransport::new(vec![dm(42, "alice", "help")]);
    transport.hold_open = true;
    let mut watcher = Watcher::new(transport, fx.notifier(0), fx.store());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let credential = credential();
    let calls_file = fx.calls_file();

    let trigger = async move {
        // Wait until the first event has been handled, then request shutdown.
        for _ in 0..200 {
            if Path::new(&calls_file).exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        shutdown_tx.send(true).expect("watcher is listening");
    };

    let (result, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(30), watcher.run(&credential, shutdown_rx)),
        trigger
    );

    assert_ok!(result.expect("watcher should stop after shutdown"));
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(watcher.transport().closed);
    assert_eq!(fx.persisted_ids(), vec![EventId::Numeric(42)]);
}

#[tokio::test]
async fn test_shutdown_before_connect_returns_ok() {
    let fx = Fixture::new();
    let mut watcher = Watcher::new(ScriptedTransport::new(Vec::new()), fx.notifier(0), fx.store());

    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let result = watcher.run(&credential(), shutdown_rx).await;
    drop(shutdown_tx);

    assert_ok!(result);
    assert!(watcher.identity().is_none());
    assert_eq!(watcher.state(), WatcherState::Stopped);
}
