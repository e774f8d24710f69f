//! Notification rendering and delivery through an external command.
//!
//! Each worthy event is rendered into a [`NotificationRecord`] and handed to
//! the notification sink by running it as a subprocess:
//!
//! ```text
//! <program> <args...> <target> -s <subject> -m <body> --notify
//! ```
//!
//! With the default configuration this is `gt mail send mayor/ -s ... -m ...
//! --notify`. Exactly one process is started per call and there is no retry;
//! whether a failed delivery still marks the event as handled is decided by
//! the watcher's record policy.
//!
//! # Example
//!
//! ```no_run
//! use discord_watcher::notifier::{Notifier, NotifierConfig};
//! use discord_watcher::types::{Category, Event, EventId, Identity, Origin};
//!
//! #[tokio::main]
//! async fn main() {
//!     let notifier = Notifier::new(NotifierConfig::default());
//!     let event = Event {
//!         id: EventId::Numeric(42),
//!         author: Identity::new("2000", "alice"),
//!         origin: Origin::DirectMessage { channel_id: "500".to_string() },
//!         content: "help".to_string(),
//!         mentions: Vec::new(),
//!         timestamp: None,
//!     };
//!
//!     if let Err(e) = notifier.notify(&event, Category::DirectMessage).await {
//!         eprintln!("delivery failed: {e}");
//!     }
//! }
//! ```

use std::io;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::types::{Category, Event};

/// Maximum number of characters of message content placed in the body.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Default sink program.
pub const DEFAULT_PROGRAM: &str = "gt";

/// Default arguments placed before the destination token.
pub const DEFAULT_ARGS: &[&str] = &["mail", "send"];

/// Default destination token.
pub const DEFAULT_TARGET: &str = "mayor/";

/// Default time allowed for the sink to exit.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Static footer telling the reader how to respond.
const REPLY_FOOTER: &str = "\
---
Reply using Discord MCP tools:
- Send message: mcp__discord-mcp__send_message or send_private_message
- React: mcp__discord-mcp__add_reaction
";

/// Errors that can occur while delivering a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The sink program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting for the sink failed after it started.
    #[error("failed to wait for notification command: {0}")]
    Wait(#[source] io::Error),

    /// The sink exited with a non-zero status.
    #[error("notification command exited with {}: {stderr}", exit_label(.code))]
    Rejected {
        /// Exit code, `None` if the process was killed by a signal.
        code: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The sink did not exit in time and was killed.
    #[error("notification command timed out after {secs}s")]
    TimedOut { secs: u64 },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// How to invoke the notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Program to execute.
    pub program: String,

    /// Arguments placed before the destination token.
    pub args: Vec<String>,

    /// Destination token passed to the sink.
    pub target: String,

    /// How long to wait for the sink before killing it.
    pub timeout: Duration,
}

impl NotifierConfig {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, target: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            target: target.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROGRAM,
            DEFAULT_ARGS.iter().map(|s| (*s).to_string()).collect(),
            DEFAULT_TARGET,
        )
    }
}

/// A rendered notification, alive only for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub subject: String,
    pub body: String,
    pub target: String,
}

impl NotificationRecord {
    /// Arguments appended after the configured program arguments.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        vec![
            self.target.clone(),
            "-s".to_string(),
            self.subject.clone(),
            "-m".to_string(),
            self.body.clone(),
            "--notify".to_string(),
        ]
    }
}

/// Renders events and hands them to the notification sink.
#[derive(Debug, Clone)]
pub struct Notifier {
    config: NotifierConfig,
}

impl Notifier {
    #[must_use]
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Builds the subject and body for `event`.
    #[must_use]
    pub fn render(&self, event: &Event, category: Category) -> NotificationRecord {
        let label = category.label();
        let content = truncate_chars(&event.content, MAX_CONTENT_CHARS);

        let subject = format!("Discord {label}: {}", event.author.display_name);
        let body = format!(
            "Discord {label} received\n\
             \n\
             From: {author} (ID: {author_id})\n\
             Channel: {channel} (ID: {channel_id})\n\
             Message ID: {message_id}\n\
             \n\
             Content:\n\
             {content}\n\
             \n\
             {REPLY_FOOTER}",
            author = event.author.display_name,
            author_id = event.author.id,
            channel = event.origin.name(),
            channel_id = event.origin.channel_id(),
            message_id = event.id,
        );

        NotificationRecord {
            subject,
            body,
            target: self.config.target.clone(),
        }
    }

    /// Renders `event` and delivers it.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the sink cannot be started, exits non-zero, or
    /// exceeds the configured timeout. Failures are also logged here.
    pub async fn notify(&self, event: &Event, category: Category) -> Result<(), NotifyError> {
        let record = self.render(event, category);
        let result = self.deliver(&record).await;

        match &result {
            Ok(()) => info!(
                category = %category,
                author = %event.author.display_name,
                target = %record.target,
                "Notification delivered"
            ),
            Err(e) => error!(
                category = %category,
                message_id = %event.id,
                error = %e,
                "Failed to deliver notification"
            ),
        }

        result
    }

    /// Runs the sink once for an already rendered record.
    ///
    /// # Errors
    ///
    /// See [`Notifier::notify`].
    pub async fn deliver(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .args(record.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %self.config.program,
            subject = %record.subject,
            "Running notification command"
        );

        let child = command.spawn().map_err(|source| NotifyError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(NotifyError::Wait)?,
            Err(_) => {
                return Err(NotifyError::TimedOut {
                    secs: self.config.timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        Err(NotifyError::Rejected {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Returns at most `max` characters of `s`, never splitting a character.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
