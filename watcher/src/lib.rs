//! Discord watcher - relays direct messages and @-mentions to a notification
//! sink.
//!
//! # Overview
//!
//! The watcher keeps one gateway session open as a bot account. Every inbound
//! message is classified: direct messages and messages mentioning the bot are
//! rendered into a short notification and handed to an external command
//! (`gt mail send mayor/ ...` by default). Everything else is ignored.
//!
//! Message ids that have been notified are kept in a bounded, file-backed set
//! so a restart never notifies the same message twice.
//!
//! # Modules
//!
//! - [`types`]: Events, identities and classification results
//! - [`dedup`]: Persistent bounded set of processed message ids
//! - [`classifier`]: Decides which events need attention
//! - [`notifier`]: Renders notifications and runs the sink command
//! - [`transport`]: Event sources, including the Discord gateway
//! - [`credential`]: Bot token resolution
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for watcher operations
//! - [`logging`]: Stdout and log file subscriber
//! - [`watcher`]: The event loop and shutdown protocol

pub mod classifier;
pub mod config;
pub mod credential;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod transport;
pub mod types;
pub mod watcher;

pub use classifier::classify;
pub use config::{Config, ConfigError};
pub use credential::{Credential, CredentialError, TokenSource};
pub use dedup::{DedupStore, StateError};
pub use error::{Result, WatcherError};
pub use notifier::{NotificationRecord, Notifier, NotifierConfig, NotifyError};
pub use transport::{GatewayConfig, GatewayTransport, Transport, TransportError};
pub use types::{Category, Classification, Event, EventId, Identity, IgnoreReason, Origin};
pub use watcher::{RecordPolicy, Watcher, WatcherState};
