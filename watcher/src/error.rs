//! Error types for the Discord watcher.
//!
//! Each module defines its own error enum; [`WatcherError`] collects them for
//! callers that drive the whole pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credential::CredentialError;
use crate::transport::TransportError;

/// Errors that can stop the watcher.
///
/// Notification and state-file failures are not represented here. They are
/// logged where they happen and never end the process.
///
/// # Examples
///
/// ```ignore
/// use discord_watcher::error::WatcherError;
///
/// fn startup() -> Result<(), WatcherError> {
///     let config = Config::from_env()?;
///     let credential = Credential::resolve(&config.mcp_config)?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No bot token could be found.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The connection to the platform failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Returns true if the platform rejected the credential.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Transport(TransportError::AuthFailed(_)))
    }
}

/// A specialized `Result` type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;
