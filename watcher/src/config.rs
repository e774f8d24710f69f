//! Configuration module for the Discord watcher.
//!
//! This module handles parsing configuration from environment variables. The
//! configuration is built once at startup and passed explicitly into each
//! component.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `DISCORD_TOKEN` | No* | - | Bot token (see [`crate::credential`]) |
//! | `DISCORD_WATCHER_STATE_FILE` | No | `daemon/discord_watcher_state.json` | Processed-id state file |
//! | `DISCORD_WATCHER_LOG_FILE` | No | `daemon/discord_watcher.log` | Log file |
//! | `DISCORD_WATCHER_MCP_CONFIG` | No | `.mcp.json` | Fallback token source |
//! | `DISCORD_WATCHER_STATE_CAPACITY` | No | 1000 | Max processed ids retained |
//! | `DISCORD_WATCHER_NOTIFY_CMD` | No | `gt mail send` | Sink program and leading args |
//! | `DISCORD_WATCHER_NOTIFY_TARGET` | No | `mayor/` | Sink destination token |
//! | `DISCORD_WATCHER_NOTIFY_TIMEOUT_SECS` | No | 30 | Sink timeout |
//! | `DISCORD_WATCHER_RECORD_POLICY` | No | `attempt` | `attempt` or `success` |
//! | `DISCORD_GATEWAY_URL` | No | discovered | Fixed gateway URL |
//! | `DISCORD_API_BASE` | No | `https://discord.com/api/v10` | REST base for discovery |
//!
//! \* The token is resolved separately, falling back to the MCP config file.
//!
//! # Example
//!
//! ```no_run
//! use discord_watcher::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("State file: {}", config.state_file.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::dedup::DEFAULT_CAPACITY;
use crate::notifier::{NotifierConfig, DEFAULT_TARGET, DEFAULT_TIMEOUT_SECS};
use crate::watcher::RecordPolicy;

/// Default state file, relative to the working directory.
const DEFAULT_STATE_FILE: &str = "daemon/discord_watcher_state.json";

/// Default log file, relative to the working directory.
const DEFAULT_LOG_FILE: &str = "daemon/discord_watcher.log";

/// Default MCP configuration file, relative to the working directory.
const DEFAULT_MCP_CONFIG: &str = ".mcp.json";

/// Default notification command line.
const DEFAULT_NOTIFY_CMD: &str = "gt mail send";

/// Default Discord REST API base.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the Discord watcher.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where processed message ids are persisted.
    pub state_file: PathBuf,

    /// Where log lines are written in addition to stdout.
    pub log_file: PathBuf,

    /// MCP configuration consulted when `DISCORD_TOKEN` is unset.
    pub mcp_config: PathBuf,

    /// Maximum number of processed ids retained.
    pub state_capacity: usize,

    /// How the notification sink is invoked.
    pub notifier: NotifierConfig,

    /// Whether failed deliveries still mark an event as handled.
    pub record_policy: RecordPolicy,

    /// Fixed gateway URL. If `None`, the URL is discovered via the REST API.
    pub gateway_url: Option<String>,

    /// Discord REST API base URL.
    pub api_base: String,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `DISCORD_WATCHER_STATE_CAPACITY` or `DISCORD_WATCHER_NOTIFY_TIMEOUT_SECS`
    ///   is not a positive integer
    /// - `DISCORD_WATCHER_NOTIFY_CMD` is blank
    /// - `DISCORD_WATCHER_RECORD_POLICY` is not `attempt` or `success`
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_file = env_path("DISCORD_WATCHER_STATE_FILE", DEFAULT_STATE_FILE);
        let log_file = env_path("DISCORD_WATCHER_LOG_FILE", DEFAULT_LOG_FILE);
        let mcp_config = env_path("DISCORD_WATCHER_MCP_CONFIG", DEFAULT_MCP_CONFIG);

        let state_capacity =
            env_positive("DISCORD_WATCHER_STATE_CAPACITY", DEFAULT_CAPACITY as u64)? as usize;

        let command_line = env::var("DISCORD_WATCHER_NOTIFY_CMD")
            .unwrap_or_else(|_| DEFAULT_NOTIFY_CMD.to_string());
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next().ok_or_else(|| ConfigError::InvalidValue {
            key: "DISCORD_WATCHER_NOTIFY_CMD".to_string(),
            message: "command must not be empty".to_string(),
        })?;
        let args: Vec<String> = words.collect();

        let target = env::var("DISCORD_WATCHER_NOTIFY_TARGET")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET.to_string());

        let timeout_secs =
            env_positive("DISCORD_WATCHER_NOTIFY_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        let notifier = NotifierConfig::new(program, args, target)
            .with_timeout(Duration::from_secs(timeout_secs));

        let record_policy = match env::var("DISCORD_WATCHER_RECORD_POLICY") {
            Ok(val) => val.parse::<RecordPolicy>().map_err(|message| ConfigError::InvalidValue {
                key: "DISCORD_WATCHER_RECORD_POLICY".to_string(),
                message,
            })?,
            Err(_) => RecordPolicy::default(),
        };

        let gateway_url = env::var("DISCORD_GATEWAY_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        let api_base = env::var("DISCORD_API_BASE")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            state_file,
            log_file,
            mcp_config,
            state_capacity,
            notifier,
            record_policy,
            gateway_url,
            api_base,
        })
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Parses a positive integer variable, falling back to `default` when unset.
fn env_positive(key: &str, default: u64) -> Result<u64, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };

    let n = val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;

    if n == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }

    Ok(n)
}
