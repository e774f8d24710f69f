//! Bot token resolution.
//!
//! The token is taken from the `DISCORD_TOKEN` environment variable. When that
//! is unset or empty, the MCP configuration file (`.mcp.json` by default) is
//! searched for a server entry whose name contains `discord` and whose `env`
//! block carries `DISCORD_TOKEN`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "discord-mcp": { "env": { "DISCORD_TOKEN": "..." } }
//!   }
//! }
//! ```
//!
//! The token is held in a [`Zeroizing`] buffer and is never logged.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Environment variable holding the bot token.
pub const ENV_TOKEN: &str = "DISCORD_TOKEN";

/// Substring an MCP server name must contain to be considered.
const SERVER_NAME_HINT: &str = "discord";

/// Errors that can occur while resolving the token.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Neither the environment nor the MCP config provided a token.
    #[error("DISCORD_TOKEN not found in environment or {}", .mcp_config.display())]
    NotFound { mcp_config: PathBuf },
}

/// Where the token was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// The `DISCORD_TOKEN` environment variable.
    Environment,
    /// The `env` block of the named MCP server entry.
    McpConfig { server: String },
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "{ENV_TOKEN} environment variable"),
            Self::McpConfig { server } => write!(f, "MCP server '{server}'"),
        }
    }
}

/// A resolved bot token.
pub struct Credential {
    token: Zeroizing<String>,
    source: TokenSource,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>, source: TokenSource) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            source,
        }
    }

    /// Resolves the token from the process environment, then `mcp_config`.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if no source yields a token.
    pub fn resolve(mcp_config: &Path) -> Result<Self, CredentialError> {
        Self::resolve_from(std::env::var(ENV_TOKEN).ok(), mcp_config)
    }

    /// Resolves from an explicit environment value, then `mcp_config`.
    ///
    /// An empty `env_value` counts as unset. An unreadable or malformed MCP
    /// file is logged and treated as holding no token.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if no source yields a token.
    pub fn resolve_from(
        env_value: Option<String>,
        mcp_config: &Path,
    ) -> Result<Self, CredentialError> {
        if let Some(token) = env_value.filter(|t| !t.trim().is_empty()) {
            return Ok(Self::new(token, TokenSource::Environment));
        }

        match token_from_mcp_config(mcp_config) {
            Ok(Some((server, token))) => {
                info!(server = %server, "Found Discord token in MCP config");
                Ok(Self::new(token, TokenSource::McpConfig { server }))
            }
            Ok(None) => Err(CredentialError::NotFound {
                mcp_config: mcp_config.to_path_buf(),
            }),
            Err(e) => {
                warn!(
                    path = %mcp_config.display(),
                    error = %e,
                    "Could not load token from MCP config"
                );
                Err(CredentialError::NotFound {
                    mcp_config: mcp_config.to_path_buf(),
                })
            }
        }
    }

    /// The raw token. Do not log it.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn source(&self) -> &TokenSource {
        &self.source
    }
}

#[derive(Debug, Deserialize)]
struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, McpServer>,
}

#[derive(Debug, Deserialize)]
struct McpServer {
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
enum McpReadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Returns `(server name, token)` from the first matching server entry.
fn token_from_mcp_config(path: &Path) -> Result<Option<(String, String)>, McpReadError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)?;
    let config: McpConfig = serde_json::from_str(&contents)?;

    let found = config.mcp_servers.into_iter().find_map(|(name, mut server)| {
        if !name.to_lowercase().contains(SERVER_NAME_HINT) {
            return None;
        }
        server
            .env
            .remove(ENV_TOKEN)
            .filter(|t| !t.trim().is_empty())
            .map(|token| (name, token))
    });

    Ok(found)
}
