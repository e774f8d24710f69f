//! Event types observed by the watcher.
//!
//! This module defines the platform-neutral view of an inbound message that
//! flows through the classify → notify → record pipeline. Transports convert
//! their wire payloads into [`Event`] values; nothing downstream depends on the
//! gateway's JSON shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned message identifier.
///
/// Discord snowflakes are decimal `u64` values and are kept numeric so the
/// persisted state stays compact; anything else is carried as an opaque string.
/// Serializes untagged, so the state file holds plain JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Numeric(u64),
    Text(String),
}

impl EventId {
    /// Parses a wire identifier, preferring the numeric form.
    ///
    /// # Examples
    ///
    /// ```
    /// use discord_watcher::types::EventId;
    ///
    /// assert_eq!(EventId::parse("42"), EventId::Numeric(42));
    /// assert_eq!(EventId::parse("abc"), EventId::Text("abc".to_string()));
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<u64>()
            .map(Self::Numeric)
            .unwrap_or_else(|_| Self::Text(raw.to_string()))
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A user on the platform: stable id plus a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable platform id. Identity comparisons use this field only.
    pub id: String,

    /// Display name as shown in notifications.
    pub display_name: String,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Returns true if both values refer to the same account.
    #[must_use]
    pub fn same_account(&self, other: &Identity) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Where a message was posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A one-to-one direct message channel.
    DirectMessage { channel_id: String },

    /// A named channel inside a guild.
    Channel {
        channel_id: String,
        name: String,
        guild_id: String,
    },
}

impl Origin {
    #[must_use]
    pub fn channel_id(&self) -> &str {
        match self {
            Self::DirectMessage { channel_id } | Self::Channel { channel_id, .. } => channel_id,
        }
    }

    /// Human-readable channel name; direct messages render as `DM`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::DirectMessage { .. } => "DM",
            Self::Channel { name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_direct_message(&self) -> bool {
        matches!(self, Self::DirectMessage { .. })
    }
}

/// One inbound message observed on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Platform message id, used for deduplication.
    pub id: EventId,

    /// Who wrote the message.
    pub author: Identity,

    /// Channel the message was posted in.
    pub origin: Origin,

    /// Raw text content. May be empty (attachments only) or very long.
    pub content: String,

    /// Accounts referenced by the message.
    pub mentions: Vec<Identity>,

    /// Platform timestamp, when the payload carried one.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Returns true if `identity` appears in the mention list.
    #[must_use]
    pub fn mentions(&self, identity: &Identity) -> bool {
        self.mentions.iter().any(|m| m.same_account(identity))
    }
}

/// Why an event is worth a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    DirectMessage,
    Mention,
}

impl Category {
    /// Short label used in notification subjects.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::DirectMessage => "DM",
            Self::Mention => "MENTION",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an event was dropped without notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Written by the watcher's own account.
    OwnMessage,
    /// Id already present in the dedup store.
    AlreadyProcessed,
    /// Neither a direct message nor a mention.
    NotAddressed,
}

/// Result of classifying an event. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Notify(Category),
    Ignored(IgnoreReason),
}

impl Classification {
    #[must_use]
    pub fn is_worthy(self) -> bool {
        matches!(self, Self::Notify(_))
    }

    #[must_use]
    pub fn category(self) -> Option<Category> {
        match self {
            Self::Notify(category) => Some(category),
            Self::Ignored(_) => None,
        }
    }
}
