//! Gateway wire payloads.
//!
//! Only the fields the watcher reads are modelled; everything else in the
//! JSON is ignored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Event, EventId, Identity, Origin};

pub(crate) const OP_DISPATCH: u8 = 0;
pub(crate) const OP_HEARTBEAT: u8 = 1;
pub(crate) const OP_IDENTIFY: u8 = 2;
pub(crate) const OP_RECONNECT: u8 = 7;
pub(crate) const OP_INVALID_SESSION: u8 = 9;
pub(crate) const OP_HELLO: u8 = 10;
pub(crate) const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

/// Intents needed to see DMs, guild messages and their content.
pub(crate) const WATCHER_INTENTS: u64 = INTENT_GUILDS
    | INTENT_GUILD_MEMBERS
    | INTENT_GUILD_MESSAGES
    | INTENT_DIRECT_MESSAGES
    | INTENT_MESSAGE_CONTENT;

/// Envelope of every gateway frame.
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Serialize)]
struct IdentifyProperties<'a> {
    os: &'a str,
    browser: &'a str,
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    intents: u64,
    properties: IdentifyProperties<'a>,
}

#[derive(Debug, Serialize)]
struct Outgoing<T> {
    op: u8,
    d: T,
}

/// Serializes the Identify frame.
pub(crate) fn identify_frame(token: &str) -> String {
    let frame = Outgoing {
        op: OP_IDENTIFY,
        d: IdentifyData {
            token,
            intents: WATCHER_INTENTS,
            properties: IdentifyProperties {
                os: std::env::consts::OS,
                browser: env!("CARGO_PKG_NAME"),
                device: env!("CARGO_PKG_NAME"),
            },
        },
    };
    // Serializing plain structs of strings and integers cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Serializes a Heartbeat frame carrying the last seen sequence number.
pub(crate) fn heartbeat_frame(sequence: Option<u64>) -> String {
    serde_json::to_string(&Outgoing {
        op: OP_HEARTBEAT,
        d: sequence,
    })
    .unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl User {
    /// `name#1234` for legacy accounts, plain `name` otherwise.
    pub fn display_name(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }

    pub fn into_identity(self) -> Identity {
        let display_name = self.display_name();
        Identity::new(self.id, display_name)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Ready {
    pub user: User,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GuildCreate {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageCreate {
    /// Converts to an [`Event`], naming guild channels from `channel_names`.
    ///
    /// Messages without a `guild_id` are direct messages. Unknown guild
    /// channels fall back to their id as the name.
    pub fn into_event(self, channel_names: &HashMap<String, String>) -> Event {
        let origin = match self.guild_id {
            None => Origin::DirectMessage {
                channel_id: self.channel_id,
            },
            Some(guild_id) => Origin::Channel {
                name: channel_names
                    .get(&self.channel_id)
                    .cloned()
                    .unwrap_or_else(|| self.channel_id.clone()),
                channel_id: self.channel_id,
                guild_id,
            },
        };

        Event {
            id: EventId::parse(&self.id),
            author: self.author.into_identity(),
            origin,
            content: self.content,
            mentions: self.mentions.into_iter().map(User::into_identity).collect(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intents_value() {
        assert_eq!(WATCHER_INTENTS, 37379);
    }

    #[test]
    fn test_identify_frame_shape() {
        let frame: Value = serde_json::from_str(&identify_frame("tkn")).unwrap();

        assert_eq!(frame["op"], 2);
        assert_eq!(frame["d"]["token"], "tkn");
        assert_eq!(frame["d"]["intents"], WATCHER_INTENTS);
        assert_eq!(frame["d"]["properties"]["browser"], "discord-watcher");
    }

    #[test]
    fn test_heartbeat_frame() {
        assert_eq!(heartbeat_frame(None), r#"{"op":1,"d":null}"#);
        assert_eq!(heartbeat_frame(Some(42)), r#"{"op":1,"d":42}"#);
    }

    #[test]
    fn test_display_name_with_and_without_discriminator() {
        let legacy = User {
            id: "1".to_string(),
            username: "alice".to_string(),
            discriminator: Some("1234".to_string()),
        };
        let modern = User {
            id: "2".to_string(),
            username: "bob".to_string(),
            discriminator: Some("0".to_string()),
        };

        assert_eq!(legacy.display_name(), "alice#1234");
        assert_eq!(modern.display_name(), "bob");
    }

    #[test]
    fn test_dm_message_into_event() {
        let raw = json!({
            "id": "42",
            "channel_id": "500",
            "author": {"id": "2000", "username": "alice", "discriminator": "0"},
            "content": "help",
            "mentions": [],
            "timestamp": "2024-05-01T12:00:00.000000+00:00"
        });
        let message: MessageCreate = serde_json::from_value(raw).unwrap();

        let event = message.into_event(&HashMap::new());

        assert_eq!(event.id, EventId::Numeric(42));
        assert_eq!(event.author, Identity::new("2000", "alice"));
        assert!(event.origin.is_direct_message());
        assert_eq!(event.origin.channel_id(), "500");
        assert_eq!(event.content, "help");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_guildless_message_is_direct_even_when_channel_is_named() {
        let raw = json!({
            "id": "46",
            "channel_id": "501",
            "author": {"id": "2002", "username": "carol"},
            "content": "anyone around?"
        });
        let message: MessageCreate = serde_json::from_value(raw).unwrap();
        let names = HashMap::from([("501".to_string(), "friends".to_string())]);

        let event = message.into_event(&names);

        assert_eq!(
            event.origin,
            Origin::DirectMessage {
                channel_id: "501".to_string()
            }
        );
    }

    #[test]
    fn test_guild_message_uses_cached_channel_name() {
        let raw = json!({
            "id": "43",
            "channel_id": "600",
            "guild_id": "700",
            "author": {"id": "2001", "username": "bob"},
            "content": "<@1000> ping",
            "mentions": [{"id": "1000", "username": "watcher"}]
        });
        let message: MessageCreate = serde_json::from_value(raw).unwrap();
        let names = HashMap::from([("600".to_string(), "general".to_string())]);

        let event = message.into_event(&names);

        assert_eq!(
            event.origin,
            Origin::Channel {
                channel_id: "600".to_string(),
                name: "general".to_string(),
                guild_id: "700".to_string(),
            }
        );
        assert_eq!(event.mentions, vec![Identity::new("1000", "watcher")]);
    }

    #[test]
    fn test_unknown_channel_falls_back_to_id() {
        let raw = json!({
            "id": "44",
            "channel_id": "601",
            "guild_id": "700",
            "author": {"id": "2001", "username": "bob"}
        });
        let message: MessageCreate = serde_json::from_value(raw).unwrap();

        let event = message.into_event(&HashMap::new());

        assert_eq!(event.origin.name(), "601");
        assert_eq!(event.content, "");
        assert!(event.mentions.is_empty());
    }

    #[test]
    fn test_message_without_author_is_rejected() {
        let raw = json!({"id": "45", "channel_id": "600"});
        assert!(serde_json::from_value::<MessageCreate>(raw).is_err());
    }
}
