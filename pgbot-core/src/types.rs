//! Core type definitions shared by the store, the engines and the transport.
//!
//! Identities are Discord-style snowflakes. They serialize as bare integers so
//! documents written by other tools (`{"1234": {...}}`) load unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identity of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Identity of a chat channel (guild text channel or DM channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

/// Identity of a single chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UserId {
    /// Legacy nickname mention markup (`<@!id>`), as the bot has always sent it.
    #[must_use]
    pub fn mention(self) -> String {
        format!("<@!{}>", self.0)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message as seen by the event handlers: enough to reply and to moderate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message identity.
    pub id: MessageId,
    /// Channel the message was posted in.
    pub channel: ChannelId,
    /// Author of the message.
    pub author: UserId,
    /// Whether the author is a bot account (bots are ignored).
    pub author_is_bot: bool,
    /// Raw message text.
    pub content: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

/// A message fetched back from the platform, used as a reply target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Channel holding the message.
    pub channel: ChannelId,
    /// Message identity.
    pub id: MessageId,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Kind of rich-presence activity shown under the bot's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// "Playing {name}".
    Playing,
    /// "Streaming {name}".
    Streaming,
    /// "Listening to {name}".
    Listening,
    /// "Watching {name}".
    Watching,
    /// "Competing in {name}".
    Competing,
}

impl ActivityKind {
    /// Gateway activity type code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Playing => 0,
            Self::Streaming => 1,
            Self::Listening => 2,
            Self::Watching => 3,
            Self::Competing => 5,
        }
    }
}

/// A presence activity: kind plus display text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activity {
    /// What the bot is "doing".
    pub kind: ActivityKind,
    /// Display text.
    pub name: String,
}

impl Activity {
    /// Create a new activity.
    #[must_use]
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.name)
    }
}
