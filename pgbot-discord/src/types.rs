//! Configuration and REST payloads.
//!
//! Discord sends snowflakes as JSON strings; they are parsed into the core
//! `u64` identities at the edge of this crate.

use pgbot_core::{Activity, MentionPolicy, MessageId, ChannelId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DiscordError;

/// Channel types the bot may post reminders into: guild text and announcement.
pub const TEXT_CHANNEL_TYPES: [u8; 2] = [0, 5];

/// `[discord]` section of `pgbot.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Environment variable holding the bot token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Only channels of this guild count as resolvable. `None` accepts any
    /// guild text channel.
    #[serde(default)]
    pub guild_id: Option<u64>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_api_base(),
            guild_id: None,
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_token_env() -> String { "PGBOT_TOKEN".to_string() }
fn default_api_base() -> String { "https://discord.com/api/v10".to_string() }
fn default_timeout_ms() -> u64 { 5000 }

/// `GET /channels/{id}` (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPayload {
    /// Channel snowflake.
    pub id: String,
    /// Channel type code.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Owning guild, absent for DMs.
    #[serde(default)]
    pub guild_id: Option<String>,
}

/// Message object (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    /// Message snowflake.
    pub id: String,
    /// Channel snowflake.
    pub channel_id: String,
}

/// User object (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    /// User snowflake.
    pub id: String,
}

/// `allowed_mentions` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    /// Mention categories parsed from content; always empty so nothing is
    /// pinged implicitly.
    pub parse: Vec<String>,
    /// Users that may be pinged.
    pub users: Vec<String>,
    /// Whether the replied-to author is pinged.
    pub replied_user: bool,
}

impl From<&MentionPolicy> for AllowedMentions {
    fn from(policy: &MentionPolicy) -> Self {
        Self {
            parse: Vec::new(),
            users: policy.users.iter().map(|u| u.0.to_string()).collect(),
            replied_user: policy.replied_user,
        }
    }
}

/// `message_reference` object for replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReference {
    /// Replied-to message.
    pub message_id: String,
    /// Its channel.
    pub channel_id: String,
    /// Fail instead of posting a plain message when the target is gone.
    pub fail_if_not_exists: bool,
}

/// `POST /channels/{id}/messages` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateMessage {
    /// Text.
    pub content: String,
    /// Mention policy.
    pub allowed_mentions: AllowedMentions,
    /// Present for replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl CreateMessage {
    /// A plain message.
    #[must_use]
    pub fn new(content: &str, mentions: &MentionPolicy) -> Self {
        Self {
            content: content.to_owned(),
            allowed_mentions: mentions.into(),
            message_reference: None,
        }
    }

    /// A reply to `message` in `channel`.
    #[must_use]
    pub fn reply(
        content: &str,
        mentions: &MentionPolicy,
        channel: ChannelId,
        message: MessageId,
    ) -> Self {
        Self {
            message_reference: Some(MessageReference {
                message_id: message.0.to_string(),
                channel_id: channel.0.to_string(),
                fail_if_not_exists: true,
            }),
            ..Self::new(content, mentions)
        }
    }
}

/// `POST /users/@me/channels` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDm {
    /// Recipient snowflake.
    pub recipient_id: String,
}

/// Gateway opcode 3 (presence update) payload for `activity`. The gateway
/// session sends this when it sees a new activity on the presence channel.
#[must_use]
pub fn presence_payload(activity: &Activity) -> serde_json::Value {
    json!({
        "op": 3,
        "d": {
            "since": null,
            "activities": [{ "name": activity.name, "type": activity.kind.code() }],
            "status": "online",
            "afk": false,
        }
    })
}

/// Parse a snowflake string.
///
/// # Errors
///
/// [`DiscordError::ParseError`] if `raw` is not a decimal `u64`.
pub fn parse_snowflake(raw: &str) -> Result<u64, DiscordError> {
    raw.parse()
        .map_err(|_| DiscordError::ParseError(format!("invalid snowflake '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbot_core::{ActivityKind, UserId};

    #[test]
    fn config_defaults_from_empty_toml() {
        let config: DiscordConfig = toml::from_str("").expect("parse");
        assert_eq!(config.api_base, "https://discord.com/api/v10");
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.guild_id, None);
    }

    #[test]
    fn reply_body_carries_reference_and_mentions() {
        let mentions = MentionPolicy::replied_user_only();
        let body = CreateMessage::reply("hi", &mentions, ChannelId(10), MessageId(20));
        assert_eq!(
            serde_json::to_value(&body).expect("encode"),
            json!({
                "content": "hi",
                "allowed_mentions": { "parse": [], "users": [], "replied_user": true },
                "message_reference": {
                    "message_id": "20",
                    "channel_id": "10",
                    "fail_if_not_exists": true
                },
            })
        );
    }

    #[test]
    fn plain_message_omits_reference() {
        let body = CreateMessage::new("hey", &MentionPolicy::only(UserId(5)));
        let value = serde_json::to_value(&body).expect("encode");
        assert!(value.get("message_reference").is_none());
        assert_eq!(value["allowed_mentions"]["users"], json!(["5"]));
        assert_eq!(value["allowed_mentions"]["replied_user"], json!(false));
    }

    #[test]
    fn presence_uses_activity_codes() {
        let activity = Activity::new(ActivityKind::Watching, "discord.io/pygame_community");
        let payload = presence_payload(&activity);
        assert_eq!(payload["d"]["activities"][0]["type"], json!(3));
        assert_eq!(payload["d"]["activities"][0]["name"], json!("discord.io/pygame_community"));
    }

    #[test]
    fn snowflakes_parse() {
        assert_eq!(parse_snowflake("780423317718302781").expect("parse"), 780_423_317_718_302_781);
        assert!(parse_snowflake("abc").is_err());
    }
}
