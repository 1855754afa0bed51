//! The chat-platform seam.
//!
//! The engines in this crate never talk to a platform directly; they go
//! through [`ChatTransport`]. `pgbot-discord` provides the REST
//! implementation, tests use a recording fake.
//!
//! Every method may fail with a [`TransportError`]. Callers in this crate
//! treat those as recoverable: they log and fall back.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Activity, ChannelId, MessageId, MessageRef, UserId};

/// Convenience alias for transport results.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Who may be pinged by an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionPolicy {
    /// Users allowed to be pinged.
    pub users: Vec<UserId>,
    /// Whether the author of the replied-to message is pinged.
    pub replied_user: bool,
}

impl MentionPolicy {
    /// Ping nobody.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Ping only the author of the message being replied to.
    #[must_use]
    pub fn replied_user_only() -> Self {
        Self {
            users: Vec::new(),
            replied_user: true,
        }
    }

    /// Ping exactly `user` and nobody else.
    #[must_use]
    pub fn only(user: UserId) -> Self {
        Self {
            users: vec![user],
            replied_user: false,
        }
    }
}

/// Outbound chat operations the core relies on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Whether `channel` still resolves to a text channel the bot can post in.
    async fn resolve_text_channel(&self, channel: ChannelId) -> TransportResult<bool>;

    /// Fetch a message so it can be replied to.
    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> TransportResult<MessageRef>;

    /// Reply to `target`, threading the new message under it.
    async fn reply(
        &self,
        target: MessageRef,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId>;

    /// Post a fresh message into `channel`.
    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId>;

    /// Check that `user` exists and is reachable.
    async fn fetch_user(&self, user: UserId) -> TransportResult<UserId>;

    /// Open (or fetch the existing) direct-message channel with `user`.
    async fn open_dm(&self, user: UserId) -> TransportResult<ChannelId>;

    /// Change the bot's presence activity.
    async fn set_presence(&self, activity: &Activity) -> TransportResult<()>;
}
