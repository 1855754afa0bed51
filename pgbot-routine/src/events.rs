//! Chat events the gateway session hands to the routines.

use pgbot_core::{ChannelId, IncomingMessage, UserId};

/// An inbound event relevant to moderation or reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was posted.
    Message(IncomingMessage),

    /// Someone boosted the server; the notice was posted in `channel`.
    ServerBoost {
        /// Channel of the system notice.
        channel: ChannelId,
        /// Booster.
        user: UserId,
    },

    /// A member left the guild.
    MemberLeft {
        /// Former member.
        user: UserId,
    },
}

impl ChatEvent {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::ServerBoost { .. } => "server_boost",
            Self::MemberLeft { .. } => "member_left",
        }
    }
}
