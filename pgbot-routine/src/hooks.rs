//! Routing of inbound chat events to the core engines.
//!
//! The gateway session owns the connection; it calls
//! [`EventRouter::handle`] for every event it receives.

use std::sync::Arc;

use pgbot_core::{ChatTransport, DocumentStore, Moderator, Reminders, Result, UserId};
use tracing::debug;

use crate::events::ChatEvent;

/// Dispatches [`ChatEvent`]s to moderation and reminder bookkeeping.
pub struct EventRouter {
    moderator: Arc<Moderator>,
    reminders: Reminders,
    transport: Arc<dyn ChatTransport>,
    bot_user: UserId,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("bot_user", &self.bot_user)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Create a router. `bot_user` is the bot's own account; its messages are
    /// never moderated.
    #[must_use]
    pub fn new(
        store: DocumentStore,
        moderator: Arc<Moderator>,
        transport: Arc<dyn ChatTransport>,
        bot_user: UserId,
    ) -> Self {
        Self {
            moderator,
            reminders: Reminders::new(store),
            transport,
            bot_user,
        }
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Store failures from moderation or reminder purging. Transport
    /// failures are handled inside the engines.
    pub async fn handle(&self, event: ChatEvent) -> Result<()> {
        debug!(kind = event.kind(), "routing chat event");
        match event {
            ChatEvent::Message(msg) => {
                if msg.author_is_bot || msg.author == self.bot_user {
                    return Ok(());
                }
                self.moderator
                    .check_trigger(&msg, self.transport.as_ref(), msg.received_at)
                    .await?;
                self.moderator
                    .on_introduction(&msg, self.bot_user, self.transport.as_ref())
                    .await;
            }
            ChatEvent::ServerBoost { channel, user } => {
                debug!(%user, "server boosted");
                self.moderator.on_support(channel, self.transport.as_ref()).await?;
            }
            ChatEvent::MemberLeft { user } => {
                self.reminders.purge_user(user).await?;
            }
        }
        Ok(())
    }
}
