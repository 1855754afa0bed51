//! Trigger-token moderation: mood swings, advisory warnings and escalating
//! mutes.
//!
//! Each inbound message is scanned for the configured trigger token. The raw
//! count drives the hard mute threshold; a jittered count drives the mood
//! change. The jitter comes from an injected random source so tests can pin
//! it.
//!
//! Mutes live in the `"bot_mutes"` document as `user -> expiry`. A repeat
//! offence while a mute is active extends the existing expiry instead of
//! restarting it from now.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{BotConfig, GreetingConfig, ModerationConfig};
use crate::emotion::{Emotion, EmotionAccumulator};
use crate::error::Result;
use crate::metrics::BotCounters;
use crate::store::DocumentStore;
use crate::transport::{ChatTransport, MentionPolicy};
use crate::types::{ChannelId, IncomingMessage, UserId};

/// Document key holding the mute table.
pub const MUTES_KEY: &str = "bot_mutes";

/// Stored form of the `"bot_mutes"` document.
pub type MuteTable = BTreeMap<UserId, DateTime<Utc>>;

/// What happened to the author's mute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteChange {
    /// No active mute existed; a new one was created.
    Issued {
        /// New expiry.
        expires_at: DateTime<Utc>,
    },
    /// An active mute was pushed further out.
    Extended {
        /// Expiry before this message.
        previous: DateTime<Utc>,
        /// Expiry after this message.
        expires_at: DateTime<Utc>,
    },
}

/// Result of running a message through [`Moderator::check_trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// Number of trigger tokens in the message.
    pub occurrences: u32,
    /// Whether the advisory warning was sent (or at least attempted).
    pub warned: bool,
    /// Mute change, if the message crossed the mute threshold.
    pub mute: Option<MuteChange>,
    /// Amount added to anger and removed from happiness.
    pub mood_delta: i64,
}

/// Outcome of the self-introduction heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Introduction {
    /// Not an introduction.
    None,
    /// "I am {name}".
    Named(String),
    /// Just "I am", nothing after it.
    Bare,
}

/// Detect "I am <name>" in a message.
///
/// Only messages (trimmed) shorter than `max_chars` characters count. The
/// match is case-insensitive; the captured name keeps its original casing.
#[must_use]
pub fn parse_introduction(content: &str, max_chars: usize) -> Introduction {
    let trimmed = content.trim();
    if trimmed.chars().count() >= max_chars {
        return Introduction::None;
    }

    // ASCII lowering keeps byte offsets identical to `trimmed`.
    let lowered = trimmed.to_ascii_lowercase();
    let Some(idx) = lowered.find("i am") else {
        return Introduction::None;
    };

    let name = trimmed[idx + "i am".len()..].trim();
    if !name.is_empty() {
        Introduction::Named(name.to_owned())
    } else if lowered == "i am" {
        Introduction::Bare
    } else {
        Introduction::None
    }
}

/// Moderation engine shared by the chat-event handlers.
pub struct Moderator {
    store: DocumentStore,
    emotions: EmotionAccumulator,
    config: ModerationConfig,
    greeting: GreetingConfig,
    rng: Mutex<Box<dyn RngCore + Send>>,
    counters: Arc<BotCounters>,
}

impl std::fmt::Debug for Moderator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Moderator")
            .field("config", &self.config)
            .field("greeting", &self.greeting)
            .finish_non_exhaustive()
    }
}

impl Moderator {
    /// Create a moderator over `store`, seeded from OS entropy.
    #[must_use]
    pub fn new(store: DocumentStore, config: &BotConfig) -> Self {
        Self {
            emotions: EmotionAccumulator::new(store.clone()),
            store,
            config: config.moderation.clone(),
            greeting: config.greeting.clone(),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            counters: Arc::new(BotCounters::new()),
        }
    }

    /// Replace the random source.
    #[must_use]
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    /// Share `counters` with other components.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<BotCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// The mood accumulator this moderator writes to.
    #[must_use]
    pub fn emotions(&self) -> &EmotionAccumulator {
        &self.emotions
    }

    /// Run `msg` through the trigger-token escalation.
    ///
    /// Returns `Ok(None)` when the message carries no trigger token.
    ///
    /// # Errors
    ///
    /// Store failures on `"emotions"` or `"bot_mutes"`. Transport failures
    /// are logged and swallowed.
    pub async fn check_trigger(
        &self,
        msg: &IncomingMessage,
        transport: &dyn ChatTransport,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerOutcome>> {
        let token = self.config.trigger_token.as_str();
        if token.is_empty() {
            return Ok(None);
        }
        let occurrences = u32::try_from(msg.content.matches(token).count()).unwrap_or(u32::MAX);
        if occurrences == 0 {
            return Ok(None);
        }
        BotCounters::bump(&self.counters.trigger_messages);

        let jitter = self.rng.lock().gen_range(0..=self.config.max_jitter);

        let anger = self.emotions.get(Emotion::Anger).await?;
        let warned =
            anger.saturating_add(i64::from(occurrences)) > self.config.warn_anger_threshold;
        if warned {
            if let Err(e) = transport
                .send_message(msg.channel, &self.config.warning_text, &MentionPolicy::none())
                .await
            {
                warn!(channel = %msg.channel, error = %e, "failed to send trigger warning");
            }
        }

        let mute = if occurrences >= self.config.mute_threshold {
            Some(self.escalate_mute(msg.author, occurrences, now).await?)
        } else {
            None
        };

        let mood_delta = i64::from(occurrences / 5) + i64::from(jitter);
        self.emotions.update(Emotion::Anger, mood_delta).await?;
        self.emotions.update(Emotion::Happy, -mood_delta).await?;

        if self.config.log_moderation_events {
            info!(
                user = %msg.author,
                channel = %msg.channel,
                occurrences,
                mood_delta,
                warned,
                muted = mute.is_some(),
                "trigger token escalation"
            );
        }

        Ok(Some(TriggerOutcome {
            occurrences,
            warned,
            mute,
            mood_delta,
        }))
    }

    async fn escalate_mute(
        &self,
        user: UserId,
        occurrences: u32,
        now: DateTime<Utc>,
    ) -> Result<MuteChange> {
        // occurrences / 2 minutes to extend, occurrences / 3 minutes for a first mute.
        let extension = Duration::seconds(i64::from(occurrences) * 30);
        let first = Duration::seconds(i64::from(occurrences) * 20);

        let change = self
            .store
            .update(MUTES_KEY, MuteTable::new(), |mutes| {
                let saturating = |from: DateTime<Utc>, by: Duration| {
                    from.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
                };
                let change = match mutes.get(&user).copied() {
                    Some(previous) if previous > now => MuteChange::Extended {
                        previous,
                        expires_at: saturating(previous, extension),
                    },
                    _ => MuteChange::Issued {
                        expires_at: saturating(now, first),
                    },
                };
                let expires_at = match change {
                    MuteChange::Issued { expires_at }
                    | MuteChange::Extended { expires_at, .. } => expires_at,
                };
                mutes.insert(user, expires_at);
                change
            })
            .await?;

        match change {
            MuteChange::Issued { .. } => BotCounters::bump(&self.counters.mutes_issued),
            MuteChange::Extended { .. } => BotCounters::bump(&self.counters.mutes_extended),
        }
        debug!(%user, ?change, "mute table updated");
        Ok(change)
    }

    /// Active mute expiry for `user`, or `None` if unmuted or expired.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn mute_expiry(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mutes = self.store.read(MUTES_KEY, MuteTable::new()).await?;
        Ok(mutes.get(&user).copied().filter(|expiry| *expiry > now))
    }

    /// Reset the mood to its most positive extreme.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn euphoria(&self) -> Result<()> {
        self.emotions.euphoria().await
    }

    /// Someone supported the community (e.g. a server boost): euphoria, then
    /// thank the channel.
    ///
    /// # Errors
    ///
    /// Store failures from the euphoria reset.
    pub async fn on_support(
        &self,
        channel: ChannelId,
        transport: &dyn ChatTransport,
    ) -> Result<()> {
        self.euphoria().await?;
        if let Err(e) = transport
            .send_message(channel, &self.config.thanks_text, &MentionPolicy::none())
            .await
        {
            warn!(%channel, error = %e, "failed to send thanks");
        }
        if self.config.log_moderation_events {
            info!(%channel, "community support received, mood reset");
        }
        Ok(())
    }

    /// Answer "I am <name>" with a greeting from `bot`. Returns whether a
    /// reply was sent.
    pub async fn on_introduction(
        &self,
        msg: &IncomingMessage,
        bot: UserId,
        transport: &dyn ChatTransport,
    ) -> bool {
        if !self.greeting.enabled {
            return false;
        }

        let text = match parse_introduction(&msg.content, self.greeting.max_message_chars) {
            Introduction::None => return false,
            Introduction::Named(name) => format!("Hi {name}! I am {}", bot.mention()),
            Introduction::Bare => {
                let quote = self.greeting.quotes.choose(&mut *self.rng.lock()).cloned();
                match quote {
                    Some(quote) => quote,
                    None => return false,
                }
            }
        };

        match transport.send_message(msg.channel, &text, &MentionPolicy::none()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(channel = %msg.channel, error = %e, "failed to send greeting");
                false
            }
        }
    }
}
