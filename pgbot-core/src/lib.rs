//! # pgbot core
//!
//! Shared state and background engines for the community bot:
//!
//! - **Document store**: named JSON documents behind per-key exclusive
//!   leases ([`DocumentStore`], [`DocumentLease`])
//! - **Emotions**: four bounded mood counters ([`EmotionAccumulator`])
//! - **Moderation**: trigger-token escalation with jittered mood swings and
//!   compounding mutes ([`Moderator`])
//! - **Reminders**: at-most-once delivery with reply, channel and DM
//!   fallback ([`ReminderEngine`], [`Reminders`])
//!
//! The engines talk to the chat platform only through [`ChatTransport`].
//!
//! ## Concurrency
//!
//! The lease is the only lock on shared state. Two leases on the same key
//! never overlap; leases on different keys never wait on each other, so the
//! reminder tick and inbound moderation run side by side.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod emotion;
pub mod error;
pub mod metrics;
pub mod moderation;
pub mod reminder;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;
pub mod types;

pub use config::BotConfig;
pub use emotion::{Emotion, EmotionAccumulator, Mood};
pub use error::{PgError, Result, TransportError};
pub use metrics::{BotCounters, CounterSnapshot};
pub use moderation::{Moderator, MuteChange, TriggerOutcome};
pub use reminder::{DeliveryReport, Reminder, ReminderEngine, Reminders};
pub use store::{DocumentLease, DocumentStore};
pub use transport::{ChatTransport, MentionPolicy};
pub use types::*;
