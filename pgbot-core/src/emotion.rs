//! The bot's mood: four bounded integer counters persisted in the
//! `"emotions"` document.
//!
//! | emotion    | range        |
//! |------------|--------------|
//! | `happy`    | -100 ..= 100 |
//! | `anger`    |    0 ..= 100 |
//! | `bored`    | -100 ..= 100 |
//! | `confused` |    0 ..= 100 |
//!
//! Every write clamps into the range, so a stored value is always inside it.
//! Values that were never written read as 0.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PgError, Result};
use crate::store::DocumentStore;

/// Document key holding the mood counters.
pub const EMOTIONS_KEY: &str = "emotions";

/// The fixed set of tracked emotions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    /// Overall contentment.
    Happy,
    /// Irritation, raised by abuse.
    Anger,
    /// Boredom.
    Bored,
    /// Confusion.
    Confused,
}

impl Emotion {
    /// All emotions, in display order.
    pub const ALL: [Emotion; 4] = [Self::Happy, Self::Anger, Self::Bored, Self::Confused];

    /// Inclusive `(lo, hi)` bounds.
    #[must_use]
    pub fn bounds(self) -> (i64, i64) {
        match self {
            Self::Happy | Self::Bored => (-100, 100),
            Self::Anger | Self::Confused => (0, 100),
        }
    }

    /// Clamp `value` into this emotion's bounds.
    #[must_use]
    pub fn clamp(self, value: i64) -> i64 {
        let (lo, hi) = self.bounds();
        value.clamp(lo, hi)
    }

    /// Lowercase name as stored in the document.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Anger => "anger",
            Self::Bored => "bored",
            Self::Confused => "confused",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Emotion {
    type Err = PgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| PgError::UnknownEmotion(s.to_owned()))
    }
}

/// Stored form of the `"emotions"` document.
pub type EmotionState = BTreeMap<Emotion, i64>;

/// Snapshot of all four emotions, absent ones filled with 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mood {
    /// `happy` value.
    pub happy: i64,
    /// `anger` value.
    pub anger: i64,
    /// `bored` value.
    pub bored: i64,
    /// `confused` value.
    pub confused: i64,
}

/// Reads and adjusts the mood counters through the document store.
#[derive(Debug, Clone)]
pub struct EmotionAccumulator {
    store: DocumentStore,
}

impl EmotionAccumulator {
    /// Create an accumulator over `store`.
    #[must_use]
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Add `delta` to `emotion`, clamp, persist, and return the stored value.
    ///
    /// # Errors
    ///
    /// Store failures; the lease is released either way.
    pub async fn update(&self, emotion: Emotion, delta: i64) -> Result<i64> {
        let value = self
            .store
            .update(EMOTIONS_KEY, EmotionState::new(), |state| {
                let slot = state.entry(emotion).or_insert(0);
                *slot = emotion.clamp(slot.saturating_add(delta));
                *slot
            })
            .await?;

        debug!(%emotion, delta, value, "emotion updated");
        Ok(value)
    }

    /// Current value of `emotion` (0 if never written).
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, emotion: Emotion) -> Result<i64> {
        let state = self.store.read(EMOTIONS_KEY, EmotionState::new()).await?;
        Ok(state.get(&emotion).copied().unwrap_or(0))
    }

    /// All four values under a single lease.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn snapshot(&self) -> Result<Mood> {
        let state = self.store.read(EMOTIONS_KEY, EmotionState::new()).await?;
        let value = |e: Emotion| state.get(&e).copied().unwrap_or(0);
        Ok(Mood {
            happy: value(Emotion::Happy),
            anger: value(Emotion::Anger),
            bored: value(Emotion::Bored),
            confused: value(Emotion::Confused),
        })
    }

    /// Overwrite every emotion with its most positive value in one write:
    /// happy at max, anger at min, bored and confused at 0.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn euphoria(&self) -> Result<()> {
        let state = EmotionState::from([
            (Emotion::Happy, Emotion::Happy.bounds().1),
            (Emotion::Anger, Emotion::Anger.bounds().0),
            (Emotion::Bored, 0),
            (Emotion::Confused, 0),
        ]);
        let mut lease = self.store.acquire(EMOTIONS_KEY).await;
        lease.set(&state)?;
        lease.release().await?;
        debug!("emotions reset to euphoria");
        Ok(())
    }
}
