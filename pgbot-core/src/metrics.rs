//! Runtime counters for the background routines.
//!
//! Lock-free `AtomicU64` counters, incremented on the hot path and read when
//! someone asks (an admin command, a log line at shutdown). Nothing is
//! exported automatically.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the engines and the scheduler.
#[derive(Debug)]
pub struct BotCounters {
    /// Reminders delivered as a reply to the origin message.
    pub reminders_replied: AtomicU64,
    /// Reminders delivered as a fresh message in the origin channel.
    pub reminders_resent: AtomicU64,
    /// Reminders delivered by direct message.
    pub reminders_direct: AtomicU64,
    /// Due reminders for which every delivery attempt failed.
    pub reminders_dropped: AtomicU64,
    /// Messages that contained the trigger token.
    pub trigger_messages: AtomicU64,
    /// Mutes created.
    pub mutes_issued: AtomicU64,
    /// Mutes extended.
    pub mutes_extended: AtomicU64,
    /// Scheduler ticks completed.
    pub ticks_completed: AtomicU64,
    /// Scheduler ticks that failed.
    pub ticks_failed: AtomicU64,
}

impl BotCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reminders_replied: AtomicU64::new(0),
            reminders_resent: AtomicU64::new(0),
            reminders_direct: AtomicU64::new(0),
            reminders_dropped: AtomicU64::new(0),
            trigger_messages: AtomicU64::new(0),
            mutes_issued: AtomicU64::new(0),
            mutes_extended: AtomicU64::new(0),
            ticks_completed: AtomicU64::new(0),
            ticks_failed: AtomicU64::new(0),
        }
    }

    /// Increment `counter` by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            reminders_delivered: [
                self.reminders_replied.load(Ordering::Relaxed),
                self.reminders_resent.load(Ordering::Relaxed),
                self.reminders_direct.load(Ordering::Relaxed),
            ],
            reminders_dropped: self.reminders_dropped.load(Ordering::Relaxed),
            trigger_messages: self.trigger_messages.load(Ordering::Relaxed),
            mutes_issued: self.mutes_issued.load(Ordering::Relaxed),
            mutes_extended: self.mutes_extended.load(Ordering::Relaxed),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for BotCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Delivered reminders by route `[reply, channel, dm]`.
    pub reminders_delivered: [u64; 3],
    /// Dropped reminders.
    pub reminders_dropped: u64,
    /// Trigger-token messages seen.
    pub trigger_messages: u64,
    /// Mutes created.
    pub mutes_issued: u64,
    /// Mutes extended.
    pub mutes_extended: u64,
    /// Scheduler ticks completed.
    pub ticks_completed: u64,
    /// Scheduler ticks failed.
    pub ticks_failed: u64,
}

impl CounterSnapshot {
    /// One-line human summary, used in admin replies and the shutdown log.
    #[must_use]
    pub fn summary(&self) -> String {
        let [replied, resent, direct] = self.reminders_delivered;
        format!(
            "reminders: {replied} replied / {resent} resent / {direct} by DM / {} dropped; \
             moderation: {} triggers, {} mutes, {} extensions; ticks: {} ok / {} failed",
            self.reminders_dropped,
            self.trigger_messages,
            self.mutes_issued,
            self.mutes_extended,
            self.ticks_completed,
            self.ticks_failed,
        )
    }
}
