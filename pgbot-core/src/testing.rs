//! Test doubles: a transport that records every call and can be told to
//! fail, and a backend whose writes can be switched off.
//!
//! Compiled for this crate's own tests and, through the `test-util`
//! feature, for downstream tests and benches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{PgError, Result, TransportError};
use crate::store::{DocumentBackend, MemoryBackend};
use crate::transport::{ChatTransport, MentionPolicy, TransportResult};
use crate::types::{Activity, ChannelId, MessageId, MessageRef, UserId};

/// DM channels handed out by [`RecordingTransport`] are `DM_BASE + user id`.
pub const DM_BASE: u64 = 9_000_000_000;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `resolve_text_channel`.
    ResolveChannel(ChannelId),
    /// `fetch_message`.
    FetchMessage(ChannelId, MessageId),
    /// `reply`.
    Reply {
        /// Replied-to message.
        target: MessageRef,
        /// Text sent.
        content: String,
        /// Mention policy used.
        mentions: MentionPolicy,
    },
    /// `send_message`.
    Send {
        /// Destination channel.
        channel: ChannelId,
        /// Text sent.
        content: String,
        /// Mention policy used.
        mentions: MentionPolicy,
    },
    /// `fetch_user`.
    FetchUser(UserId),
    /// `open_dm`.
    OpenDm(UserId),
    /// `set_presence`.
    SetPresence(Activity),
}

#[derive(Debug, Default)]
struct FailurePlan {
    missing_channels: HashSet<ChannelId>,
    fail_fetch: bool,
    fail_reply: bool,
    fail_send: bool,
    fail_dm: bool,
    fail_presence: bool,
    panic_on_resolve: Option<usize>,
    resolves: usize,
}

/// In-memory [`ChatTransport`] that records calls.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    plan: Mutex<FailurePlan>,
    next_message: AtomicU64,
}

impl RecordingTransport {
    /// A transport on which everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `channel` unresolvable.
    #[must_use]
    pub fn with_missing_channel(self, channel: ChannelId) -> Self {
        self.plan.lock().missing_channels.insert(channel);
        self
    }

    /// Make `fetch_message` fail (origin message deleted).
    #[must_use]
    pub fn failing_fetches(self) -> Self {
        self.plan.lock().fail_fetch = true;
        self
    }

    /// Make `reply` fail.
    #[must_use]
    pub fn failing_replies(self) -> Self {
        self.plan.lock().fail_reply = true;
        self
    }

    /// Make `send_message` into guild channels fail.
    #[must_use]
    pub fn failing_sends(self) -> Self {
        self.plan.lock().fail_send = true;
        self
    }

    /// Make `open_dm` fail.
    #[must_use]
    pub fn failing_dms(self) -> Self {
        self.plan.lock().fail_dm = true;
        self
    }

    /// Make `set_presence` fail.
    #[must_use]
    pub fn failing_presence(self) -> Self {
        self.plan.lock().fail_presence = true;
        self
    }

    /// Panic inside the `nth` `resolve_text_channel` call (1-based), the way
    /// a buggy transport would.
    #[must_use]
    pub fn panicking_on_resolve(self, nth: usize) -> Self {
        self.plan.lock().panic_on_resolve = Some(nth);
        self
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of `reply` calls.
    #[must_use]
    pub fn replies(&self) -> usize {
        self.count(|c| matches!(c, Call::Reply { .. }))
    }

    /// Number of `send_message` calls into non-DM channels.
    #[must_use]
    pub fn channel_sends(&self) -> usize {
        self.count(|c| matches!(c, Call::Send { channel, .. } if channel.0 < DM_BASE))
    }

    /// Number of DM attempts (`open_dm` calls).
    #[must_use]
    pub fn dm_attempts(&self) -> usize {
        self.count(|c| matches!(c, Call::OpenDm(_)))
    }

    /// Contents of every message sent or replied, in order.
    #[must_use]
    pub fn sent_contents(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Reply { content, .. } | Call::Send { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next_id(&self) -> MessageId {
        MessageId(self.next_message.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn resolve_text_channel(&self, channel: ChannelId) -> TransportResult<bool> {
        self.record(Call::ResolveChannel(channel));
        let (missing, panics) = {
            let mut plan = self.plan.lock();
            plan.resolves += 1;
            (plan.missing_channels.contains(&channel), plan.panic_on_resolve == Some(plan.resolves))
        };
        assert!(!panics, "transport bug while resolving {channel}");
        Ok(!missing)
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> TransportResult<MessageRef> {
        self.record(Call::FetchMessage(channel, message));
        if self.plan.lock().fail_fetch {
            return Err(TransportError::NotFound(format!("message {message}")));
        }
        Ok(MessageRef { channel, id: message })
    }

    async fn reply(
        &self,
        target: MessageRef,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId> {
        self.record(Call::Reply {
            target,
            content: content.to_owned(),
            mentions: mentions.clone(),
        });
        if self.plan.lock().fail_reply {
            return Err(TransportError::Status {
                code: 500,
                body: "reply rejected".into(),
            });
        }
        Ok(self.next_id())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId> {
        self.record(Call::Send {
            channel,
            content: content.to_owned(),
            mentions: mentions.clone(),
        });
        if channel.0 < DM_BASE && self.plan.lock().fail_send {
            return Err(TransportError::Forbidden(format!("channel {channel}")));
        }
        Ok(self.next_id())
    }

    async fn fetch_user(&self, user: UserId) -> TransportResult<UserId> {
        self.record(Call::FetchUser(user));
        Ok(user)
    }

    async fn open_dm(&self, user: UserId) -> TransportResult<ChannelId> {
        self.record(Call::OpenDm(user));
        if self.plan.lock().fail_dm {
            return Err(TransportError::Forbidden(format!("DMs closed for {user}")));
        }
        Ok(ChannelId(DM_BASE + user.0))
    }

    async fn set_presence(&self, activity: &Activity) -> TransportResult<()> {
        self.record(Call::SetPresence(activity.clone()));
        if self.plan.lock().fail_presence {
            return Err(TransportError::Unavailable("gateway down".into()));
        }
        Ok(())
    }
}

/// [`MemoryBackend`] whose writes fail while the switch is on.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyBackend {
    /// Create a backend that currently succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared switch; `true` makes every `save` fail.
    #[must_use]
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_writes)
    }
}

impl DocumentBackend for FlakyBackend {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PgError::Io(std::io::Error::other(format!("disk full writing '{key}'"))));
        }
        self.inner.save(key, data)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }
}
