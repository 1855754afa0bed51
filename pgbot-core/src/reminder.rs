//! Reminder storage and delivery.
//!
//! The `"reminders"` document maps each user to their reminders, keyed by
//! trigger time:
//!
//! ```json
//! { "1234": { "2024-03-01T12:00:00Z": ["water the plants", 555, 777] } }
//! ```
//!
//! The payload is `(text, origin channel, origin message)`. Any writer that
//! follows this shape is picked up on the next tick.
//!
//! Delivery is at-most-once. A due reminder is removed from the document
//! whatever happens to it; failed sends are logged and never retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::BotCounters;
use crate::store::DocumentStore;
use crate::transport::{ChatTransport, MentionPolicy};
use crate::types::{ChannelId, MessageId, UserId};

/// Document key holding every user's reminders.
pub const REMINDERS_KEY: &str = "reminders";

/// One scheduled reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ReminderWire", into = "ReminderWire")]
pub struct Reminder {
    /// Text to deliver.
    pub content: String,
    /// Channel the reminder was requested in.
    pub channel: ChannelId,
    /// Message that requested it; the delivery replies to it when possible.
    pub message: MessageId,
}

type ReminderWire = (String, ChannelId, MessageId);

impl From<ReminderWire> for Reminder {
    fn from((content, channel, message): ReminderWire) -> Self {
        Self {
            content,
            channel,
            message,
        }
    }
}

impl From<Reminder> for ReminderWire {
    fn from(r: Reminder) -> Self {
        (r.content, r.channel, r.message)
    }
}

impl Reminder {
    /// Create a reminder.
    #[must_use]
    pub fn new(content: impl Into<String>, channel: ChannelId, message: MessageId) -> Self {
        Self {
            content: content.into(),
            channel,
            message,
        }
    }
}

/// One user's reminders by trigger time.
pub type UserReminders = BTreeMap<DateTime<Utc>, Reminder>;

/// Stored form of the `"reminders"` document.
pub type ReminderBook = BTreeMap<UserId, UserReminders>;

/// A reminder whose trigger time has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    /// Owner.
    pub user: UserId,
    /// Trigger time.
    pub at: DateTime<Utc>,
    /// Payload.
    pub reminder: Reminder,
}

/// Partition `book` at `now`: reminders with `at <= now` are due, the rest
/// are returned as the rebuilt book. Users left with nothing are dropped.
#[must_use]
pub fn split_due(book: ReminderBook, now: DateTime<Utc>) -> (Vec<DueReminder>, ReminderBook) {
    let mut due = Vec::new();
    let mut retained = ReminderBook::new();

    for (user, reminders) in book {
        for (at, reminder) in reminders {
            if now >= at {
                due.push(DueReminder { user, at, reminder });
            } else {
                retained.entry(user).or_default().insert(at, reminder);
            }
        }
    }

    (due, retained)
}

/// How a due reminder reached its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Replied to the origin message.
    Reply,
    /// Fresh message in the origin channel.
    Channel,
    /// Direct message.
    Direct,
    /// Every attempt failed.
    Dropped,
}

/// Reply text, also used for the DM.
fn reply_text(content: &str) -> String {
    format!("__**Reminder for you:**__\n>>> {content}")
}

fn channel_text(user: UserId, content: &str) -> String {
    format!("__**Reminder for {}:**__\n>>> {content}", user.mention())
}

/// Deliver one due reminder through reply, channel resend and DM, in that
/// order, stopping at the first success.
///
/// The DM is tried when the origin channel no longer resolves, or when both
/// the reply and the resend failed. It is tried at most once.
pub async fn deliver(due: &DueReminder, transport: &dyn ChatTransport) -> Delivery {
    let DueReminder { user, reminder, .. } = due;
    let user = *user;

    let resolved = match transport.resolve_text_channel(reminder.channel).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(channel = %reminder.channel, error = %e, "could not resolve reminder channel");
            false
        }
    };

    if resolved {
        let replied = async {
            let target = transport.fetch_message(reminder.channel, reminder.message).await?;
            transport
                .reply(target, &reply_text(&reminder.content), &MentionPolicy::replied_user_only())
                .await
        }
        .await;

        match replied {
            Ok(_) => return Delivery::Reply,
            Err(e) => debug!(
                %user,
                message = %reminder.message,
                error = %e,
                "reply failed, resending in channel"
            ),
        }

        match transport
            .send_message(
                reminder.channel,
                &channel_text(user, &reminder.content),
                &MentionPolicy::only(user),
            )
            .await
        {
            Ok(_) => return Delivery::Channel,
            Err(e) => warn!(
                %user,
                channel = %reminder.channel,
                error = %e,
                "channel resend failed, trying DM"
            ),
        }
    }

    let direct = async {
        let user = transport.fetch_user(user).await?;
        let dm = transport.open_dm(user).await?;
        transport
            .send_message(dm, &reply_text(&reminder.content), &MentionPolicy::none())
            .await
    }
    .await;

    match direct {
        Ok(_) => Delivery::Direct,
        Err(e) => {
            warn!(%user, error = %e, "reminder dropped, DM failed");
            Delivery::Dropped
        }
    }
}

/// Summary of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Reminders that were due.
    pub due: usize,
    /// Delivered as replies.
    pub replied: usize,
    /// Delivered as channel messages.
    pub resent: usize,
    /// Delivered by DM.
    pub direct: usize,
    /// Removed without being delivered.
    pub dropped: usize,
    /// Not yet due, kept.
    pub retained: usize,
}

impl DeliveryReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Reply => self.replied += 1,
            Delivery::Channel => self.resent += 1,
            Delivery::Direct => self.direct += 1,
            Delivery::Dropped => self.dropped += 1,
        }
    }
}

/// Runs the delivery pass over the `"reminders"` document.
#[derive(Debug, Clone, Default)]
pub struct ReminderEngine {
    counters: Arc<BotCounters>,
}

impl ReminderEngine {
    /// Create an engine with its own counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `counters` with other components.
    #[must_use]
    pub fn with_counters(counters: Arc<BotCounters>) -> Self {
        Self { counters }
    }

    /// One tick: deliver everything due at `now`, then rewrite the document
    /// with what is left, all under a single lease.
    ///
    /// An empty document is left untouched and causes no transport calls.
    ///
    /// # Errors
    ///
    /// Store failures, including a document that does not decode as a
    /// [`ReminderBook`]. Delivery failures are not errors.
    pub async fn run_tick(
        &self,
        store: &DocumentStore,
        transport: &dyn ChatTransport,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let mut lease = store.acquire(REMINDERS_KEY).await;
        let book: ReminderBook = lease.get(ReminderBook::new())?;
        if book.values().all(BTreeMap::is_empty) {
            lease.release().await?;
            return Ok(DeliveryReport::default());
        }

        let (due, retained) = split_due(book, now);
        let mut report = DeliveryReport {
            due: due.len(),
            retained: retained.values().map(BTreeMap::len).sum(),
            ..DeliveryReport::default()
        };
        // Staged first: a delivery that unwinds must not leave due reminders
        // behind for the next tick.
        if report.due > 0 {
            lease.set(&retained)?;
        }

        for item in &due {
            let delivery = deliver(item, transport).await;
            debug!(user = %item.user, at = %item.at, ?delivery, "reminder processed");
            report.record(delivery);
            let counter = match delivery {
                Delivery::Reply => &self.counters.reminders_replied,
                Delivery::Channel => &self.counters.reminders_resent,
                Delivery::Direct => &self.counters.reminders_direct,
                Delivery::Dropped => &self.counters.reminders_dropped,
            };
            BotCounters::bump(counter);
        }

        lease.release().await?;

        if report.due > 0 {
            info!(
                due = report.due,
                replied = report.replied,
                resent = report.resent,
                direct = report.direct,
                dropped = report.dropped,
                retained = report.retained,
                "reminder pass complete"
            );
        }
        Ok(report)
    }
}

/// Typed access to the `"reminders"` document for command handlers.
#[derive(Debug, Clone)]
pub struct Reminders {
    store: DocumentStore,
}

impl Reminders {
    /// Wrap `store`.
    #[must_use]
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Schedule `reminder` for `user` at `at`. A reminder already at that
    /// exact time is replaced and returned.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn schedule(
        &self,
        user: UserId,
        at: DateTime<Utc>,
        reminder: Reminder,
    ) -> Result<Option<Reminder>> {
        self.store
            .update(REMINDERS_KEY, ReminderBook::new(), |book| {
                book.entry(user).or_default().insert(at, reminder)
            })
            .await
    }

    /// `user`'s pending reminders, earliest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn list(&self, user: UserId) -> Result<Vec<(DateTime<Utc>, Reminder)>> {
        let mut book: ReminderBook = self.store.read(REMINDERS_KEY, ReminderBook::new()).await?;
        Ok(book.remove(&user).unwrap_or_default().into_iter().collect())
    }

    /// Remove `user`'s reminder at `at`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn cancel(&self, user: UserId, at: DateTime<Utc>) -> Result<Option<Reminder>> {
        let mut lease = self.store.acquire(REMINDERS_KEY).await;
        let mut book: ReminderBook = lease.get(ReminderBook::new())?;

        let removed = book.get_mut(&user).and_then(|reminders| reminders.remove(&at));
        if removed.is_some() {
            if book.get(&user).is_some_and(BTreeMap::is_empty) {
                book.remove(&user);
            }
            lease.set(&book)?;
        }
        lease.release().await?;
        Ok(removed)
    }

    /// Drop everything `user` had scheduled. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn purge_user(&self, user: UserId) -> Result<usize> {
        let mut lease = self.store.acquire(REMINDERS_KEY).await;
        let mut book: ReminderBook = lease.get(ReminderBook::new())?;

        let removed = book.remove(&user).map_or(0, |r| r.len());
        if removed > 0 {
            lease.set(&book)?;
            debug!(%user, removed, "purged reminders");
        }
        lease.release().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingTransport, DM_BASE};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid time")
    }

    fn due_reminder() -> DueReminder {
        DueReminder {
            user: UserId(5),
            at: now(),
            reminder: Reminder::new("stretch", ChannelId(10), MessageId(20)),
        }
    }

    #[test]
    fn payload_is_stored_as_tuple() {
        let book = ReminderBook::from([(
            UserId(5),
            UserReminders::from([(now(), Reminder::new("stretch", ChannelId(10), MessageId(20)))]),
        )]);
        let json = serde_json::to_value(&book).expect("encode");
        assert_eq!(
            json,
            serde_json::json!({ "5": { "2024-03-01T12:00:00Z": ["stretch", 10, 20] } })
        );
    }

    #[test]
    fn externally_written_document_decodes() {
        let raw = r#"{"42": {
            "2024-03-01T11:59:00Z": ["tea", 1, 2],
            "2024-03-02T00:00:00Z": ["sleep", 1, 3]
        }}"#;
        let book: ReminderBook = serde_json::from_str(raw).expect("decode");
        assert_eq!(book[&UserId(42)].len(), 2);
    }

    #[test]
    fn malformed_payload_fails_to_decode() {
        let raw = r#"{"42": {"2024-03-01T11:59:00Z": ["tea", 1]}}"#;
        assert!(serde_json::from_str::<ReminderBook>(raw).is_err());
    }

    #[test]
    fn split_is_inclusive_at_now() {
        let book = ReminderBook::from([(
            UserId(1),
            UserReminders::from([
                (now() - Duration::seconds(1), Reminder::new("past", ChannelId(1), MessageId(1))),
                (now(), Reminder::new("now", ChannelId(1), MessageId(2))),
                (now() + Duration::seconds(1), Reminder::new("later", ChannelId(1), MessageId(3))),
            ]),
        )]);

        let (due, retained) = split_due(book, now());
        assert_eq!(due.len(), 2);
        assert_eq!(retained[&UserId(1)].len(), 1);
        assert!(retained[&UserId(1)].contains_key(&(now() + Duration::seconds(1))));
    }

    #[test]
    fn users_with_nothing_left_are_dropped() {
        let book = ReminderBook::from([(
            UserId(1),
            UserReminders::from([(now(), Reminder::new("now", ChannelId(1), MessageId(2)))]),
        )]);
        let (_, retained) = split_due(book, now());
        assert!(retained.is_empty());
    }

    #[tokio::test]
    async fn successful_reply_skips_other_routes() {
        let transport = RecordingTransport::new();
        assert_eq!(deliver(&due_reminder(), &transport).await, Delivery::Reply);
        assert_eq!(transport.replies(), 1);
        assert_eq!(transport.channel_sends(), 0);
        assert_eq!(transport.dm_attempts(), 0);

        let reply = transport
            .calls()
            .into_iter()
            .find(|c| matches!(c, Call::Reply { .. }))
            .expect("reply call");
        assert_eq!(
            reply,
            Call::Reply {
                target: crate::types::MessageRef {
                    channel: ChannelId(10),
                    id: MessageId(20)
                },
                content: "__**Reminder for you:**__\n>>> stretch".into(),
                mentions: MentionPolicy::replied_user_only(),
            }
        );
    }

    #[tokio::test]
    async fn deleted_origin_message_resends_in_channel() {
        let transport = RecordingTransport::new().failing_fetches();
        assert_eq!(deliver(&due_reminder(), &transport).await, Delivery::Channel);
        assert_eq!(transport.replies(), 0);
        assert_eq!(transport.dm_attempts(), 0);
        assert!(transport.calls().contains(&Call::Send {
            channel: ChannelId(10),
            content: "__**Reminder for <@!5>:**__\n>>> stretch".into(),
            mentions: MentionPolicy::only(UserId(5)),
        }));
    }

    #[tokio::test]
    async fn unresolved_channel_goes_straight_to_dm() {
        let transport = RecordingTransport::new().with_missing_channel(ChannelId(10));
        assert_eq!(deliver(&due_reminder(), &transport).await, Delivery::Direct);
        assert_eq!(
            transport.calls(),
            vec![
                Call::ResolveChannel(ChannelId(10)),
                Call::FetchUser(UserId(5)),
                Call::OpenDm(UserId(5)),
                Call::Send {
                    channel: ChannelId(DM_BASE + 5),
                    content: "__**Reminder for you:**__\n>>> stretch".into(),
                    mentions: MentionPolicy::none(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn reply_and_resend_failing_tries_dm_exactly_once() {
        let transport = RecordingTransport::new().failing_replies().failing_sends().failing_dms();
        assert_eq!(deliver(&due_reminder(), &transport).await, Delivery::Dropped);
        assert_eq!(transport.replies(), 1);
        assert_eq!(transport.channel_sends(), 1);
        assert_eq!(transport.dm_attempts(), 1);
    }

    #[tokio::test]
    async fn tick_removes_due_even_when_every_route_fails() {
        let store = DocumentStore::in_memory();
        let reminders = Reminders::new(store.clone());
        reminders
            .schedule(UserId(5), now(), Reminder::new("a", ChannelId(10), MessageId(1)))
            .await
            .expect("schedule");
        reminders
            .schedule(
                UserId(5),
                now() + Duration::minutes(1),
                Reminder::new("b", ChannelId(10), MessageId(2)),
            )
            .await
            .expect("schedule");

        let transport = RecordingTransport::new().failing_replies().failing_sends().failing_dms();
        let engine = ReminderEngine::new();
        let report = engine.run_tick(&store, &transport, now()).await.expect("tick");

        assert_eq!(report.due, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(engine.counters.snapshot().reminders_dropped, 1);

        let left = reminders.list(UserId(5)).await.expect("list");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].1.content, "b");
    }

    #[tokio::test]
    async fn panicking_delivery_still_removes_due_reminders() {
        let store = DocumentStore::in_memory();
        let reminders = Reminders::new(store.clone());
        let entries = [
            (now() - Duration::minutes(2), "a"),
            (now() - Duration::minutes(1), "b"),
            (now() + Duration::hours(1), "c"),
        ];
        for (at, text) in entries {
            reminders
                .schedule(UserId(5), at, Reminder::new(text, ChannelId(10), MessageId(1)))
                .await
                .expect("schedule");
        }

        // "a" is replied to, then the transport blows up on "b".
        let transport = Arc::new(RecordingTransport::new().panicking_on_resolve(2));
        let tick = {
            let (store, transport) = (store.clone(), Arc::clone(&transport));
            tokio::spawn(async move {
                ReminderEngine::new().run_tick(&store, transport.as_ref(), now()).await
            })
        };
        assert!(tick.await.is_err_and(|e| e.is_panic()));
        assert_eq!(transport.replies(), 1);

        let left = reminders.list(UserId(5)).await.expect("list");
        let texts: Vec<&str> = left.iter().map(|(_, r)| r.content.as_str()).collect();
        assert_eq!(texts, vec!["c"], "delivered and in-flight reminders are gone");
    }

    #[tokio::test]
    async fn empty_document_is_a_no_op() {
        let store = DocumentStore::in_memory();
        let transport = RecordingTransport::new();
        let report = ReminderEngine::new().run_tick(&store, &transport, now()).await.expect("tick");
        assert_eq!(report, DeliveryReport::default());
        assert!(transport.calls().is_empty());
        assert!(store.keys().expect("keys").is_empty(), "no document may be created");
    }

    #[tokio::test]
    async fn nothing_due_makes_no_transport_calls() {
        let store = DocumentStore::in_memory();
        Reminders::new(store.clone())
            .schedule(
                UserId(5),
                now() + Duration::hours(1),
                Reminder::new("later", ChannelId(1), MessageId(1)),
            )
            .await
            .expect("schedule");

        let transport = RecordingTransport::new();
        let report = ReminderEngine::new().run_tick(&store, &transport, now()).await.expect("tick");
        assert_eq!(report.retained, 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_document_fails_the_tick() {
        let store = DocumentStore::in_memory();
        store.update(REMINDERS_KEY, 0_u32, |v| *v = 3).await.expect("seed");
        let result = ReminderEngine::new()
            .run_tick(&store, &RecordingTransport::new(), now())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn schedule_cancel_and_purge() {
        let store = DocumentStore::in_memory();
        let reminders = Reminders::new(store);
        let at = now() + Duration::hours(2);

        assert!(reminders
            .schedule(UserId(1), at, Reminder::new("x", ChannelId(1), MessageId(1)))
            .await
            .expect("schedule")
            .is_none());
        let replaced = reminders
            .schedule(UserId(1), at, Reminder::new("y", ChannelId(1), MessageId(2)))
            .await
            .expect("schedule");
        assert_eq!(replaced.map(|r| r.content), Some("x".to_owned()));

        let cancelled = reminders.cancel(UserId(1), at).await.expect("cancel");
        assert_eq!(cancelled.map(|r| r.content), Some("y".into()));
        assert_eq!(reminders.cancel(UserId(1), at).await.expect("cancel"), None);

        reminders
            .schedule(UserId(2), at, Reminder::new("p", ChannelId(1), MessageId(3)))
            .await
            .expect("schedule");
        reminders
            .schedule(
                UserId(2),
                at + Duration::hours(1),
                Reminder::new("q", ChannelId(1), MessageId(4)),
            )
            .await
            .expect("schedule");
        assert_eq!(reminders.purge_user(UserId(2)).await.expect("purge"), 2);
        assert!(reminders.list(UserId(2)).await.expect("list").is_empty());
        assert_eq!(reminders.purge_user(UserId(2)).await.expect("purge"), 0);
    }
}
