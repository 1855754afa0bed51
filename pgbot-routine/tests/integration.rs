//! End-to-end tests: scheduler loops, event routing and the document store
//! working together against a recording transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use pgbot_core::config::StoreConfig;
use pgbot_core::emotion::Emotion;
use pgbot_core::moderation::MUTES_KEY;
use pgbot_core::reminder::{Reminder, ReminderBook, Reminders, REMINDERS_KEY};
use pgbot_core::testing::{Call, RecordingTransport};
use pgbot_core::{
    BotConfig, ChannelId, DocumentStore, IncomingMessage, MessageId, Moderator, UserId,
};
use pgbot_routine::{AppConfig, ChatEvent, ConsoleBuffer, EventRouter, Scheduler};
use rand::rngs::mock::StepRng;

const BONK: &str = "<:pg_bonk:780423317718302781>";
const BOT: UserId = UserId(999);

fn app_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.console.redact_local_paths = false;
    config.console.channel = Some(ChannelId(77));
    config
}

fn message(author: u64, content: &str) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(500),
        channel: ChannelId(10),
        author: UserId(author),
        author_is_bot: false,
        content: content.to_owned(),
        received_at: Utc::now(),
    }
}

fn router(
    store: &DocumentStore,
    transport: Arc<RecordingTransport>,
) -> (EventRouter, Arc<Moderator>) {
    // Every jitter draw is zero.
    let moderator =
        Moderator::new(store.clone(), &BotConfig::default()).with_rng(StepRng::new(0, 0));
    let moderator = Arc::new(moderator);
    let router = EventRouter::new(store.clone(), Arc::clone(&moderator), transport, BOT);
    (router, moderator)
}

#[tokio::test(start_paused = true)]
async fn scheduler_delivers_due_reminders_and_keeps_the_rest() {
    let store = DocumentStore::in_memory();
    let reminders = Reminders::new(store.clone());
    let now = Utc::now();
    reminders
        .schedule(
            UserId(1),
            now - ChronoDuration::minutes(1),
            Reminder::new("due", ChannelId(10), MessageId(1)),
        )
        .await
        .expect("schedule");
    reminders
        .schedule(
            UserId(1),
            now + ChronoDuration::days(1),
            Reminder::new("later", ChannelId(10), MessageId(2)),
        )
        .await
        .expect("schedule");

    let transport = Arc::new(RecordingTransport::new());
    let console = ConsoleBuffer::new(4096);
    let scheduler = Scheduler::new(store.clone(), transport.clone(), console, &app_config());
    let counters = Arc::clone(scheduler.counters());
    let handle = scheduler.spawn();

    tokio::time::sleep(Duration::from_secs(7)).await;
    handle.shutdown().await;

    assert_eq!(transport.replies(), 1, "the due reminder is delivered exactly once");
    let left = reminders.list(UserId(1)).await.expect("list");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].1.content, "later");

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.reminders_delivered, [1, 0, 0]);
    assert!(snapshot.ticks_completed >= 2);
    assert_eq!(snapshot.ticks_failed, 0);
    assert!(transport
        .calls()
        .iter()
        .any(|c| matches!(c, Call::SetPresence(_))));
}

#[tokio::test(start_paused = true)]
async fn failing_tick_does_not_stop_the_loop() {
    let store = DocumentStore::in_memory();
    // Not a reminder book: every tick fails to decode it.
    store.update(REMINDERS_KEY, String::new(), |s| s.push_str("garbage")).await.expect("seed");

    let transport = Arc::new(RecordingTransport::new());
    let console = ConsoleBuffer::new(4096);
    let scheduler = Scheduler::new(store.clone(), transport.clone(), console, &app_config());
    let counters = Arc::clone(scheduler.counters());
    let handle = scheduler.spawn();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(counters.snapshot().ticks_failed >= 3, "loop keeps ticking after failures");

    // Repair the document; the next tick succeeds.
    let mut lease = store.acquire(REMINDERS_KEY).await;
    lease.set(&ReminderBook::new()).expect("set");
    lease.release().await.expect("release");

    tokio::time::sleep(Duration::from_secs(4)).await;
    handle.shutdown().await;
    assert!(counters.snapshot().ticks_completed >= 1);
}

#[tokio::test(start_paused = true)]
async fn console_loop_relays_buffered_output() {
    let transport = Arc::new(RecordingTransport::new());
    let console = ConsoleBuffer::new(4096);
    let store = DocumentStore::in_memory();
    let scheduler = Scheduler::new(store, transport.clone(), console.clone(), &app_config());
    let handle = scheduler.spawn();

    console.push("INFO routines running\n");
    tokio::time::sleep(Duration::from_secs(6)).await;
    handle.shutdown().await;

    assert!(transport.calls().contains(&Call::Send {
        channel: ChannelId(77),
        content: "```ansi\nINFO routines running\n```".into(),
        mentions: pgbot_core::MentionPolicy::none(),
    }));
    assert!(console.is_empty());
}

#[tokio::test]
async fn bonk_spam_mutes_and_angers() {
    let store = DocumentStore::in_memory();
    let transport = Arc::new(RecordingTransport::new());
    let (router, moderator) = router(&store, transport.clone());

    let msg = message(3, &BONK.repeat(12));
    let received = msg.received_at;
    router.handle(ChatEvent::Message(msg)).await.expect("handle");

    assert_eq!(
        moderator.mute_expiry(UserId(3), received).await.expect("expiry"),
        Some(received + ChronoDuration::minutes(4))
    );
    assert_eq!(moderator.emotions().get(Emotion::Anger).await.expect("get"), 2);
    assert_eq!(moderator.emotions().get(Emotion::Happy).await.expect("get"), -2);
}

#[tokio::test]
async fn bot_messages_are_ignored() {
    let store = DocumentStore::in_memory();
    let transport = Arc::new(RecordingTransport::new());
    let (router, _) = router(&store, transport.clone());

    let mut msg = message(BOT.0, &BONK.repeat(20));
    router.handle(ChatEvent::Message(msg.clone())).await.expect("handle");
    msg.author = UserId(4);
    msg.author_is_bot = true;
    router.handle(ChatEvent::Message(msg)).await.expect("handle");

    assert!(store.keys().expect("keys").is_empty());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn introduction_gets_a_greeting() {
    let store = DocumentStore::in_memory();
    let transport = Arc::new(RecordingTransport::new());
    let (router, _) = router(&store, transport.clone());

    router
        .handle(ChatEvent::Message(message(5, "hi, I am new here")))
        .await
        .expect("handle");
    assert_eq!(transport.sent_contents(), vec!["Hi new here! I am <@!999>"]);
}

#[tokio::test]
async fn boost_triggers_euphoria() {
    let store = DocumentStore::in_memory();
    let transport = Arc::new(RecordingTransport::new());
    let (router, moderator) = router(&store, transport.clone());
    moderator.emotions().update(Emotion::Anger, 90).await.expect("seed");
    moderator.emotions().update(Emotion::Confused, 30).await.expect("seed");

    router
        .handle(ChatEvent::ServerBoost {
            channel: ChannelId(10),
            user: UserId(8),
        })
        .await
        .expect("handle");

    let mood = moderator.emotions().snapshot().await.expect("snapshot");
    assert_eq!((mood.happy, mood.anger, mood.bored, mood.confused), (100, 0, 0, 0));
    assert_eq!(transport.channel_sends(), 1);
}

#[tokio::test]
async fn leaving_member_loses_reminders() {
    let store = DocumentStore::in_memory();
    let transport = Arc::new(RecordingTransport::new());
    let (router, _) = router(&store, transport);
    let reminders = Reminders::new(store.clone());
    reminders
        .schedule(
            UserId(6),
            Utc::now() + ChronoDuration::hours(1),
            Reminder::new("x", ChannelId(1), MessageId(1)),
        )
        .await
        .expect("schedule");

    router.handle(ChatEvent::MemberLeft { user: UserId(6) }).await.expect("handle");
    assert!(reminders.list(UserId(6)).await.expect("list").is_empty());
}

#[tokio::test]
async fn moderation_and_reminders_share_a_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_config = StoreConfig {
        path: dir.path().join("pgbot.db"),
        ..StoreConfig::default()
    };
    let store = DocumentStore::open(&store_config).expect("open");
    let transport = Arc::new(RecordingTransport::new());
    let (router, _) = router(&store, transport.clone());

    let reminders = Reminders::new(store.clone());
    let past = Utc::now() - ChronoDuration::seconds(5);
    reminders
        .schedule(UserId(2), past, Reminder::new("stand up", ChannelId(10), MessageId(3)))
        .await
        .expect("schedule");

    let mut config = app_config();
    config.scheduler.presence.clear();
    let console = ConsoleBuffer::new(64);
    let scheduler = Scheduler::new(store.clone(), transport.clone(), console, &config);
    let (tick, routed) = tokio::join!(
        scheduler.routine_tick(Utc::now()),
        router.handle(ChatEvent::Message(message(2, &BONK.repeat(10))))
    );
    tick.expect("tick");
    routed.expect("route");

    let keys = store.keys().expect("keys");
    assert!(keys.contains(&MUTES_KEY.to_owned()));
    assert!(keys.contains(&REMINDERS_KEY.to_owned()));
    assert!(reminders.list(UserId(2)).await.expect("list").is_empty());
}
