//! The two background loops.
//!
//! - **routine** (3 s): reminder pass under the `"reminders"` lease, then the
//!   presence rotation.
//! - **console** (5 s): relay buffered log output to the console channel.
//!
//! Both loops stop on the shared [`CancellationToken`]. Cancellation is only
//! observed between ticks and during presence pauses, so a reminder pass
//! always finishes its write-back. A tick that fails or panics is logged and
//! counted; the loop carries on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use pgbot_core::{BotCounters, ChatTransport, DeliveryReport, DocumentStore, ReminderEngine, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ConsoleConfig, Redaction, SchedulerConfig};
use crate::console::{self, ConsoleBuffer};

/// Owns everything the loops need.
pub struct Scheduler {
    store: DocumentStore,
    transport: Arc<dyn ChatTransport>,
    engine: ReminderEngine,
    console: ConsoleBuffer,
    config: SchedulerConfig,
    console_config: ConsoleConfig,
    redactions: Vec<Redaction>,
    counters: Arc<BotCounters>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("console_channel", &self.console_config.channel)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a scheduler from the process configuration.
    #[must_use]
    pub fn new(
        store: DocumentStore,
        transport: Arc<dyn ChatTransport>,
        console: ConsoleBuffer,
        config: &AppConfig,
    ) -> Self {
        let counters = Arc::new(BotCounters::new());
        Self {
            store,
            transport,
            engine: ReminderEngine::with_counters(Arc::clone(&counters)),
            console,
            config: config.scheduler.clone(),
            redactions: config.console.effective_redactions(&config.bot.general.bot_name),
            console_config: config.console.clone(),
            counters,
            cancel: CancellationToken::new(),
        }
    }

    /// Share `counters` with other components.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<BotCounters>) -> Self {
        self.engine = ReminderEngine::with_counters(Arc::clone(&counters));
        self.counters = counters;
        self
    }

    /// Stop on `cancel` instead of a private token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Counters updated by the loops.
    #[must_use]
    pub fn counters(&self) -> &Arc<BotCounters> {
        &self.counters
    }

    /// One main routine tick at `now`: reminder pass (lease released before
    /// returning from it), then the presence rotation.
    ///
    /// # Errors
    ///
    /// Store failures from the reminder pass. Presence failures are logged.
    pub async fn routine_tick(&self, now: DateTime<Utc>) -> Result<DeliveryReport> {
        let report = self.engine.run_tick(&self.store, self.transport.as_ref(), now).await?;

        for (i, activity) in self.config.presence.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.config.presence_pause()) => {}
                }
            }
            if let Err(e) = self.transport.set_presence(activity).await {
                warn!(%activity, error = %e, "presence update failed");
            }
        }

        Ok(report)
    }

    /// One console relay tick. Returns the number of chunks sent.
    pub async fn console_tick(&self) -> usize {
        console::relay(
            &self.console,
            &self.redactions,
            self.console_config.channel,
            self.console_config.chunk_size,
            self.transport.as_ref(),
        )
        .await
    }

    /// Run the main routine until cancelled.
    pub async fn run_routine_loop(&self) {
        let mut interval = tokio::time::interval(self.config.routine_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.routine_interval_secs, "routine loop started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match AssertUnwindSafe(self.routine_tick(Utc::now())).catch_unwind().await {
                Ok(Ok(report)) => {
                    BotCounters::bump(&self.counters.ticks_completed);
                    if report.due > 0 {
                        debug!(?report, "routine tick complete");
                    }
                }
                Ok(Err(e)) => {
                    BotCounters::bump(&self.counters.ticks_failed);
                    error!(error = %e, "routine tick failed");
                }
                Err(panic) => {
                    BotCounters::bump(&self.counters.ticks_failed);
                    error!(panic = panic_message(panic.as_ref()), "routine tick panicked");
                }
            }
        }
        info!("routine loop stopped");
    }

    /// Run the console relay until cancelled.
    pub async fn run_console_loop(&self) {
        let mut interval = tokio::time::interval(self.config.console_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.guarded_console_tick().await;
        }
        // Final flush so shutdown messages are not lost.
        self.guarded_console_tick().await;
    }

    async fn guarded_console_tick(&self) {
        if let Err(panic) = AssertUnwindSafe(self.console_tick()).catch_unwind().await {
            BotCounters::bump(&self.counters.ticks_failed);
            error!(panic = panic_message(panic.as_ref()), "console tick panicked");
        }
    }

    /// Spawn both loops on the current runtime.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = self.cancel.clone();
        let this = Arc::new(self);

        let routine = {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.run_routine_loop().await })
        };
        let console = {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.run_console_loop().await })
        };

        SchedulerHandle {
            cancel,
            routine,
            console,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle to the spawned loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    routine: JoinHandle<()>,
    console: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Token that stops both loops.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel both loops and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in [("routine", self.routine), ("console", self.console)] {
            if let Err(e) = task.await {
                error!(loop_name = name, error = %e, "scheduler loop panicked");
            }
        }
    }
}
