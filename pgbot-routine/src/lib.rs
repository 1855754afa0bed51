//! # pgbot-routine: background loops for pgbot
//!
//! Glue between the platform-agnostic `pgbot-core` engines and a running
//! bot process.
//!
//! ```text
//!  gateway events ──► EventRouter ──► Moderator / Reminders
//!                                          │
//!  Scheduler ── routine loop (3 s) ──► ReminderEngine ──► DocumentStore
//!            │                     └─► presence rotation
//!            └─ console loop (5 s) ──► ConsoleBuffer ──► console channel
//! ```
//!
//! ## Modules
//!
//! - `config`: `pgbot.toml` layout for the whole process
//! - `console`: bounded log buffer and the relay pass
//! - `events`: inbound chat events
//! - `hooks`: event routing into the core engines
//! - `logging`: tracing subscriber setup
//! - `scheduler`: the two fixed-interval loops

pub mod config;
pub mod console;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod scheduler;

pub use config::AppConfig;
pub use console::ConsoleBuffer;
pub use events::ChatEvent;
pub use hooks::EventRouter;
pub use scheduler::{Scheduler, SchedulerHandle};
