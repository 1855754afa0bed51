//! Process configuration: the core sections plus the scheduler, console and
//! Discord sections, all read from one `pgbot.toml`.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [store]
//! path = "pgbot.db"
//!
//! [scheduler]
//! routine_interval_secs = 3
//!
//! [[scheduler.presence]]
//! kind = "watching"
//! name = "discord.io/pygame_community"
//!
//! [console]
//! channel = 772507247540437032
//! ```

use std::path::Path;
use std::time::Duration;

use pgbot_core::config::BotConfig;
use pgbot_core::{Activity, ActivityKind, ChannelId, PgError};
use pgbot_discord::DiscordConfig;
use serde::{Deserialize, Serialize};

/// Everything the `pgbot` binary reads at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// `[general]`, `[store]`, `[moderation]`, `[greeting]`.
    #[serde(flatten)]
    pub bot: BotConfig,
    /// `[discord]`.
    #[serde(default)]
    pub discord: DiscordConfig,
    /// `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// `[console]`.
    #[serde(default)]
    pub console: ConsoleConfig,
}

impl AppConfig {
    /// Parse from a TOML string.
    ///
    /// # Errors
    /// Returns `PgError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> pgbot_core::Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| PgError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> pgbot_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> pgbot_core::Result<()> {
        if self.scheduler.routine_interval_secs == 0 || self.scheduler.console_interval_secs == 0 {
            return Err(PgError::Config("scheduler intervals must be at least one second".into()));
        }
        if self.console.chunk_size == 0 {
            return Err(PgError::Config("console.chunk_size must be positive".into()));
        }
        Ok(())
    }
}

/// Loop cadence and presence rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between main routine ticks (reminders + presence).
    #[serde(default = "default_routine_interval")]
    pub routine_interval_secs: u64,
    /// Seconds between console relay ticks.
    #[serde(default = "default_console_interval")]
    pub console_interval_secs: u64,
    /// Pause between consecutive presence updates within one tick.
    #[serde(default = "default_presence_pause")]
    pub presence_pause_secs: u64,
    /// Activities shown in order on every tick.
    #[serde(default = "default_presence")]
    pub presence: Vec<Activity>,
}

impl SchedulerConfig {
    /// Main routine period.
    #[must_use]
    pub fn routine_interval(&self) -> Duration {
        Duration::from_secs(self.routine_interval_secs)
    }

    /// Console relay period.
    #[must_use]
    pub fn console_interval(&self) -> Duration {
        Duration::from_secs(self.console_interval_secs)
    }

    /// Pause between presence updates.
    #[must_use]
    pub fn presence_pause(&self) -> Duration {
        Duration::from_secs(self.presence_pause_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            routine_interval_secs: default_routine_interval(),
            console_interval_secs: default_console_interval(),
            presence_pause_secs: default_presence_pause(),
            presence: default_presence(),
        }
    }
}

/// A literal prefix replaced in relayed console output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    /// Text to hide.
    pub from: String,
    /// Replacement.
    pub to: String,
}

/// Console relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Channel receiving relayed output. Unset disables relaying; the buffer
    /// is still drained.
    #[serde(default)]
    pub channel: Option<ChannelId>,
    /// Maximum characters per relayed chunk, before code-block fencing.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bytes kept in the buffer between relays; older output is discarded.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Hide the working directory and the executable's directory.
    #[serde(default = "default_true")]
    pub redact_local_paths: bool,
    /// Extra literal replacements.
    #[serde(default)]
    pub redactions: Vec<Redaction>,
}

impl ConsoleConfig {
    /// Configured redactions plus, if enabled, the local paths of this
    /// process: the working directory becomes `bot_name` and the
    /// executable's directory becomes `"bin"`. Longest prefixes first.
    #[must_use]
    pub fn effective_redactions(&self, bot_name: &str) -> Vec<Redaction> {
        let mut out = self.redactions.clone();
        if self.redact_local_paths {
            if let Ok(cwd) = std::env::current_dir() {
                out.extend(local_path_redaction(&cwd, bot_name));
            }
            let exe = std::env::current_exe().ok();
            if let Some(dir) = exe.as_deref().and_then(Path::parent) {
                out.extend(local_path_redaction(dir, "bin"));
            }
        }
        out.retain(|r| !r.from.is_empty());
        out.sort_by(|a, b| b.from.len().cmp(&a.from.len()));
        out
    }
}

/// Redaction hiding `path`. A filesystem root would match every separator in
/// the output, so it yields nothing.
fn local_path_redaction(path: &Path, to: &str) -> Option<Redaction> {
    path.parent()?;
    Some(Redaction {
        from: path.display().to_string(),
        to: to.to_owned(),
    })
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channel: None,
            chunk_size: default_chunk_size(),
            capacity: default_capacity(),
            redact_local_paths: true,
            redactions: Vec::new(),
        }
    }
}

fn default_true() -> bool { true }
fn default_routine_interval() -> u64 { 3 }
fn default_console_interval() -> u64 { 5 }
fn default_presence_pause() -> u64 { 3 }
// Discord's limit is 2000; the rest is room for the code fence.
fn default_chunk_size() -> usize { 1980 }
fn default_capacity() -> usize { 256 * 1024 }
fn default_presence() -> Vec<Activity> {
    vec![
        Activity::new(ActivityKind::Watching, "discord.io/pygame_community"),
        Activity::new(ActivityKind::Playing, "in discord.io/pygame_community"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").expect("parse");
        assert_eq!(config.scheduler.routine_interval(), Duration::from_secs(3));
        assert_eq!(config.scheduler.console_interval(), Duration::from_secs(5));
        assert_eq!(config.scheduler.presence.len(), 2);
        assert_eq!(config.scheduler.presence[0].kind, ActivityKind::Watching);
        assert_eq!(config.console.chunk_size, 1980);
        assert_eq!(config.console.channel, None);
        assert_eq!(config.bot.moderation.mute_threshold, 10);
    }

    #[test]
    fn sections_are_read_side_by_side() {
        let config = AppConfig::from_toml(
            r#"
            [general]
            log_level = "debug"

            [store]
            path = ":memory:"

            [discord]
            guild_id = 772505616680878080

            [scheduler]
            presence_pause_secs = 1

            [[scheduler.presence]]
            kind = "listening"
            name = "the snek"

            [console]
            channel = 42
            redactions = [{ from = "/home/bot", to = "~" }]
            "#,
        )
        .expect("parse");

        assert_eq!(config.bot.general.log_level, "debug");
        assert_eq!(config.bot.store.path.as_os_str(), ":memory:");
        assert_eq!(config.discord.guild_id, Some(772_505_616_680_878_080));
        assert_eq!(
            config.scheduler.presence,
            vec![Activity::new(ActivityKind::Listening, "the snek")]
        );
        assert_eq!(config.console.channel, Some(ChannelId(42)));
        assert_eq!(config.console.redactions[0].to, "~");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err =
            AppConfig::from_toml("[scheduler]\nroutine_interval_secs = 0").expect_err("invalid");
        assert!(matches!(err, PgError::Config(_)));
    }

    #[test]
    fn redactions_sorted_longest_first() {
        let config = ConsoleConfig {
            redact_local_paths: false,
            redactions: vec![
                Redaction { from: "/a".into(), to: "x".into() },
                Redaction { from: "/a/b/c".into(), to: "y".into() },
                Redaction { from: String::new(), to: "z".into() },
            ],
            ..ConsoleConfig::default()
        };
        let effective = config.effective_redactions("PgBot");
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].from, "/a/b/c");
    }

    #[test]
    fn filesystem_root_is_never_redacted() {
        assert_eq!(local_path_redaction(Path::new("/"), "PgBot"), None);
        assert_eq!(
            local_path_redaction(Path::new("/srv/pgbot"), "PgBot"),
            Some(Redaction { from: "/srv/pgbot".into(), to: "PgBot".into() })
        );
    }
}
