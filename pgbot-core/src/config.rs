//! Configuration for the pgbot core.
//!
//! Maps to the `[general]`, `[store]`, `[moderation]` and `[greeting]`
//! sections of `pgbot.toml`. Every field has a default so an empty file is a
//! valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Core configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Document store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Trigger-token moderation tuning.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Canned replies for the self-introduction heuristic.
    #[serde(default)]
    pub greeting: GreetingConfig,
}

impl BotConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `PgError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::PgError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level used when `RUST_LOG` is unset: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Display name used in log lines and path redaction.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            bot_name: default_bot_name(),
        }
    }
}

/// Document store / persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `:memory:` keeps everything in-process.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Use WAL mode for the SQLite file.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Store and verify a CRC-32 of every document.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            wal_mode: true,
            checksum_enabled: true,
        }
    }
}

/// Trigger-token moderation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Token whose repetition counts as abuse (the bonk emoji by default).
    #[serde(default = "default_trigger_token")]
    pub trigger_token: String,
    /// Warn when `anger + occurrences` exceeds this.
    #[serde(default = "default_30")]
    pub warn_anger_threshold: i64,
    /// Mute once a single message carries at least this many tokens.
    #[serde(default = "default_10")]
    pub mute_threshold: u32,
    /// Upper bound (inclusive) of the random mood jitter.
    #[serde(default = "default_8")]
    pub max_jitter: u32,
    /// Log every escalation at `info`.
    #[serde(default = "default_true")]
    pub log_moderation_events: bool,
    /// Text of the advisory warning reply.
    #[serde(default = "default_warning_text")]
    pub warning_text: String,
    /// Text sent after a community-support signal.
    #[serde(default = "default_thanks_text")]
    pub thanks_text: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            trigger_token: default_trigger_token(),
            warn_anger_threshold: 30,
            mute_threshold: 10,
            max_jitter: 8,
            log_moderation_events: true,
            warning_text: default_warning_text(),
            thanks_text: default_thanks_text(),
        }
    }
}

/// Replies for the "I am ..." heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreetingConfig {
    /// Whether the heuristic runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Messages at or above this many characters are ignored.
    #[serde(default = "default_60")]
    pub max_message_chars: usize,
    /// Quotes used when someone says just "I am".
    #[serde(default = "default_quotes")]
    pub quotes: Vec<String>,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_chars: 60,
            quotes: default_quotes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_bot_name() -> String { "PgBot".to_string() }
fn default_store_path() -> PathBuf { PathBuf::from("pgbot.db") }
fn default_trigger_token() -> String { "<:pg_bonk:780423317718302781>".to_string() }
fn default_warning_text() -> String {
    "Did you hit the snek? You mortal mammal! How you dare to boncc a snake?".to_string()
}
fn default_thanks_text() -> String {
    "A LOT OF THANKSSS! :heart: <:pg_party:772652894574084098>".to_string()
}
fn default_quotes() -> Vec<String> {
    vec![
        "To be, or not to be, that is the question".to_string(),
        "We know what we are, but know not what we may be.".to_string(),
        "I am one who loves not wisely, but too well.".to_string(),
        "I am a man more sinned against than sinning.".to_string(),
    ]
}
fn default_8() -> u32 { 8 }
fn default_10() -> u32 { 10 }
fn default_30() -> i64 { 30 }
fn default_60() -> usize { 60 }
