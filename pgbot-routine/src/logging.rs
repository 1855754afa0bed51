//! Tracing setup for the binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::console::ConsoleBuffer;

/// Install the global subscriber: `RUST_LOG` if set, otherwise
/// `default_level`; output goes to stderr and into `console` for relaying.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(default_level: &str, console: ConsoleBuffer) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(console).with_ansi(true).with_target(false))
        .try_init()
}
