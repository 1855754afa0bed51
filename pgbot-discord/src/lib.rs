//! # pgbot-discord: Discord transport for the pgbot routines
//!
//! Implements [`pgbot_core::ChatTransport`] over the Discord v10 REST API:
//!   - channel resolution (`GET /channels/{id}`)
//!   - replies and plain sends with explicit `allowed_mentions`
//!   - user lookup and DM channel creation
//!
//! Every request carries the configured timeout. Non-success statuses become
//! [`pgbot_core::TransportError`]s, which the core treats as a reason to fall
//! back, never as a reason to retry. Rate limits are not handled here.
//!
//! Presence is a gateway operation; [`DiscordClient`] publishes it on a watch
//! channel for the gateway session to apply.

pub mod client;
pub mod error;
pub mod types;

pub use client::DiscordClient;
pub use error::DiscordError;
pub use types::DiscordConfig;
