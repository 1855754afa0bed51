//! Discord client: [`ChatTransport`] over the v10 REST API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use pgbot_core::transport::TransportResult;
use pgbot_core::{Activity, ChannelId, ChatTransport, MentionPolicy, MessageId, MessageRef, UserId};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::DiscordError;
use crate::types::{
    parse_snowflake, ChannelPayload, CreateDm, CreateMessage, DiscordConfig, MessagePayload,
    UserPayload, TEXT_CHANNEL_TYPES,
};

/// Error bodies longer than this are cut before they reach the logs.
const MAX_ERROR_BODY: usize = 512;

/// REST client for the bot account.
///
/// Presence is a gateway concern, so [`set_presence`](ChatTransport::set_presence)
/// only publishes the activity on a watch channel; the gateway session
/// subscribes with [`presence_updates`](Self::presence_updates).
pub struct DiscordClient {
    http: Client,
    api_base: String,
    token: String,
    guild_id: Option<u64>,
    timeout_ms: u64,
    presence: watch::Sender<Option<Activity>>,
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .field("guild_id", &self.guild_id)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    /// Create a client with an explicit token.
    ///
    /// # Errors
    ///
    /// [`DiscordError::ConfigError`] if the token is empty or the HTTP client
    /// cannot be built.
    pub fn new(config: &DiscordConfig, token: impl Into<String>) -> Result<Self, DiscordError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DiscordError::ConfigError("bot token is empty".into()));
        }

        let http = Client::builder()
            .user_agent(concat!(
                "pgbot (https://github.com/pygame-community, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()
            .map_err(|e| DiscordError::ConfigError(e.to_string()))?;
        let (presence, _) = watch::channel(None);

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            token,
            guild_id: config.guild_id,
            timeout_ms: config.request_timeout_ms,
            presence,
        })
    }

    /// Create a client reading the token from `config.token_env`.
    ///
    /// # Errors
    ///
    /// [`DiscordError::ConfigError`] if the variable is unset or empty.
    pub fn from_env(config: &DiscordConfig) -> Result<Self, DiscordError> {
        let token = std::env::var(&config.token_env)
            .map_err(|_| {
                DiscordError::ConfigError(format!(
                    "environment variable {} is not set",
                    config.token_env
                ))
            })?;
        Self::new(config, token)
    }

    /// Subscribe to presence changes requested through the transport.
    ///
    /// The gateway session must hold one of these for presence rotation to
    /// reach Discord; REST alone cannot change presence.
    #[must_use]
    pub fn presence_updates(&self) -> watch::Receiver<Option<Activity>> {
        self.presence.subscribe()
    }

    /// Whether anything (normally the gateway session) applies presence.
    #[must_use]
    pub fn presence_attached(&self) -> bool {
        self.presence.receiver_count() > 0
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, DiscordError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.token))
            .timeout(Duration::from_millis(self.timeout_ms));
        if let Some(body) = body {
            req = req.json(body);
        }

        let start = Instant::now();
        let resp = req.send().await.map_err(|e| match DiscordError::from(e) {
            DiscordError::Timeout(_) => DiscordError::Timeout(self.timeout_ms),
            other => other,
        })?;
        let status = resp.status();
        debug!(
            %method,
            path,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis(),
            "discord request"
        );

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(DiscordError::Http {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>().await.map_err(|e| DiscordError::ParseError(e.to_string()))
    }

    async fn post_message(
        &self,
        channel: ChannelId,
        body: &CreateMessage,
    ) -> Result<MessageId, DiscordError> {
        let message: MessagePayload = self
            .request(Method::POST, &format!("/channels/{channel}/messages"), Some(body))
            .await?;
        Ok(MessageId(parse_snowflake(&message.id)?))
    }

    fn is_postable(&self, channel: &ChannelPayload) -> bool {
        if !TEXT_CHANNEL_TYPES.contains(&channel.kind) {
            return false;
        }
        match (self.guild_id, channel.guild_id.as_deref()) {
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => parse_snowflake(actual).is_ok_and(|g| g == expected),
            (_, None) => false,
        }
    }
}

#[async_trait]
impl ChatTransport for DiscordClient {
    async fn resolve_text_channel(&self, channel: ChannelId) -> TransportResult<bool> {
        let payload = self
            .request::<ChannelPayload, ()>(Method::GET, &format!("/channels/{channel}"), None)
            .await;
        match payload {
            Ok(payload) => Ok(self.is_postable(&payload)),
            Err(DiscordError::Http {
                status: 403 | 404,
                ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> TransportResult<MessageRef> {
        let payload: MessagePayload = self
            .request::<_, ()>(Method::GET, &format!("/channels/{channel}/messages/{message}"), None)
            .await?;
        Ok(MessageRef {
            channel: ChannelId(parse_snowflake(&payload.channel_id)?),
            id: MessageId(parse_snowflake(&payload.id)?),
        })
    }

    async fn reply(
        &self,
        target: MessageRef,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId> {
        let body = CreateMessage::reply(content, mentions, target.channel, target.id);
        Ok(self.post_message(target.channel, &body).await?)
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        mentions: &MentionPolicy,
    ) -> TransportResult<MessageId> {
        Ok(self.post_message(channel, &CreateMessage::new(content, mentions)).await?)
    }

    async fn fetch_user(&self, user: UserId) -> TransportResult<UserId> {
        let payload: UserPayload = self
            .request::<_, ()>(Method::GET, &format!("/users/{user}"), None)
            .await?;
        Ok(UserId(parse_snowflake(&payload.id)?))
    }

    async fn open_dm(&self, user: UserId) -> TransportResult<ChannelId> {
        let body = CreateDm {
            recipient_id: user.0.to_string(),
        };
        let payload: ChannelPayload = self
            .request(Method::POST, "/users/@me/channels", Some(&body))
            .await?;
        Ok(ChannelId(parse_snowflake(&payload.id)?))
    }

    async fn set_presence(&self, activity: &Activity) -> TransportResult<()> {
        self.presence.send_replace(Some(activity.clone()));
        debug!(%activity, subscribers = self.presence.receiver_count(), "presence published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbot_core::ActivityKind;

    fn client(guild_id: Option<u64>) -> DiscordClient {
        let config = DiscordConfig {
            guild_id,
            ..DiscordConfig::default()
        };
        DiscordClient::new(&config, "token").expect("client")
    }

    fn channel(kind: u8, guild: Option<&str>) -> ChannelPayload {
        ChannelPayload {
            id: "10".into(),
            kind,
            guild_id: guild.map(str::to_owned),
        }
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = DiscordClient::new(&DiscordConfig::default(), "  ").expect_err("empty token");
        assert!(matches!(err, DiscordError::ConfigError(_)));
    }

    #[test]
    fn missing_token_variable_is_config_error() {
        let config = DiscordConfig {
            token_env: "PGBOT_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..DiscordConfig::default()
        };
        assert!(matches!(DiscordClient::from_env(&config), Err(DiscordError::ConfigError(_))));
    }

    #[test]
    fn only_guild_text_channels_are_postable() {
        let any_guild = client(None);
        assert!(any_guild.is_postable(&channel(0, Some("1"))));
        assert!(any_guild.is_postable(&channel(5, Some("1"))));
        assert!(!any_guild.is_postable(&channel(2, Some("1"))), "voice channel");
        assert!(!any_guild.is_postable(&channel(1, None)), "DM channel");

        let pinned = client(Some(7));
        assert!(pinned.is_postable(&channel(0, Some("7"))));
        assert!(!pinned.is_postable(&channel(0, Some("8"))));
    }

    #[tokio::test]
    async fn presence_is_published_to_subscribers() {
        let client = client(None);
        let mut updates = client.presence_updates();
        let activity = Activity::new(ActivityKind::Playing, "in discord.io/pygame_community");

        client.set_presence(&activity).await.expect("presence");

        updates.changed().await.expect("changed");
        assert_eq!(updates.borrow().as_ref(), Some(&activity));
    }

    #[test]
    fn presence_is_attached_only_while_subscribed() {
        let client = client(None);
        assert!(!client.presence_attached());
        let updates = client.presence_updates();
        assert!(client.presence_attached());
        drop(updates);
        assert!(!client.presence_attached());
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_failure() {
        let config = DiscordConfig {
            api_base: "http://127.0.0.1:9".into(),
            request_timeout_ms: 500,
            ..DiscordConfig::default()
        };
        let client = DiscordClient::new(&config, "token").expect("client");
        let result = client.fetch_user(UserId(1)).await;
        assert!(result.is_err());
    }
}
