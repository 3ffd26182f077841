//! Discord REST client used by the dispatch engine and the interaction front-end.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::truncate_for_error;
use courier_dispatch::{
    ChannelHandle, DispatchPlatform, GroupRole, GroupSummary, MessageHandle, PlatformError,
    Recipient, StatusPost,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::discord_embed::{render_progress_embed, DiscordEmbed};

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const ERROR_BODY_MAX_CHARS: usize = 240;
const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordRestConfig {
    pub api_base: String,
    pub bot_token: String,
    pub application_id: Option<String>,
    pub request_timeout_ms: u64,
}

impl DiscordRestConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            bot_token: bot_token.into(),
            application_id: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordUserPayload {
    id: String,
    #[serde(default)]
    username: String,
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMemberPayload {
    user: Option<DiscordUserPayload>,
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

impl DiscordMemberPayload {
    fn into_recipient(self) -> Option<Recipient> {
        let user = self.user?;
        let display_name = [self.nick, user.global_name]
            .into_iter()
            .flatten()
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| user.username.clone());
        Some(Recipient {
            id: user.id,
            display_name,
            role_ids: self.roles,
            is_bot: user.bot,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordGuildPayload {
    id: String,
    name: String,
    icon: Option<String>,
    approximate_member_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordRolePayload {
    id: String,
    name: String,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    managed: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMessagePayload {
    id: String,
    channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordChannelPayload {
    id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DiscordErrorPayload {
    message: Option<String>,
    retry_after: Option<f64>,
}

/// Parses a `Retry-After` header given as seconds (fractional allowed) or an HTTP date.
pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)))
}

/// Maps a non-success Discord response onto the platform failure taxonomy.
pub fn classify_discord_failure(
    status: StatusCode,
    retry_after_header: Option<Duration>,
    body: &str,
) -> PlatformError {
    let payload = serde_json::from_str::<DiscordErrorPayload>(body).unwrap_or_default();
    let detail = payload
        .message
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| truncate_for_error(body, ERROR_BODY_MAX_CHARS));
    match status {
        StatusCode::FORBIDDEN => PlatformError::Forbidden { detail },
        StatusCode::NOT_FOUND => PlatformError::NotFound { detail },
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited {
            retry_after: payload
                .retry_after
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
                .or(retry_after_header),
        },
        other => PlatformError::Status {
            status: other.as_u16(),
            detail,
        },
    }
}

#[derive(Clone)]
/// Bot-token authenticated Discord REST client.
pub struct DiscordRestClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    application_id: Option<String>,
}

impl DiscordRestClient {
    pub fn new(config: DiscordRestConfig) -> Result<Self> {
        let bot_token = config.bot_token.trim().to_string();
        if bot_token.is_empty() {
            bail!("discord bot token must not be empty");
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("DiscordBot (https://github.com/courier-rs/courier, 0.1)"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create discord api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token,
            application_id: config
                .application_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|error| PlatformError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let body = response
                .text()
                .await
                .map_err(|error| PlatformError::Transport(error.to_string()))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|error| {
                PlatformError::Transport(format!("invalid discord response body: {error}"))
            });
        }
        let retry_after = parse_retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        let error = classify_discord_failure(status, retry_after, &body);
        debug!(status = status.as_u16(), reason = %error.reason_code(), "discord request failed");
        Err(error)
    }

    fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, PlatformError> {
        serde_json::from_value(value).map_err(|error| {
            PlatformError::Transport(format!("invalid discord {what} payload: {error}"))
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.execute(self.authorized(self.http.post(self.url(path))).json(body))
            .await
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        self.execute(self.authorized(self.http.patch(self.url(path))).json(body))
            .await
    }

    async fn create_message(
        &self,
        channel_id: &str,
        body: &Value,
    ) -> Result<MessageHandle, PlatformError> {
        let value = self
            .post_json(&format!("/channels/{}/messages", channel_id.trim()), body)
            .await?;
        let message: DiscordMessagePayload = Self::decode(value, "message")?;
        Ok(MessageHandle {
            channel_id: message
                .channel_id
                .unwrap_or_else(|| channel_id.trim().to_string()),
            message_id: message.id,
        })
    }

    pub async fn post_embed(
        &self,
        channel_id: &str,
        embed: &DiscordEmbed,
    ) -> Result<MessageHandle, PlatformError> {
        self.create_message(channel_id, &json!({ "embeds": [embed] }))
            .await
    }

    fn require_application_id(&self) -> Result<&str> {
        self.application_id
            .as_deref()
            .ok_or_else(|| anyhow!("discord application id is not configured"))
    }

    /// Replaces the application's guild-scoped commands. Returns the registered count.
    pub async fn register_guild_commands(&self, guild_id: &str, commands: &Value) -> Result<usize> {
        let application_id = self.require_application_id()?;
        let path = format!(
            "/applications/{}/guilds/{}/commands",
            application_id,
            guild_id.trim()
        );
        let value = self
            .execute(self.authorized(self.http.put(self.url(&path))).json(commands))
            .await
            .with_context(|| format!("failed to register commands in guild {guild_id}"))?;
        Ok(value.as_array().map(Vec::len).unwrap_or(0))
    }

    /// Creates an interaction follow-up message and returns its id.
    pub async fn create_followup(&self, interaction_token: &str, body: &Value) -> Result<String> {
        let application_id = self.require_application_id()?;
        let path = format!("/webhooks/{application_id}/{}", interaction_token.trim());
        let value = self
            .execute(self.http.post(self.url(&path)).query(&[("wait", "true")]).json(body))
            .await
            .context("failed to create interaction follow-up")?;
        let message: DiscordMessagePayload = Self::decode(value, "follow-up")?;
        Ok(message.id)
    }

    pub async fn edit_followup(
        &self,
        interaction_token: &str,
        message_id: &str,
        body: &Value,
    ) -> Result<()> {
        let application_id = self.require_application_id()?;
        let path = format!(
            "/webhooks/{application_id}/{}/messages/{}",
            interaction_token.trim(),
            message_id.trim()
        );
        self.execute(self.http.patch(self.url(&path)).json(body))
            .await
            .context("failed to edit interaction follow-up")?;
        Ok(())
    }
}

fn status_post_body(post: &StatusPost) -> Value {
    match post {
        StatusPost::Card(card) => json!({ "content": "", "embeds": [render_progress_embed(card)] }),
        StatusPost::Text { text } => json!({ "content": text }),
    }
}

#[async_trait]
impl DispatchPlatform for DiscordRestClient {
    async fn list_members(
        &self,
        group_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Recipient>, PlatformError> {
        let mut query = vec![("limit", limit.clamp(1, 1000).to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let request = self
            .authorized(
                self.http
                    .get(self.url(&format!("/guilds/{}/members", group_id.trim()))),
            )
            .query(&query);
        let value = self.execute(request).await?;
        let members: Vec<DiscordMemberPayload> = Self::decode(value, "member list")?;
        // A dropped row would shorten the page and move the cursor backwards.
        members
            .into_iter()
            .map(|member| {
                member.into_recipient().ok_or_else(|| {
                    PlatformError::Transport(
                        "discord member list row is missing its user".to_string(),
                    )
                })
            })
            .collect()
    }

    async fn create_private_channel(&self, user_id: &str) -> Result<ChannelHandle, PlatformError> {
        let value = self
            .post_json("/users/@me/channels", &json!({ "recipient_id": user_id }))
            .await?;
        let channel: DiscordChannelPayload = Self::decode(value, "channel")?;
        Ok(ChannelHandle { id: channel.id })
    }

    async fn send_message(
        &self,
        channel: &ChannelHandle,
        text: &str,
    ) -> Result<MessageHandle, PlatformError> {
        self.create_message(&channel.id, &json!({ "content": text }))
            .await
    }

    async fn post_status(
        &self,
        channel_id: &str,
        post: &StatusPost,
    ) -> Result<MessageHandle, PlatformError> {
        self.create_message(channel_id, &status_post_body(post)).await
    }

    async fn edit_status(
        &self,
        handle: &MessageHandle,
        post: &StatusPost,
    ) -> Result<(), PlatformError> {
        self.patch_json(
            &format!(
                "/channels/{}/messages/{}",
                handle.channel_id.trim(),
                handle.message_id.trim()
            ),
            &status_post_body(post),
        )
        .await?;
        Ok(())
    }

    async fn describe_group(&self, group_id: &str) -> Result<GroupSummary, PlatformError> {
        let request = self
            .authorized(self.http.get(self.url(&format!("/guilds/{}", group_id.trim()))))
            .query(&[("with_counts", "true")]);
        let value = self.execute(request).await?;
        let guild: DiscordGuildPayload = Self::decode(value, "guild")?;
        Ok(GroupSummary {
            icon_url: guild
                .icon
                .as_deref()
                .map(|icon| format!("{CDN_BASE}/icons/{}/{icon}.png", guild.id)),
            id: guild.id,
            name: guild.name,
            member_count: guild.approximate_member_count,
        })
    }

    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, PlatformError> {
        let request = self.authorized(
            self.http
                .get(self.url(&format!("/guilds/{}/roles", group_id.trim()))),
        );
        let value = self.execute(request).await?;
        let roles: Vec<DiscordRolePayload> = Self::decode(value, "role list")?;
        Ok(roles
            .into_iter()
            .map(|role| GroupRole {
                id: role.id,
                name: role.name,
                position: role.position,
                managed: role.managed,
            })
            .collect())
    }
}
