//! Platform capability consumed by the dispatch engine.
//!
//! The engine never talks to a transport directly. Every transport (REST,
//! scripted test doubles) implements [`DispatchPlatform`] once and reports
//! failures through the [`PlatformError`] taxonomy the retry policy classifies.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch_contract::{DispatchStatus, ProgressSnapshot, Recipient};

pub const MAX_SELECTABLE_ROLES: usize = 25;

#[derive(Debug, Clone, Error, PartialEq)]
/// Failure taxonomy for a single platform call.
pub enum PlatformError {
    #[error("resource not found: {detail}")]
    NotFound { detail: String },
    #[error("forbidden: {detail}")]
    Forbidden { detail: String },
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("platform returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    pub fn reason_code(&self) -> String {
        match self {
            Self::NotFound { .. } => "not_found".to_string(),
            Self::Forbidden { .. } => "forbidden".to_string(),
            Self::RateLimited { .. } => "rate_limited".to_string(),
            Self::Status { status, .. } => status.to_string(),
            Self::Transport(_) => "transport".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Rendering-neutral progress payload; transports decide how it looks.
pub struct ProgressCard {
    pub title: String,
    pub snapshot: ProgressSnapshot,
    pub extra: Option<String>,
    pub timestamp_unix_ms: u64,
}

impl ProgressCard {
    pub fn status(&self) -> DispatchStatus {
        self.snapshot.status
    }

    /// Plain-text rendering used by transports without rich formatting.
    pub fn render_text(&self) -> String {
        let snapshot = &self.snapshot;
        let mut lines = vec![
            format!("{} {}", snapshot.status.icon(), self.title),
            format!(
                "`{}` {}% ({}/{})",
                snapshot.progress_bar(),
                snapshot.percent(),
                snapshot.processed(),
                snapshot.total
            ),
            format!(
                "Sent: {} | Failed: {} | DM Closed: {}",
                snapshot.sent, snapshot.failed, snapshot.dm_closed
            ),
        ];
        if let Some(extra) = self.extra.as_deref().filter(|value| !value.trim().is_empty()) {
            lines.push(extra.to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusPost {
    Card(ProgressCard),
    Text { text: String },
}

impl StatusPost {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRole {
    pub id: String,
    pub name: String,
    pub position: i64,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub member_count: Option<u64>,
    pub icon_url: Option<String>,
}

/// Roles a caller may target: drops the implicit everyone role (id equals the
/// group id) and integration-managed roles, highest position first, capped at
/// [`MAX_SELECTABLE_ROLES`].
pub fn selectable_roles(group_id: &str, roles: Vec<GroupRole>) -> Vec<GroupRole> {
    let mut roles = roles
        .into_iter()
        .filter(|role| role.id != group_id && role.name != "@everyone" && !role.managed)
        .collect::<Vec<_>>();
    roles.sort_by(|left, right| right.position.cmp(&left.position));
    roles.truncate(MAX_SELECTABLE_ROLES);
    roles
}

#[async_trait]
/// Trait contract for `DispatchPlatform` behavior.
pub trait DispatchPlatform: Send + Sync {
    /// Returns up to `limit` members ordered by id, strictly after `after`.
    async fn list_members(
        &self,
        group_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Recipient>, PlatformError>;

    async fn create_private_channel(&self, user_id: &str) -> Result<ChannelHandle, PlatformError>;

    async fn send_message(
        &self,
        channel: &ChannelHandle,
        text: &str,
    ) -> Result<MessageHandle, PlatformError>;

    async fn post_status(
        &self,
        channel_id: &str,
        post: &StatusPost,
    ) -> Result<MessageHandle, PlatformError>;

    async fn edit_status(
        &self,
        handle: &MessageHandle,
        post: &StatusPost,
    ) -> Result<(), PlatformError>;

    async fn describe_group(&self, group_id: &str) -> Result<GroupSummary, PlatformError> {
        Ok(GroupSummary {
            id: group_id.to_string(),
            name: group_id.to_string(),
            member_count: None,
            icon_url: None,
        })
    }

    async fn list_roles(&self, group_id: &str) -> Result<Vec<GroupRole>, PlatformError> {
        let _ = group_id;
        Ok(Vec::new())
    }
}
