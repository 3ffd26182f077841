//! Dispatch request, recipient, and progress event types.
//!
//! Front-ends build a [`DispatchRequest`] from user input and consume the
//! [`ProgressEvent`] stream the engine emits. Delay parsing and placeholder
//! substitution live here so every front-end applies the same boundary rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const USER_PLACEHOLDER: &str = "<user>";
pub const DEFAULT_DELAY_SECONDS: f64 = 2.0;
pub const MIN_DELAY_SECONDS: f64 = 0.5;
pub const MAX_DELAY_SECONDS: f64 = 30.0;
pub const MAX_MESSAGE_CHARS: usize = 2000;
const PROGRESS_BAR_CELLS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A group member as reported by the platform. Never mutated by the engine.
pub struct Recipient {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Recipient {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    /// True when the member holds at least one of `role_ids`.
    pub fn holds_any_role(&self, role_ids: &[String]) -> bool {
        self.role_ids
            .iter()
            .any(|held| role_ids.iter().any(|wanted| wanted == held))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DispatchMode` values.
pub enum DispatchMode {
    #[default]
    All,
    Roles,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Roles => "roles",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "roles" | "role" => Some(Self::Roles),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Input parameters for one dispatch session.
pub struct DispatchRequest {
    pub session_id: String,
    pub group_id: String,
    pub message_template: String,
    pub mode: DispatchMode,
    pub role_ids: Vec<String>,
    pub delay: Duration,
    pub status_channel_id: Option<String>,
}

impl DispatchRequest {
    /// Role filter applied by the resolver, `None` when every member is targeted.
    pub fn role_filter(&self) -> Option<&[String]> {
        match self.mode {
            DispatchMode::All => None,
            DispatchMode::Roles => Some(self.role_ids.as_slice()),
        }
    }
}

/// Parses a user-supplied delay, clamping to the supported range.
///
/// Missing, blank, or unparseable values fall back to [`DEFAULT_DELAY_SECONDS`].
pub fn normalize_delay_seconds(raw: Option<&str>) -> f64 {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return DEFAULT_DELAY_SECONDS;
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => clamp_delay_seconds(value),
        _ => DEFAULT_DELAY_SECONDS,
    }
}

pub fn clamp_delay_seconds(value: f64) -> f64 {
    if !value.is_finite() {
        return DEFAULT_DELAY_SECONDS;
    }
    value.clamp(MIN_DELAY_SECONDS, MAX_DELAY_SECONDS)
}

pub fn delay_from_seconds(value: f64) -> Duration {
    Duration::from_secs_f64(clamp_delay_seconds(value))
}

/// Substitutes every `<user>` placeholder with a mention of `recipient`.
pub fn render_message_for(template: &str, recipient: &Recipient) -> String {
    template.replace(USER_PLACEHOLDER, &recipient.mention())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DispatchStatus` values.
pub enum DispatchStatus {
    InProgress,
    Complete,
    Stopped,
    Errored,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::InProgress => "\u{1f4e8}",
            Self::Complete => "\u{2705}",
            Self::Stopped => "\u{26a0}\u{fe0f}",
            Self::Errored => "\u{274c}",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Aggregate counters for one session at a point in time.
pub struct ProgressSnapshot {
    pub sent: usize,
    pub failed: usize,
    pub dm_closed: usize,
    pub total: usize,
    pub status: DispatchStatus,
}

impl ProgressSnapshot {
    pub fn new(total: usize) -> Self {
        Self {
            sent: 0,
            failed: 0,
            dm_closed: 0,
            total,
            status: DispatchStatus::InProgress,
        }
    }

    pub fn processed(&self) -> usize {
        self.sent
            .saturating_add(self.failed)
            .saturating_add(self.dm_closed)
    }

    pub fn percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (self.processed().min(self.total) * 100) / self.total
    }

    /// Renders a 20-cell bar, one filled cell per 5%.
    pub fn progress_bar(&self) -> String {
        let filled = (self.percent() / 5).min(PROGRESS_BAR_CELLS);
        let mut bar = "\u{2588}".repeat(filled);
        bar.push_str(&"\u{2591}".repeat(PROGRESS_BAR_CELLS - filled));
        bar
    }

    pub fn with_status(mut self, status: DispatchStatus) -> Self {
        self.status = status;
        self
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Sent: {} | Failed: {} | DM Closed: {} | Total: {}",
            self.sent, self.failed, self.dm_closed, self.total
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Events streamed to front-ends for one session.
pub enum ProgressEvent {
    Log { level: LogLevel, text: String },
    Progress { snapshot: ProgressSnapshot },
    Complete { snapshot: ProgressSnapshot },
    Error { text: String },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Per-recipient result folded into the session counters.
pub enum RecipientOutcome {
    Sent,
    SentAfterRetry,
    DmClosed,
    Failed,
}

impl RecipientOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::SentAfterRetry => "sent_after_retry",
            Self::DmClosed => "dm_closed",
            Self::Failed => "failed",
        }
    }

    pub fn apply(self, snapshot: &mut ProgressSnapshot) {
        match self {
            Self::Sent | Self::SentAfterRetry => snapshot.sent = snapshot.sent.saturating_add(1),
            Self::DmClosed => snapshot.dm_closed = snapshot.dm_closed.saturating_add(1),
            Self::Failed => snapshot.failed = snapshot.failed.saturating_add(1),
        }
    }
}
