//! Progress fan-out to the event stream and the configured sinks.
//!
//! Every processed recipient produces a `Progress` event on the session stream.
//! Sinks (the interactive surface and the optional status post) only see card
//! edits on the configured cadence plus the terminal card. Sink failures are
//! logged and swallowed; they never reach the dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_core::current_unix_timestamp_ms;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch_contract::{
    DispatchStatus, LogLevel, ProgressEvent, ProgressSnapshot, RecipientOutcome,
};
use crate::dispatch_platform::{DispatchPlatform, MessageHandle, ProgressCard, StatusPost};
use crate::retry_policy::BackoffObserver;

pub const DEFAULT_UPDATE_EVERY: usize = 5;
pub const DEFAULT_LOG_EVERY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How often sinks are touched, counted in processed recipients.
pub struct ProgressCadence {
    pub update_every: usize,
    pub log_every: usize,
}

impl Default for ProgressCadence {
    fn default() -> Self {
        Self {
            update_every: DEFAULT_UPDATE_EVERY,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

impl ProgressCadence {
    /// `position` is 1-based. The final recipient always updates.
    pub fn should_update(&self, position: usize, total: usize) -> bool {
        position == total || (self.update_every > 0 && position % self.update_every == 0)
    }

    /// `position` is 1-based. A zero `log_every` disables activity lines.
    pub fn should_log(&self, position: usize) -> bool {
        self.log_every > 0 && position % self.log_every == 0
    }
}

pub fn card_title(status: DispatchStatus, started: bool) -> &'static str {
    match status {
        DispatchStatus::InProgress if started => "Mass DM Started",
        DispatchStatus::InProgress => "Mass DM In Progress...",
        DispatchStatus::Complete => "Mass DM Complete!",
        DispatchStatus::Stopped => "Mass DM Stopped",
        DispatchStatus::Errored => "Mass DM Failed",
    }
}

fn build_card(snapshot: ProgressSnapshot, title: &str, extra: Option<String>) -> ProgressCard {
    ProgressCard {
        title: title.to_string(),
        snapshot,
        extra,
        timestamp_unix_ms: current_unix_timestamp_ms(),
    }
}

#[async_trait]
/// Trait contract for `ProgressSink` behavior.
pub trait ProgressSink: Send {
    fn label(&self) -> &str;

    /// Creates the sink's message with the initial card.
    async fn open(&mut self, card: &ProgressCard) -> Result<()>;

    /// Edits the sink's message; creates it when `open` never succeeded.
    async fn update(&mut self, card: &ProgressCard) -> Result<()>;

    /// Appends an activity line. Sinks without an activity log ignore it.
    async fn note(&mut self, text: &str) -> Result<()> {
        let _ = text;
        Ok(())
    }
}

/// Status-channel sink backed by the platform's post/edit capability.
pub struct StatusPostSink {
    platform: Arc<dyn DispatchPlatform>,
    channel_id: String,
    message: Option<MessageHandle>,
}

impl StatusPostSink {
    pub fn new(platform: Arc<dyn DispatchPlatform>, channel_id: impl Into<String>) -> Self {
        Self {
            platform,
            channel_id: channel_id.into(),
            message: None,
        }
    }

    pub fn message(&self) -> Option<&MessageHandle> {
        self.message.as_ref()
    }
}

#[async_trait]
impl ProgressSink for StatusPostSink {
    fn label(&self) -> &str {
        "status_channel"
    }

    async fn open(&mut self, card: &ProgressCard) -> Result<()> {
        let handle = self
            .platform
            .post_status(&self.channel_id, &StatusPost::Card(card.clone()))
            .await
            .with_context(|| format!("failed to post status card to {}", self.channel_id))?;
        self.message = Some(handle);
        Ok(())
    }

    async fn update(&mut self, card: &ProgressCard) -> Result<()> {
        match self.message.as_ref() {
            Some(handle) => self
                .platform
                .edit_status(handle, &StatusPost::Card(card.clone()))
                .await
                .with_context(|| format!("failed to edit status card {}", handle.message_id)),
            None => self.open(card).await,
        }
    }

    async fn note(&mut self, text: &str) -> Result<()> {
        self.platform
            .post_status(&self.channel_id, &StatusPost::text(text))
            .await
            .with_context(|| format!("failed to post status note to {}", self.channel_id))?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
/// Sender half of a session event stream. A dropped receiver is not an error.
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(event);
        }
    }
}

pub struct ProgressReporter {
    session_id: String,
    cadence: ProgressCadence,
    events: EventEmitter,
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(session_id: impl Into<String>, cadence: ProgressCadence, events: EventEmitter) -> Self {
        Self {
            session_id: session_id.into(),
            cadence,
            events,
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn cadence(&self) -> ProgressCadence {
        self.cadence
    }

    pub fn log(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Info => info!(session_id = %self.session_id, "{text}"),
            LogLevel::Warn | LogLevel::Error => warn!(session_id = %self.session_id, "{text}"),
        }
        self.events.emit(ProgressEvent::Log { level, text });
    }

    /// Sends the initial card to every sink.
    pub async fn started(&mut self, snapshot: ProgressSnapshot) {
        let card = build_card(snapshot, card_title(DispatchStatus::InProgress, true), None);
        for sink in self.sinks.iter_mut() {
            if let Err(error) = sink.open(&card).await {
                warn!(session_id = %self.session_id, sink = sink.label(), "progress sink open failed: {error:#}");
            }
        }
        self.events.emit(ProgressEvent::Progress { snapshot });
    }

    /// Records one processed recipient. `position` is 1-based.
    pub async fn recipient_processed(
        &mut self,
        position: usize,
        snapshot: ProgressSnapshot,
        outcome: RecipientOutcome,
        status_line: &str,
    ) {
        debug!(
            session_id = %self.session_id,
            position,
            outcome = outcome.as_str(),
            "recipient processed"
        );
        let level = match outcome {
            RecipientOutcome::Sent | RecipientOutcome::SentAfterRetry => LogLevel::Info,
            RecipientOutcome::DmClosed | RecipientOutcome::Failed => LogLevel::Warn,
        };
        self.events.emit(ProgressEvent::Log {
            level,
            text: status_line.to_string(),
        });
        self.events.emit(ProgressEvent::Progress { snapshot });
        if self.cadence.should_log(position) {
            self.note_all(status_line).await;
        }
        if self.cadence.should_update(position, snapshot.total) {
            let card = build_card(snapshot, card_title(DispatchStatus::InProgress, false), None);
            self.update_all(&card).await;
        }
    }

    /// Renders the terminal card and emits the single `Complete` event.
    pub async fn finished(&mut self, snapshot: ProgressSnapshot, extra: Option<String>) {
        let card = build_card(snapshot, card_title(snapshot.status, false), extra);
        self.update_all(&card).await;
        let label = match snapshot.status {
            DispatchStatus::Stopped => "Stopped",
            DispatchStatus::Errored => "Failed",
            _ => "Complete",
        };
        self.note_all(&format!("**{label}!** {}", snapshot.summary_line()))
            .await;
        info!(
            session_id = %self.session_id,
            status = snapshot.status.as_str(),
            sent = snapshot.sent,
            failed = snapshot.failed,
            dm_closed = snapshot.dm_closed,
            total = snapshot.total,
            "dispatch finished"
        );
        self.events.emit(ProgressEvent::Complete { snapshot });
    }

    /// Emits the `Error` event, then the errored terminal summary.
    pub async fn errored(&mut self, text: &str, snapshot: ProgressSnapshot) {
        warn!(session_id = %self.session_id, "dispatch errored: {text}");
        self.events.emit(ProgressEvent::Error {
            text: text.to_string(),
        });
        let snapshot = snapshot.with_status(DispatchStatus::Errored);
        let card = build_card(
            snapshot,
            card_title(DispatchStatus::Errored, false),
            Some(text.to_string()),
        );
        self.update_all(&card).await;
        self.events.emit(ProgressEvent::Complete { snapshot });
    }

    async fn update_all(&mut self, card: &ProgressCard) {
        for sink in self.sinks.iter_mut() {
            if let Err(error) = sink.update(card).await {
                warn!(session_id = %self.session_id, sink = sink.label(), "progress sink update failed: {error:#}");
            }
        }
    }

    async fn note_all(&mut self, text: &str) {
        for sink in self.sinks.iter_mut() {
            if let Err(error) = sink.note(text).await {
                warn!(session_id = %self.session_id, sink = sink.label(), "progress sink note failed: {error:#}");
            }
        }
    }
}

pub fn format_backoff_notice(wait: Duration) -> String {
    let seconds = wait.as_secs_f64();
    if seconds.fract() == 0.0 {
        format!("\u{23f1}\u{fe0f} Rate limited! Waiting {}s...", wait.as_secs())
    } else {
        format!("\u{23f1}\u{fe0f} Rate limited! Waiting {seconds:.2}s...")
    }
}

#[async_trait]
impl BackoffObserver for ProgressReporter {
    async fn on_backoff(&mut self, operation: &str, wait: Duration) {
        let notice = format_backoff_notice(wait);
        warn!(session_id = %self.session_id, operation, wait_ms = wait.as_millis() as u64, "rate limited; backing off");
        self.events.emit(ProgressEvent::Log {
            level: LogLevel::Warn,
            text: notice.clone(),
        });
        self.note_all(&notice).await;
    }
}
