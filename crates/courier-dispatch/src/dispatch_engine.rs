//! Entry points front-ends call to start, observe, and stop dispatch sessions.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::dispatch_contract::{
    clamp_delay_seconds, DispatchMode, DispatchRequest, DispatchStatus, LogLevel, ProgressEvent,
    ProgressSnapshot, MAX_MESSAGE_CHARS,
};
use crate::dispatch_error::DispatchError;
use crate::dispatch_loop::DispatchLoop;
use crate::dispatch_platform::DispatchPlatform;
use crate::progress_reporter::{
    EventEmitter, ProgressCadence, ProgressReporter, ProgressSink, StatusPostSink,
};
use crate::recipient_resolver::{resolve_recipients, RecipientResolution, PLATFORM_MAX_PAGE_SIZE};
use crate::retry_policy::{RetryPolicy, DEFAULT_RATE_LIMIT_WAIT};
use crate::session_registry::{SessionHandle, SessionRegistry};

pub const NO_RECIPIENTS_NOTICE: &str = "No members found matching criteria.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEngineConfig {
    pub page_size: usize,
    pub cadence: ProgressCadence,
    pub default_retry_after: Duration,
}

impl Default for DispatchEngineConfig {
    fn default() -> Self {
        Self {
            page_size: PLATFORM_MAX_PAGE_SIZE,
            cadence: ProgressCadence::default(),
            default_retry_after: DEFAULT_RATE_LIMIT_WAIT,
        }
    }
}

#[derive(Clone)]
/// Shared engine: one platform, one session registry, many sessions.
pub struct DispatchEngine {
    platform: Arc<dyn DispatchPlatform>,
    registry: Arc<SessionRegistry>,
    config: DispatchEngineConfig,
}

impl DispatchEngine {
    pub fn new(platform: Arc<dyn DispatchPlatform>, config: DispatchEngineConfig) -> Self {
        Self::with_registry(platform, SessionRegistry::new(), config)
    }

    pub fn with_registry(
        platform: Arc<dyn DispatchPlatform>,
        registry: Arc<SessionRegistry>,
        config: DispatchEngineConfig,
    ) -> Self {
        Self {
            platform,
            registry,
            config,
        }
    }

    pub fn platform(&self) -> &Arc<dyn DispatchPlatform> {
        &self.platform
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> DispatchEngineConfig {
        self.config
    }

    /// Validates `request`, claims its session id, and spawns the run.
    ///
    /// Must be called from within a tokio runtime. Validation and the
    /// duplicate-session check happen before anything is spawned, so an error
    /// here means no events will be produced.
    pub fn start_dispatch(
        &self,
        request: DispatchRequest,
        interactive: Option<Box<dyn ProgressSink>>,
    ) -> Result<DispatchHandle, DispatchError> {
        validate_dispatch_request(&request)?;
        let session = self.registry.open(&request.session_id)?;
        let session_id = session.session_id().to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut reporter =
            ProgressReporter::new(session_id.clone(), self.config.cadence, EventEmitter::new(tx));
        if let Some(sink) = interactive {
            reporter.add_sink(sink);
        }
        if let Some(channel_id) = request
            .status_channel_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            reporter.add_sink(Box::new(StatusPostSink::new(
                Arc::clone(&self.platform),
                channel_id,
            )));
        }

        let platform = Arc::clone(&self.platform);
        let config = self.config;
        let task = tokio::spawn(async move {
            run_session(platform, config, request, session, reporter).await
        });
        Ok(DispatchHandle {
            session_id,
            events: rx,
            task,
        })
    }

    /// Requests cooperative cancellation. Returns false when no session is live.
    pub fn stop_dispatch(&self, session_id: &str) -> bool {
        let stopped = self.registry.request_stop(session_id);
        if stopped {
            info!(session_id, "dispatch stop requested");
        }
        stopped
    }
}

/// Boundary checks applied before a session is claimed.
pub fn validate_dispatch_request(request: &DispatchRequest) -> Result<(), DispatchError> {
    if request.group_id.trim().is_empty() {
        return Err(DispatchError::InvalidRequest(
            "group id must not be empty".to_string(),
        ));
    }
    if request.message_template.trim().is_empty() {
        return Err(DispatchError::InvalidRequest(
            "message must not be empty".to_string(),
        ));
    }
    let chars = request.message_template.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(DispatchError::InvalidRequest(format!(
            "message is {chars} characters; the limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    if request.mode == DispatchMode::Roles
        && request.role_ids.iter().all(|role| role.trim().is_empty())
    {
        return Err(DispatchError::InvalidRequest(
            "roles mode requires at least one role".to_string(),
        ));
    }
    Ok(())
}

enum SessionEnd {
    Finished {
        snapshot: ProgressSnapshot,
        extra: Option<String>,
    },
    Errored(String),
}

async fn run_session(
    platform: Arc<dyn DispatchPlatform>,
    config: DispatchEngineConfig,
    request: DispatchRequest,
    session: SessionHandle,
    mut reporter: ProgressReporter,
) -> ProgressSnapshot {
    info!(
        session_id = session.session_id(),
        group_id = request.group_id.as_str(),
        mode = request.mode.as_str(),
        roles = request.role_ids.len(),
        "dispatch started"
    );
    let end = AssertUnwindSafe(drive_session(
        platform.as_ref(),
        config,
        &request,
        &session,
        &mut reporter,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|_| {
        warn!(session_id = session.session_id(), "dispatch session panicked");
        SessionEnd::Errored("internal error while running the dispatch".to_string())
    });
    // Release the id before the terminal event so a subscriber can restart immediately.
    drop(session);
    match end {
        SessionEnd::Finished { snapshot, extra } => {
            reporter.finished(snapshot, extra).await;
            snapshot
        }
        SessionEnd::Errored(text) => {
            let snapshot = ProgressSnapshot::new(0);
            reporter.errored(&text, snapshot).await;
            snapshot.with_status(DispatchStatus::Errored)
        }
    }
}

async fn drive_session(
    platform: &dyn DispatchPlatform,
    config: DispatchEngineConfig,
    request: &DispatchRequest,
    session: &SessionHandle,
    reporter: &mut ProgressReporter,
) -> SessionEnd {
    reporter.log(LogLevel::Info, "Fetching members...");
    let resolution = resolve_recipients(
        platform,
        &request.group_id,
        request.role_filter(),
        config.page_size,
    )
    .await;
    let recipients = match resolution {
        Ok(RecipientResolution::Eligible(recipients)) => recipients,
        Ok(RecipientResolution::Empty) => {
            reporter.log(LogLevel::Warn, NO_RECIPIENTS_NOTICE);
            return SessionEnd::Finished {
                snapshot: ProgressSnapshot::new(0).with_status(DispatchStatus::Complete),
                extra: Some(NO_RECIPIENTS_NOTICE.to_string()),
            };
        }
        Err(error) => return SessionEnd::Errored(error.to_string()),
    };

    let total = recipients.len();
    reporter.log(
        LogLevel::Info,
        format!("Found {total} members. Starting..."),
    );
    reporter.started(ProgressSnapshot::new(total)).await;

    let delay = Duration::from_secs_f64(clamp_delay_seconds(request.delay.as_secs_f64()));
    let snapshot = DispatchLoop {
        platform,
        policy: RetryPolicy::new(config.default_retry_after),
        session,
        reporter,
        message_template: &request.message_template,
        delay,
    }
    .run(&recipients)
    .await;
    SessionEnd::Finished {
        snapshot,
        extra: None,
    }
}

#[derive(Debug)]
/// Caller-side view of a spawned session.
pub struct DispatchHandle {
    session_id: String,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    task: JoinHandle<ProgressSnapshot>,
}

impl DispatchHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event, or `None` once the run has ended and the stream is drained.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Detaches the task and returns the event stream for SSE-style consumers.
    pub fn into_event_stream(self) -> UnboundedReceiverStream<ProgressEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Collects every remaining event, then returns them with the terminal snapshot.
    pub async fn collect(mut self) -> Result<(Vec<ProgressEvent>, ProgressSnapshot), JoinError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let snapshot = self.task.await?;
        Ok((events, snapshot))
    }

    pub async fn wait(self) -> Result<ProgressSnapshot, JoinError> {
        self.task.await
    }
}
