//! Sequential per-recipient delivery loop.
//!
//! Each recipient moves through channel creation and message send, both
//! wrapped by the [`RetryPolicy`]. Counters are owned here and folded after
//! every recipient; cancellation is observed at the loop head and before the
//! inter-recipient delay.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{info, warn};

use crate::dispatch_contract::{
    render_message_for, DispatchStatus, ProgressSnapshot, Recipient, RecipientOutcome,
};
use crate::dispatch_platform::DispatchPlatform;
use crate::progress_reporter::ProgressReporter;
use crate::retry_policy::{CallOutcome, RetryPolicy};
use crate::session_registry::SessionHandle;

/// Everything the loop needs besides the recipients themselves.
pub struct DispatchLoop<'a> {
    pub platform: &'a dyn DispatchPlatform,
    pub policy: RetryPolicy,
    pub session: &'a SessionHandle,
    pub reporter: &'a mut ProgressReporter,
    pub message_template: &'a str,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of one recipient plus the activity line describing it.
pub struct RecipientReport {
    pub outcome: RecipientOutcome,
    pub status_line: String,
}

impl RecipientReport {
    fn new(outcome: RecipientOutcome, status_line: String) -> Self {
        Self {
            outcome,
            status_line,
        }
    }
}

pub fn status_line_for(recipient: &Recipient, outcome: RecipientOutcome, reason: &str) -> String {
    let name = recipient.display_name.as_str();
    match outcome {
        RecipientOutcome::Sent => format!("\u{2705} Sent to **{name}**"),
        RecipientOutcome::SentAfterRetry => format!("\u{2705} Sent to **{name}** (after retry)"),
        RecipientOutcome::DmClosed => format!("\u{1f512} {name} - DMs disabled"),
        RecipientOutcome::Failed => format!("\u{274c} Failed: **{name}** ({reason})"),
    }
}

impl DispatchLoop<'_> {
    /// Runs the loop to its end and returns the terminal snapshot.
    ///
    /// The returned status is `stopped` only when cancellation cut the run
    /// short with recipients left; otherwise it is `complete`.
    pub async fn run(self, recipients: &[Recipient]) -> ProgressSnapshot {
        let DispatchLoop {
            platform,
            policy,
            session,
            reporter,
            message_template,
            delay,
        } = self;
        let total = recipients.len();
        let mut snapshot = ProgressSnapshot::new(total);
        let mut stopped_early = false;

        for (index, recipient) in recipients.iter().enumerate() {
            if session.is_cancelled() {
                stopped_early = true;
                info!(
                    session_id = session.session_id(),
                    processed = snapshot.processed(),
                    total,
                    "dispatch stop observed"
                );
                break;
            }

            let text = render_message_for(message_template, recipient);
            let report = match AssertUnwindSafe(deliver_to(
                platform,
                &policy,
                reporter,
                recipient,
                &text,
            ))
            .catch_unwind()
            .await
            {
                Ok(report) => report,
                Err(_) => {
                    warn!(
                        session_id = session.session_id(),
                        recipient_id = recipient.id.as_str(),
                        "recipient processing panicked"
                    );
                    RecipientReport::new(
                        RecipientOutcome::Failed,
                        status_line_for(recipient, RecipientOutcome::Failed, "internal error"),
                    )
                }
            };
            report.outcome.apply(&mut snapshot);
            reporter
                .recipient_processed(index + 1, snapshot, report.outcome, &report.status_line)
                .await;

            if index + 1 < total && !session.is_cancelled() {
                // A stop request ends the wait early; the loop head still decides to stop.
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = session.cancelled() => {}
                }
            }
        }

        let remaining = total.saturating_sub(snapshot.processed());
        let status = if stopped_early && remaining > 0 {
            DispatchStatus::Stopped
        } else {
            DispatchStatus::Complete
        };
        snapshot.with_status(status)
    }
}

async fn deliver_to(
    platform: &dyn DispatchPlatform,
    policy: &RetryPolicy,
    reporter: &mut ProgressReporter,
    recipient: &Recipient,
    text: &str,
) -> RecipientReport {
    let channel = policy
        .execute("create_private_channel", reporter, || {
            platform.create_private_channel(&recipient.id)
        })
        .await;
    let (channel, channel_retried) = match channel {
        CallOutcome::Success(channel) => (channel, false),
        CallOutcome::SuccessAfterRetry(channel) => (channel, true),
        CallOutcome::DmClosed { .. } => return closed(recipient),
        CallOutcome::Failed { reason } => return failed(recipient, &reason),
    };

    let sent = policy
        .execute("send_message", reporter, || platform.send_message(&channel, text))
        .await;
    let outcome = match sent {
        CallOutcome::Success(_) if !channel_retried => RecipientOutcome::Sent,
        CallOutcome::Success(_) | CallOutcome::SuccessAfterRetry(_) => {
            RecipientOutcome::SentAfterRetry
        }
        CallOutcome::DmClosed { .. } => return closed(recipient),
        CallOutcome::Failed { reason } => return failed(recipient, &reason),
    };
    RecipientReport::new(outcome, status_line_for(recipient, outcome, ""))
}

fn closed(recipient: &Recipient) -> RecipientReport {
    RecipientReport::new(
        RecipientOutcome::DmClosed,
        status_line_for(recipient, RecipientOutcome::DmClosed, ""),
    )
}

fn failed(recipient: &Recipient, reason: &str) -> RecipientReport {
    RecipientReport::new(
        RecipientOutcome::Failed,
        status_line_for(recipient, RecipientOutcome::Failed, reason),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::dispatch_contract::ProgressEvent;
    use crate::dispatch_platform::{ChannelHandle, MessageHandle, PlatformError, StatusPost};
    use crate::progress_reporter::{EventEmitter, ProgressCadence};
    use crate::session_registry::SessionRegistry;

    #[derive(Default)]
    struct LoopPlatform {
        channel_script: Mutex<HashMap<String, VecDeque<PlatformError>>>,
        send_script: Mutex<HashMap<String, VecDeque<PlatformError>>>,
        panic_for: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl LoopPlatform {
        fn script_channel(&self, user_id: &str, errors: Vec<PlatformError>) {
            self.channel_script
                .lock()
                .expect("channel script lock")
                .insert(user_id.to_string(), errors.into());
        }

        fn script_send(&self, user_id: &str, errors: Vec<PlatformError>) {
            self.send_script
                .lock()
                .expect("send script lock")
                .insert(user_id.to_string(), errors.into());
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    #[async_trait]
    impl DispatchPlatform for LoopPlatform {
        async fn list_members(
            &self,
            _group_id: &str,
            _after: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<Recipient>, PlatformError> {
            Ok(Vec::new())
        }

        async fn create_private_channel(&self, user_id: &str) -> Result<ChannelHandle, PlatformError> {
            if self.panic_for.as_deref() == Some(user_id) {
                panic!("platform exploded for {user_id}");
            }
            let scripted = self
                .channel_script
                .lock()
                .expect("channel script lock")
                .get_mut(user_id)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(error) => Err(error),
                None => Ok(ChannelHandle {
                    id: format!("dm-{user_id}"),
                }),
            }
        }

        async fn send_message(
            &self,
            channel: &ChannelHandle,
            text: &str,
        ) -> Result<MessageHandle, PlatformError> {
            let user_id = channel.id.trim_start_matches("dm-").to_string();
            let scripted = self
                .send_script
                .lock()
                .expect("send script lock")
                .get_mut(&user_id)
                .and_then(VecDeque::pop_front);
            self.sent
                .lock()
                .expect("sent lock")
                .push((user_id.clone(), text.to_string()));
            match scripted {
                Some(error) => Err(error),
                None => Ok(MessageHandle {
                    channel_id: channel.id.clone(),
                    message_id: format!("msg-{user_id}"),
                }),
            }
        }

        async fn post_status(
            &self,
            channel_id: &str,
            _post: &StatusPost,
        ) -> Result<MessageHandle, PlatformError> {
            Ok(MessageHandle {
                channel_id: channel_id.to_string(),
                message_id: "status".to_string(),
            })
        }

        async fn edit_status(
            &self,
            _handle: &MessageHandle,
            _post: &StatusPost,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn recipients(count: usize) -> Vec<Recipient> {
        (1..=count)
            .map(|id| Recipient {
                id: format!("u{id}"),
                display_name: format!("member-{id}"),
                role_ids: Vec::new(),
                is_bot: false,
            })
            .collect()
    }

    async fn run_loop(
        platform: &LoopPlatform,
        registry: &Arc<SessionRegistry>,
        members: &[Recipient],
    ) -> (ProgressSnapshot, Vec<ProgressEvent>) {
        let session = registry.open("loop-session").expect("open session");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(
            "loop-session",
            ProgressCadence::default(),
            EventEmitter::new(tx),
        );
        let snapshot = DispatchLoop {
            platform,
            policy: RetryPolicy::new(Duration::from_secs(1)),
            session: &session,
            reporter: &mut reporter,
            message_template: "hello <user>",
            delay: Duration::from_millis(500),
        }
        .run(members)
        .await;
        drop(reporter);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (snapshot, events)
    }

    #[test]
    fn unit_status_line_for_covers_each_outcome() {
        let member = &recipients(1)[0];
        assert_eq!(
            status_line_for(member, RecipientOutcome::Sent, ""),
            "\u{2705} Sent to **member-1**"
        );
        assert!(
            status_line_for(member, RecipientOutcome::SentAfterRetry, "").ends_with("(after retry)")
        );
        assert!(status_line_for(member, RecipientOutcome::DmClosed, "").contains("DMs disabled"));
        assert!(status_line_for(member, RecipientOutcome::Failed, "500").ends_with("(500)"));
    }

    #[tokio::test(start_paused = true)]
    async fn functional_loop_folds_every_outcome_and_completes() {
        let platform = LoopPlatform::default();
        platform.script_channel(
            "u2",
            vec![PlatformError::Forbidden {
                detail: "Cannot send messages to this user".to_string(),
            }],
        );
        platform.script_send(
            "u3",
            vec![PlatformError::Status {
                status: 500,
                detail: "boom".to_string(),
            }],
        );
        platform.script_send("u4", vec![PlatformError::RateLimited { retry_after: None }]);
        let registry = SessionRegistry::new();
        let (snapshot, events) = run_loop(&platform, &registry, &recipients(4)).await;

        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.dm_closed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.processed(), snapshot.total);
        assert_eq!(snapshot.status, DispatchStatus::Complete);
        let progress = events
            .iter()
            .filter(|event| matches!(event, ProgressEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_retry_reuses_identical_rendered_text() {
        let platform = LoopPlatform::default();
        platform.script_send(
            "u1",
            vec![PlatformError::RateLimited {
                retry_after: Some(Duration::from_millis(200)),
            }],
        );
        let registry = SessionRegistry::new();
        let (snapshot, _events) = run_loop(&platform, &registry, &recipients(1)).await;
        assert_eq!(snapshot.sent, 1);
        let sent = platform.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[0].1, "hello <@u1>");
    }

    #[tokio::test(start_paused = true)]
    async fn functional_rate_limited_channel_creation_retries_once_then_sends() {
        let platform = LoopPlatform::default();
        platform.script_channel(
            "u1",
            vec![PlatformError::RateLimited {
                retry_after: Some(Duration::from_millis(300)),
            }],
        );
        let registry = SessionRegistry::new();
        let (snapshot, events) = run_loop(&platform, &registry, &recipients(1)).await;
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(platform.sent().len(), 1);
        assert!(events.iter().any(|event| matches!(
            event,
            ProgressEvent::Log { text, .. } if text.ends_with("(after retry)")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_second_channel_rate_limit_fails_without_sending() {
        let platform = LoopPlatform::default();
        platform.script_channel(
            "u1",
            vec![
                PlatformError::RateLimited { retry_after: None },
                PlatformError::RateLimited { retry_after: None },
            ],
        );
        let registry = SessionRegistry::new();
        let (snapshot, _events) = run_loop(&platform, &registry, &recipients(2)).await;
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.status, DispatchStatus::Complete);
        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u2");
    }

    #[tokio::test(start_paused = true)]
    async fn functional_delay_is_skipped_after_last_recipient() {
        let platform = LoopPlatform::default();
        let registry = SessionRegistry::new();
        let started = tokio::time::Instant::now();
        let (snapshot, _events) = run_loop(&platform, &registry, &recipients(3)).await;
        assert_eq!(snapshot.sent, 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_000));
        assert!(elapsed < Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn regression_panicking_platform_call_counts_as_failed() {
        let platform = LoopPlatform {
            panic_for: Some("u2".to_string()),
            ..LoopPlatform::default()
        };
        let registry = SessionRegistry::new();
        let (snapshot, _events) = run_loop(&platform, &registry, &recipients(3)).await;
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.status, DispatchStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_pre_cancelled_session_sends_nothing() {
        let platform = LoopPlatform::default();
        let registry = SessionRegistry::new();
        let session = registry.open("early-stop").expect("open");
        assert!(registry.request_stop("early-stop"));
        let mut reporter =
            ProgressReporter::new("early-stop", ProgressCadence::default(), EventEmitter::detached());
        let snapshot = DispatchLoop {
            platform: &platform,
            policy: RetryPolicy::default(),
            session: &session,
            reporter: &mut reporter,
            message_template: "hi",
            delay: Duration::from_secs(1),
        }
        .run(&recipients(5))
        .await;
        assert_eq!(snapshot.processed(), 0);
        assert_eq!(snapshot.status, DispatchStatus::Stopped);
        assert!(platform.sent().is_empty());
    }
}
