use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use courier_dispatch::{
    ChannelHandle, DispatchEngine, DispatchEngineConfig, DispatchError, DispatchMode,
    DispatchPlatform, DispatchRequest, DispatchStatus, LogLevel, MessageHandle, PlatformError,
    ProgressEvent, ProgressSnapshot, Recipient, StatusPost, NO_RECIPIENTS_NOTICE,
};

const GROUP_ID: &str = "guild-1";

type Scripted = VecDeque<Result<(), PlatformError>>;

#[derive(Default)]
struct ScriptedPlatform {
    members: Vec<Recipient>,
    missing_group: bool,
    fail_listing_after_pages: Option<usize>,
    listing_calls: Mutex<usize>,
    channel_script: Mutex<HashMap<String, Scripted>>,
    send_script: Mutex<HashMap<String, Scripted>>,
    send_attempts: Mutex<Vec<(String, String)>>,
    delivered: Mutex<Vec<String>>,
    status_posts: Mutex<Vec<StatusPost>>,
    status_edits: Mutex<Vec<StatusPost>>,
}

impl ScriptedPlatform {
    fn with_members(members: Vec<Recipient>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }

    fn script_channel(self, user_id: &str, outcomes: Vec<Result<(), PlatformError>>) -> Self {
        self.channel_script
            .lock()
            .expect("channel script lock")
            .insert(user_id.to_string(), outcomes.into());
        self
    }

    fn script_send(self, user_id: &str, outcomes: Vec<Result<(), PlatformError>>) -> Self {
        self.send_script
            .lock()
            .expect("send script lock")
            .insert(format!("dm-{user_id}"), outcomes.into());
        self
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().expect("delivered lock").clone()
    }

    fn attempts_for(&self, user_id: &str) -> Vec<String> {
        let channel = format!("dm-{user_id}");
        self.send_attempts
            .lock()
            .expect("attempts lock")
            .iter()
            .filter(|(channel_id, _)| channel_id == &channel)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn status_texts(&self) -> Vec<String> {
        self.status_posts
            .lock()
            .expect("status posts lock")
            .iter()
            .filter_map(|post| match post {
                StatusPost::Text { text } => Some(text.clone()),
                StatusPost::Card(_) => None,
            })
            .collect()
    }

    fn next_scripted(
        script: &Mutex<HashMap<String, Scripted>>,
        key: &str,
    ) -> Result<(), PlatformError> {
        script
            .lock()
            .expect("script lock")
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl DispatchPlatform for ScriptedPlatform {
    async fn list_members(
        &self,
        _group_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Recipient>, PlatformError> {
        if self.missing_group {
            return Err(PlatformError::NotFound {
                detail: "Unknown Guild".to_string(),
            });
        }
        let calls = {
            let mut calls = self.listing_calls.lock().expect("listing lock");
            *calls += 1;
            *calls
        };
        if let Some(pages) = self.fail_listing_after_pages {
            if calls > pages {
                return Err(PlatformError::Transport("connection reset".to_string()));
            }
        }
        let start = match after {
            Some(after) => self
                .members
                .iter()
                .position(|member| member.id == after)
                .map(|index| index + 1)
                .unwrap_or(self.members.len()),
            None => 0,
        };
        Ok(self.members.iter().skip(start).take(limit).cloned().collect())
    }

    async fn create_private_channel(&self, user_id: &str) -> Result<ChannelHandle, PlatformError> {
        Self::next_scripted(&self.channel_script, user_id)?;
        Ok(ChannelHandle {
            id: format!("dm-{user_id}"),
        })
    }

    async fn send_message(
        &self,
        channel: &ChannelHandle,
        text: &str,
    ) -> Result<MessageHandle, PlatformError> {
        self.send_attempts
            .lock()
            .expect("attempts lock")
            .push((channel.id.clone(), text.to_string()));
        Self::next_scripted(&self.send_script, &channel.id)?;
        self.delivered
            .lock()
            .expect("delivered lock")
            .push(channel.id.clone());
        Ok(MessageHandle {
            channel_id: channel.id.clone(),
            message_id: format!("msg-{}", channel.id),
        })
    }

    async fn post_status(
        &self,
        channel_id: &str,
        post: &StatusPost,
    ) -> Result<MessageHandle, PlatformError> {
        let mut posts = self.status_posts.lock().expect("status posts lock");
        posts.push(post.clone());
        Ok(MessageHandle {
            channel_id: channel_id.to_string(),
            message_id: format!("status-{}", posts.len()),
        })
    }

    async fn edit_status(
        &self,
        _handle: &MessageHandle,
        post: &StatusPost,
    ) -> Result<(), PlatformError> {
        self.status_edits
            .lock()
            .expect("status edits lock")
            .push(post.clone());
        Ok(())
    }
}

fn member(id: &str, roles: &[&str], is_bot: bool) -> Recipient {
    Recipient {
        id: id.to_string(),
        display_name: format!("member-{id}"),
        role_ids: roles.iter().map(|role| role.to_string()).collect(),
        is_bot,
    }
}

fn numbered_members(count: usize) -> Vec<Recipient> {
    (1..=count)
        .map(|index| member(&index.to_string(), &[], false))
        .collect()
}

fn request(session_id: &str, template: &str, delay: Duration) -> DispatchRequest {
    DispatchRequest {
        session_id: session_id.to_string(),
        group_id: GROUP_ID.to_string(),
        message_template: template.to_string(),
        mode: DispatchMode::All,
        role_ids: Vec::new(),
        delay,
        status_channel_id: None,
    }
}

fn engine(platform: Arc<ScriptedPlatform>) -> DispatchEngine {
    DispatchEngine::new(platform, DispatchEngineConfig::default())
}

fn complete_events(events: &[ProgressEvent]) -> Vec<ProgressSnapshot> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Complete { snapshot } => Some(*snapshot),
            _ => None,
        })
        .collect()
}

fn log_lines(events: &[ProgressEvent]) -> Vec<(LogLevel, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Log { level, text } => Some((*level, text.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn integration_ten_recipients_with_closed_dm_and_rate_limit_complete() {
    let platform = Arc::new(
        ScriptedPlatform::with_members(numbered_members(10))
            .script_channel(
                "4",
                vec![Err(PlatformError::Forbidden {
                    detail: "Cannot send messages to this user".to_string(),
                })],
            )
            .script_send(
                "7",
                vec![Err(PlatformError::RateLimited {
                    retry_after: Some(Duration::from_secs(1)),
                })],
            ),
    );
    let engine = engine(Arc::clone(&platform));
    let mut dispatch = request("operator", "Hello <user>!", Duration::from_millis(500));
    dispatch.status_channel_id = Some("log-1".to_string());

    let started = tokio::time::Instant::now();
    let handle = engine.start_dispatch(dispatch, None).expect("start");
    let (events, snapshot) = handle.collect().await.expect("join session");
    let elapsed = started.elapsed();

    assert_eq!(
        snapshot,
        ProgressSnapshot {
            sent: 9,
            failed: 0,
            dm_closed: 1,
            total: 10,
            status: DispatchStatus::Complete,
        }
    );
    assert_eq!(complete_events(&events), vec![snapshot]);
    assert!(events.last().is_some_and(ProgressEvent::is_terminal));

    // nine inter-recipient delays plus one advised backoff
    assert!(elapsed >= Duration::from_millis(5_500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(6_000), "elapsed {elapsed:?}");

    assert_eq!(
        platform.attempts_for("7"),
        vec!["Hello <@7>!".to_string(), "Hello <@7>!".to_string()]
    );
    assert!(platform.attempts_for("4").is_empty());
    assert_eq!(platform.delivered().len(), 9);

    let logs = log_lines(&events);
    assert!(logs
        .iter()
        .any(|(level, text)| *level == LogLevel::Warn && text.contains("member-4 - DMs disabled")));
    assert!(logs
        .iter()
        .any(|(_, text)| text.contains("Sent to **member-7** (after retry)")));
    assert!(logs
        .iter()
        .any(|(_, text)| text.contains("Rate limited! Waiting 1s")));

    let notes = platform.status_texts();
    assert!(notes.iter().any(|text| text.contains("Rate limited! Waiting 1s")));
    assert_eq!(
        notes.last().map(String::as_str),
        Some("**Complete!** Sent: 9 | Failed: 0 | DM Closed: 1 | Total: 10")
    );
    let edits = platform.status_edits.lock().expect("edits lock").clone();
    match edits.last() {
        Some(StatusPost::Card(card)) => {
            assert_eq!(card.title, "Mass DM Complete!");
            assert_eq!(card.snapshot, snapshot);
        }
        other => panic!("expected a final card edit, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn integration_stop_after_third_recipient_halts_before_fourth() {
    let platform = Arc::new(ScriptedPlatform::with_members(numbered_members(10)));
    let engine = engine(Arc::clone(&platform));
    let mut handle = engine
        .start_dispatch(
            request("operator", "hi <user>", Duration::from_millis(500)),
            None,
        )
        .expect("start");

    let mut terminal = None;
    while let Some(event) = handle.next_event().await {
        match event {
            ProgressEvent::Progress { snapshot } if snapshot.processed() == 3 => {
                assert!(engine.stop_dispatch("operator"));
            }
            ProgressEvent::Complete { snapshot } => terminal = Some(snapshot),
            _ => {}
        }
    }

    let snapshot = terminal.expect("terminal event");
    assert_eq!(snapshot.status, DispatchStatus::Stopped);
    assert_eq!(snapshot.processed(), 3);
    assert_eq!(snapshot.sent, 3);
    assert_eq!(snapshot.total, 10);
    assert_eq!(
        platform.delivered(),
        vec!["dm-1".to_string(), "dm-2".to_string(), "dm-3".to_string()]
    );
    assert!(!engine.registry().is_active("operator"));
}

#[tokio::test(start_paused = true)]
async fn integration_duplicate_session_is_rejected_and_existing_run_is_untouched() {
    let platform = Arc::new(ScriptedPlatform::with_members(numbered_members(4)));
    let engine = engine(Arc::clone(&platform));
    let first = engine
        .start_dispatch(request("operator", "one <user>", Duration::from_millis(500)), None)
        .expect("start first");

    let duplicate = engine.start_dispatch(
        request("operator", "two <user>", Duration::from_millis(500)),
        None,
    );
    match duplicate {
        Err(DispatchError::SessionAlreadyActive { session_id }) => {
            assert_eq!(session_id, "operator")
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("duplicate session was accepted"),
    }

    let snapshot = first.wait().await.expect("join first");
    assert_eq!(snapshot.status, DispatchStatus::Complete);
    assert_eq!(snapshot.sent, 4);
    let attempts = platform.send_attempts.lock().expect("attempts lock").clone();
    assert!(attempts.iter().all(|(_, text)| text.starts_with("one ")));

    // the identifier is free again once the first run finished
    let rerun = engine
        .start_dispatch(request("operator", "again <user>", Duration::from_millis(500)), None)
        .expect("restart after completion");
    assert_eq!(rerun.wait().await.expect("join rerun").sent, 4);
}

#[tokio::test(start_paused = true)]
async fn integration_role_filter_without_matches_completes_with_zero_total() {
    let platform = Arc::new(ScriptedPlatform::with_members(vec![
        member("1", &["10"], false),
        member("2", &["20"], false),
    ]));
    let engine = engine(Arc::clone(&platform));
    let mut dispatch = request("operator", "hi <user>", Duration::from_millis(500));
    dispatch.mode = DispatchMode::Roles;
    dispatch.role_ids = vec!["99".to_string()];

    let (events, snapshot) = engine
        .start_dispatch(dispatch, None)
        .expect("start")
        .collect()
        .await
        .expect("join");

    assert_eq!(snapshot.total, 0);
    assert_eq!(snapshot.status, DispatchStatus::Complete);
    assert_eq!(complete_events(&events).len(), 1);
    assert!(log_lines(&events)
        .iter()
        .any(|(level, text)| *level == LogLevel::Warn && text == NO_RECIPIENTS_NOTICE));
    assert!(platform.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn integration_role_filter_uses_or_semantics_and_skips_bots() {
    let platform = Arc::new(ScriptedPlatform::with_members(vec![
        member("1", &["10"], false),
        member("2", &["20"], false),
        member("3", &["30"], false),
        member("4", &["10", "20"], true),
    ]));
    let engine = engine(Arc::clone(&platform));
    let mut dispatch = request("operator", "hi <user>", Duration::from_millis(500));
    dispatch.mode = DispatchMode::Roles;
    dispatch.role_ids = vec!["10".to_string(), "20".to_string()];

    let snapshot = engine
        .start_dispatch(dispatch, None)
        .expect("start")
        .wait()
        .await
        .expect("join");

    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.sent, 2);
    assert_eq!(
        platform.delivered(),
        vec!["dm-1".to_string(), "dm-2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn regression_second_rate_limit_on_retry_is_failed() {
    let limited = || {
        Err(PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        })
    };
    let platform = Arc::new(
        ScriptedPlatform::with_members(numbered_members(3))
            .script_send("2", vec![limited(), limited()]),
    );
    let engine = engine(Arc::clone(&platform));

    let (events, snapshot) = engine
        .start_dispatch(request("operator", "yo <user>", Duration::from_millis(500)), None)
        .expect("start")
        .collect()
        .await
        .expect("join");

    assert_eq!(snapshot.sent, 2);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.processed(), snapshot.total);
    assert_eq!(platform.attempts_for("2").len(), 2);
    assert!(log_lines(&events)
        .iter()
        .any(|(_, text)| text.contains("Failed: **member-2**")));
}

#[tokio::test(start_paused = true)]
async fn integration_missing_group_emits_error_then_errored_summary() {
    let platform = Arc::new(ScriptedPlatform {
        missing_group: true,
        ..ScriptedPlatform::default()
    });
    let engine = engine(Arc::clone(&platform));
    let mut dispatch = request("operator", "hi <user>", Duration::from_millis(500));
    dispatch.status_channel_id = Some("log-1".to_string());

    let (events, snapshot) = engine
        .start_dispatch(dispatch, None)
        .expect("start")
        .collect()
        .await
        .expect("join");

    assert_eq!(snapshot.status, DispatchStatus::Errored);
    assert_eq!(snapshot.total, 0);
    let error_index = events
        .iter()
        .position(|event| matches!(event, ProgressEvent::Error { .. }))
        .expect("error event");
    let complete_index = events
        .iter()
        .position(ProgressEvent::is_terminal)
        .expect("complete event");
    assert!(error_index < complete_index);
    assert_eq!(complete_index, events.len() - 1);
    let posts = platform.status_posts.lock().expect("posts lock").clone();
    assert!(matches!(
        posts.first(),
        Some(StatusPost::Card(card)) if card.title == "Mass DM Failed"
    ));
}

#[tokio::test(start_paused = true)]
async fn integration_fetch_error_mid_pagination_aborts_without_sending() {
    let platform = Arc::new(ScriptedPlatform {
        members: numbered_members(5),
        fail_listing_after_pages: Some(2),
        ..ScriptedPlatform::default()
    });
    let engine = DispatchEngine::new(
        Arc::clone(&platform) as Arc<dyn DispatchPlatform>,
        DispatchEngineConfig {
            page_size: 2,
            ..DispatchEngineConfig::default()
        },
    );

    let (events, snapshot) = engine
        .start_dispatch(request("operator", "hi <user>", Duration::from_millis(500)), None)
        .expect("start")
        .collect()
        .await
        .expect("join");

    assert_eq!(snapshot.status, DispatchStatus::Errored);
    assert!(platform.delivered().is_empty());
    assert!(events.iter().any(|event| matches!(
        event,
        ProgressEvent::Error { text } if text.contains("member fetch failed after 4 members")
    )));
}

#[tokio::test(start_paused = true)]
async fn integration_concurrent_sessions_are_independent() {
    let platform = Arc::new(ScriptedPlatform::with_members(numbered_members(6)));
    let engine = engine(Arc::clone(&platform));
    let mut alpha = engine
        .start_dispatch(request("alpha", "a <user>", Duration::from_secs(1)), None)
        .expect("start alpha");
    let beta = engine
        .start_dispatch(request("beta", "b <user>", Duration::from_secs(1)), None)
        .expect("start beta");

    let mut alpha_terminal = None;
    while let Some(event) = alpha.next_event().await {
        match event {
            ProgressEvent::Progress { snapshot } if snapshot.processed() == 1 => {
                assert!(engine.stop_dispatch("alpha"));
            }
            ProgressEvent::Complete { snapshot } => alpha_terminal = Some(snapshot),
            _ => {}
        }
    }
    let beta_snapshot = beta.wait().await.expect("join beta");

    let alpha_snapshot = alpha_terminal.expect("alpha terminal");
    assert_eq!(alpha_snapshot.status, DispatchStatus::Stopped);
    assert_eq!(alpha_snapshot.processed(), 1);
    assert_eq!(beta_snapshot.status, DispatchStatus::Complete);
    assert_eq!(beta_snapshot.sent, 6);
    assert!(!engine.stop_dispatch("alpha"));
}
