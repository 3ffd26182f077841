//! Registry of live dispatch sessions and their cancellation flags.
//!
//! At most one session may be live per identifier. The [`SessionHandle`]
//! returned by [`SessionRegistry::open`] removes its own entry when dropped,
//! so every exit path of the dispatch loop releases the identifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_core::current_unix_timestamp_ms;
use serde::Serialize;
use tokio::sync::watch;

use crate::dispatch_error::DispatchError;

#[derive(Debug)]
struct ActiveSession {
    generation: u64,
    started_unix_ms: u64,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveSessionSummary {
    pub session_id: String,
    pub started_unix_ms: u64,
    pub stop_requested: bool,
}

#[derive(Debug, Default)]
/// Lock-guarded map from session identifier to cancellation flag.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ActiveSession>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, ActiveSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a live session, failing when the identifier is already taken.
    pub fn open(self: &Arc<Self>, session_id: &str) -> Result<SessionHandle, DispatchError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "session id must not be empty".to_string(),
            ));
        }
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(session_id) {
            return Err(DispatchError::SessionAlreadyActive {
                session_id: session_id.to_string(),
            });
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        sessions.insert(
            session_id.to_string(),
            ActiveSession {
                generation,
                started_unix_ms: current_unix_timestamp_ms(),
                cancel_tx,
            },
        );
        Ok(SessionHandle {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            generation,
            cancel_rx,
        })
    }

    /// Sets the cancellation flag. Returns true when a session existed.
    pub fn request_stop(&self, session_id: &str) -> bool {
        let sessions = self.lock_sessions();
        match sessions.get(session_id.trim()) {
            Some(session) => {
                session.cancel_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Removes the entry unconditionally. Returns true when one was removed.
    pub fn close(&self, session_id: &str) -> bool {
        self.lock_sessions().remove(session_id.trim()).is_some()
    }

    fn close_generation(&self, session_id: &str, generation: u64) {
        let mut sessions = self.lock_sessions();
        if sessions
            .get(session_id)
            .is_some_and(|session| session.generation == generation)
        {
            sessions.remove(session_id);
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock_sessions().contains_key(session_id.trim())
    }

    pub fn active_sessions(&self) -> Vec<ActiveSessionSummary> {
        let mut summaries = self
            .lock_sessions()
            .iter()
            .map(|(session_id, session)| ActiveSessionSummary {
                session_id: session_id.clone(),
                started_unix_ms: session.started_unix_ms,
                stop_requested: *session.cancel_tx.borrow(),
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|left, right| left.session_id.cmp(&right.session_id));
        summaries
    }
}

#[derive(Debug)]
/// Loop-side view of one live session.
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    session_id: String,
    generation: u64,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once a stop has been requested for this session.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.cancel_rx.clone();
        if cancel_rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry
            .close_generation(&self.session_id, self.generation);
    }
}
