use thiserror::Error;

use crate::dispatch_platform::PlatformError;

#[derive(Debug, Error)]
/// Errors surfaced at the dispatch engine boundary.
pub enum DispatchError {
    #[error("group '{group_id}' could not be resolved")]
    GroupNotFound { group_id: String },
    #[error("member fetch failed after {fetched} members: {source}")]
    FetchError {
        fetched: usize,
        #[source]
        source: PlatformError,
    },
    #[error("session '{session_id}' already has an active dispatch")]
    SessionAlreadyActive { session_id: String },
    #[error("invalid dispatch request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Stable machine-readable code used by HTTP front-ends.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GroupNotFound { .. } => "group_not_found",
            Self::FetchError { .. } => "fetch_error",
            Self::SessionAlreadyActive { .. } => "session_already_active",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}
