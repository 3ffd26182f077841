//! Paginated member resolution with bot exclusion and role filtering.

use tracing::debug;

use crate::dispatch_contract::Recipient;
use crate::dispatch_error::DispatchError;
use crate::dispatch_platform::{DispatchPlatform, PlatformError};

pub const PLATFORM_MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Resolution result. `Empty` is a terminal "nothing to do" state, not a failure.
pub enum RecipientResolution {
    Eligible(Vec<Recipient>),
    Empty,
}

impl RecipientResolution {
    pub fn into_recipients(self) -> Vec<Recipient> {
        match self {
            Self::Eligible(recipients) => recipients,
            Self::Empty => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Eligible(recipients) => recipients.len(),
            Self::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches every member page, then applies the bot and role filters.
///
/// The result is all-or-nothing: any fault mid-pagination fails the whole
/// resolution and no partial list is returned.
pub async fn resolve_recipients(
    platform: &dyn DispatchPlatform,
    group_id: &str,
    role_filter: Option<&[String]>,
    page_size: usize,
) -> Result<RecipientResolution, DispatchError> {
    let members = fetch_all_members(platform, group_id, page_size).await?;
    let fetched = members.len();
    let eligible = members
        .into_iter()
        .filter(|member| !member.is_bot)
        .filter(|member| match role_filter {
            Some(role_ids) => member.holds_any_role(role_ids),
            None => true,
        })
        .collect::<Vec<_>>();
    debug!(
        group_id,
        fetched,
        eligible = eligible.len(),
        role_filter = role_filter.map(|roles| roles.len()).unwrap_or(0),
        "resolved dispatch recipients"
    );
    if eligible.is_empty() {
        return Ok(RecipientResolution::Empty);
    }
    Ok(RecipientResolution::Eligible(eligible))
}

async fn fetch_all_members(
    platform: &dyn DispatchPlatform,
    group_id: &str,
    page_size: usize,
) -> Result<Vec<Recipient>, DispatchError> {
    let page_size = page_size.clamp(1, PLATFORM_MAX_PAGE_SIZE);
    let mut members: Vec<Recipient> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = platform
            .list_members(group_id, cursor.as_deref(), page_size)
            .await
            .map_err(|error| match error {
                PlatformError::NotFound { .. } => DispatchError::GroupNotFound {
                    group_id: group_id.to_string(),
                },
                other => DispatchError::FetchError {
                    fetched: members.len(),
                    source: other,
                },
            })?;
        let page_len = page.len();
        let Some(last) = page.last() else {
            break;
        };
        if cursor.as_deref() == Some(last.id.as_str()) {
            // Cursor did not advance; stop instead of re-reading the same page.
            break;
        }
        cursor = Some(last.id.clone());
        members.extend(page);
        if page_len < page_size {
            break;
        }
    }
    Ok(members)
}
