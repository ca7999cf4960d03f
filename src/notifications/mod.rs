//! One-time "you have an update" tracking for requesters.
//!
//! `notified` starts at 0 and is only ever raised. Zero and negative values
//! are refused so a request can never return to the unseen state, and a
//! value below the stored one leaves the stored one in place.

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Request, RequesterFilter};

/// Mark a request of either kind as seen.
pub async fn mark_notified(repo: &Repository, id: i64, value: i64) -> Result<Request, AppError> {
    if value <= 0 {
        return Err(AppError::Validation(format!(
            "Notification status must be positive, got {}",
            value
        )));
    }
    repo.mark_notified(id, value).await
}

/// Requests of `requester_code` whose outcome has not been seen yet.
pub async fn pending_notifications(
    repo: &Repository,
    requester_code: &str,
) -> Result<Vec<Request>, AppError> {
    repo.requests_for(requester_code, RequesterFilter::Unnotified)
        .await
}
