//! Endpoints shared by both request kinds.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::lifecycle;
use crate::models::{DecisionRequest, NotificationUpdate, Request, RequesterFilter};
use crate::notifications;
use crate::AppState;

/// GET /api/requests - List every request of both kinds.
pub async fn list_requests(State(state): State<AppState>) -> ApiResult<Vec<Request>> {
    match state.repo.list_requests().await {
        Ok(requests) => success(requests),
        Err(e) => Err(e),
    }
}

/// GET /api/requests/mine - The current user's decided requests.
pub async fn my_requests(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Vec<Request>> {
    let requests = state
        .repo
        .requests_for(&user.code, RequesterFilter::Decided)
        .await?;
    success(requests)
}

/// GET /api/requests/:id - Get a request of either kind.
pub async fn get_request(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Request> {
    match state.repo.find_request(id).await {
        Ok(Some(request)) => success(request),
        Ok(None) => Err(AppError::NotFound(format!("Request {} not found", id))),
        Err(e) => Err(e),
    }
}

/// PUT /api/requests/:id/status - Approve or reject a request.
pub async fn decide_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Request> {
    if request.status.trim().is_empty() {
        return Err(AppError::Validation("Status is required".to_string()));
    }

    let decided = lifecycle::decide(&state.repo, id, &request.status, request.response_text).await?;
    success(decided)
}

/// PUT /api/requests/:id/notifications - Mark a request's outcome as seen.
pub async fn update_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<NotificationUpdate>,
) -> ApiResult<Request> {
    let updated =
        notifications::mark_notified(&state.repo, id, request.notification_status).await?;
    success(updated)
}

/// DELETE /api/requests/:id - Delete a request and its attachments.
pub async fn delete_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Request> {
    let deleted = lifecycle::delete_request(&state.repo, &state.files, id).await?;
    success(deleted)
}

/// GET /api/notifications - The current user's requests with an unseen outcome.
pub async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Vec<Request>> {
    let pending = notifications::pending_notifications(&state.repo, &user.code).await?;
    success(pending)
}
