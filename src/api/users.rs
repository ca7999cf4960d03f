//! User directory API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateUserRequest, HistoryEntry, Request, RequesterFilter, UpdatePhoneRequest, User,
};
use crate::AppState;

/// GET /api/users - List all users.
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    match state.repo.list_users().await {
        Ok(users) => success(users),
        Err(e) => Err(e),
    }
}

/// GET /api/users/:code - Get a single user.
pub async fn get_user(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult<User> {
    match state.repo.get_user(&code).await {
        Ok(Some(user)) => success(user),
        Ok(None) => Err(AppError::NotFound(format!("User {} not found", code))),
        Err(e) => Err(e),
    }
}

/// POST /api/users - Create a new user.
pub async fn create_user(
    State(state): State<AppState>,
    Json(mut request): Json<CreateUserRequest>,
) -> ApiResult<User> {
    request.code = request.code.trim().to_string();
    request.name = request.name.trim().to_string();

    // Validate required fields
    if request.code.is_empty() {
        return Err(AppError::Validation("User code is required".to_string()));
    }
    if request.name.is_empty() {
        return Err(AppError::Validation("User name is required".to_string()));
    }

    let user = state.repo.create_user(&request).await?;
    tracing::info!("User {} created", user.code);
    success(user)
}

/// PUT /api/users/:code/phone - Change a user's phone number.
pub async fn update_user_phone(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<UpdatePhoneRequest>,
) -> ApiResult<User> {
    let phone = request.phone.trim();
    if phone.is_empty() {
        return Err(AppError::Validation("Phone is required".to_string()));
    }

    let user = state.repo.update_phone(&code, phone).await?;
    success(user)
}

/// DELETE /api/users/:code - Delete a user.
pub async fn delete_user(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult<()> {
    state.repo.delete_user(&code).await?;
    tracing::info!("User {} deleted", code);
    success(())
}

/// GET /api/users/:code/history - A user's most recent permit requests.
pub async fn user_history(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Vec<HistoryEntry>> {
    let history = state.repo.user_history(&code).await?;
    success(history)
}

/// GET /api/users/:code/requests - Every request of one requester, both kinds.
pub async fn user_requests(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Vec<Request>> {
    let requests = state
        .repo
        .requests_for(&code, RequesterFilter::All)
        .await?;
    success(requests)
}
