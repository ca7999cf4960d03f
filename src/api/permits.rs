//! Permit API endpoints.

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use chrono::Utc;
use tracing::debug;

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::conflict;
use crate::errors::AppError;
use crate::lifecycle;
use crate::models::{
    ApprovalUpdate, DateCheckRequest, DateCheckResponse, NewPermitRequest, PermitRequest,
};
use crate::storage::Attachment;
use crate::AppState;

/// Largest accepted multipart body for a permit submission.
pub const MAX_PERMIT_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// POST /api/permits - Submit a permit request.
///
/// Accepts multipart/form-data with:
/// - `phone`, `noveltyType`, `description` (required)
/// - `dates`: a JSON array of `YYYY-MM-DD` strings or a comma-separated list
/// - `time` (optional)
/// - `files` / `file`: any number of jpeg, png or pdf attachments
pub async fn submit_permit(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<PermitRequest> {
    let mut input = NewPermitRequest::default();
    let mut attachments = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        debug!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read multipart data: {}", e))
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "files" | "file" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let file_name = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file data: {}", e))
                })?;

                attachments.push(Attachment {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "phone" | "dates" | "time" | "noveltyType" | "description" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read field {}: {}", field_name, e))
                })?;
                match field_name.as_str() {
                    "phone" => input.phone = text,
                    "dates" => input.dates = parse_dates_field(&text)?,
                    "time" => input.time = Some(text),
                    "noveltyType" => input.novelty_type = text,
                    _ => input.description = text,
                }
            }
            _ => debug!("Ignoring unknown field: {}", field_name),
        }
    }

    let permit =
        lifecycle::submit_permit(&state.repo, &state.files, &user, input, attachments).await?;
    success(permit)
}

/// The `dates` form field is either a JSON array or a comma-separated list.
fn parse_dates_field(text: &str) -> Result<Vec<String>, AppError> {
    let text = text.trim();
    if text.starts_with('[') {
        return serde_json::from_str(text)
            .map_err(|e| AppError::Validation(format!("Malformed dates list: {}", e)));
    }
    Ok(lifecycle::split_stored_dates(text))
}

/// POST /api/permits/conflicts - Check the current user's dates against the review window.
pub async fn check_conflicts(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<DateCheckRequest>,
) -> ApiResult<DateCheckResponse> {
    let today = Utc::now().date_naive();
    let has_existing_request =
        conflict::has_conflict(&state.repo, &user.code, &request.dates, today).await?;

    success(DateCheckResponse {
        has_existing_request,
    })
}

/// GET /api/permits/:id - Get a single permit request.
pub async fn get_permit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<PermitRequest> {
    match state.repo.get_permit(id).await? {
        Some(permit) => success(permit),
        None => Err(AppError::NotFound(format!(
            "Permit request {} not found",
            id
        ))),
    }
}

/// PUT /api/permits/:id/approval - Record the secondary approver.
pub async fn set_approval_marker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ApprovalUpdate>,
) -> ApiResult<PermitRequest> {
    let permit = lifecycle::set_approval_marker(&state.repo, id, &request.approved_by).await?;
    success(permit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dates_field_accepts_both_shapes() {
        assert_eq!(
            parse_dates_field(r#"["2024-06-05","2024-06-06"]"#).unwrap(),
            vec!["2024-06-05", "2024-06-06"]
        );
        assert_eq!(
            parse_dates_field("2024-06-05, 2024-06-06").unwrap(),
            vec!["2024-06-05", "2024-06-06"]
        );
        assert!(parse_dates_field("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_dates_array_is_validation_error() {
        let err = parse_dates_field("[2024-06-05").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = parse_dates_field(r#"[1, 2]"#).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
