//! Equipment API endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::lifecycle;
use crate::models::{EquipmentRequest, NewEquipmentRequest};
use crate::AppState;

/// POST /api/equipment - Submit an equipment or shift-change request.
pub async fn submit_equipment(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<NewEquipmentRequest>,
) -> ApiResult<EquipmentRequest> {
    let equipment = lifecycle::submit_equipment(&state.repo, &user, request).await?;
    success(equipment)
}
