//! Reporting API endpoints.

use axum::extract::{Query, State};
use chrono::Utc;
use serde::Deserialize;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{ReportRow, RequestStatus};
use crate::report;
use crate::AppState;

/// Query parameters for the permit report.
#[derive(Debug, Deserialize)]
pub struct PermitReportQuery {
    /// Status to report on, `approved` by default
    pub status: Option<String>,
    /// Sort rows by start date
    #[serde(default)]
    pub sorted: bool,
}

/// Query parameters for the weekly report.
#[derive(Debug, Deserialize)]
pub struct WeeklyReportQuery {
    /// ISO week number of the current year; the current week when absent
    pub week: Option<u32>,
}

/// GET /api/reports/permits - Permit history grouped into date ranges.
pub async fn permit_report(
    State(state): State<AppState>,
    Query(query): Query<PermitReportQuery>,
) -> ApiResult<Vec<ReportRow>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(RequestStatus::from_str(raw).ok_or_else(|| {
            AppError::Validation(format!("Unknown status '{}'", raw))
        })?),
    };

    let rows = report::permit_report(&state.repo, status, query.sorted).await?;
    success(rows)
}

/// GET /api/reports/weekly - Approved requests of one week, grouped.
pub async fn weekly_report(
    State(state): State<AppState>,
    Query(query): Query<WeeklyReportQuery>,
) -> ApiResult<Vec<ReportRow>> {
    let today = Utc::now().date_naive();
    let rows = report::weekly_report(&state.repo, query.week, today).await?;
    success(rows)
}
