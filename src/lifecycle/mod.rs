//! Request lifecycle: input validation, submission and reviewer decisions.
//!
//! Status moves from `pending` to `approved` or `rejected` and never returns
//! to `pending`. Between the two decided states the last decision wins.

use chrono::NaiveDate;

use crate::auth::CurrentUser;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    EquipmentRequest, Lifecycle, NewEquipmentRequest, NewPermitRequest, PermitRequest, Request,
    RequestStatus,
};
use crate::storage::{
    is_mime_type_allowed, Attachment, CompensationLog, FileStore, ALLOWED_MIME_TYPES,
};

/// Calendar date format used on the wire and in storage.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A permit request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPermit {
    pub phone: String,
    /// Distinct dates in submission order
    pub dates: Vec<NaiveDate>,
    pub time: Option<String>,
    pub novelty_type: String,
    pub description: String,
}

impl ValidPermit {
    pub fn date_strings(&self) -> Vec<String> {
        self.dates
            .iter()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect()
    }
}

/// An equipment request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEquipment {
    pub equipment_type: String,
    pub description: String,
    pub zone: Option<String>,
    pub shift_code_am: Option<String>,
    pub shift_code_pm: Option<String>,
    pub shift: Option<String>,
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_calendar_date(raw: &str) -> Result<NaiveDate, AppError> {
    let raw = raw.trim();
    let shape_ok = raw.len() == 10
        && raw.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });

    if !shape_ok {
        return Err(AppError::Validation(format!(
            "Invalid date '{}': expected YYYY-MM-DD",
            raw
        )));
    }

    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| AppError::Validation(format!("Invalid date '{}': {}", raw, e)))
}

/// Parse every date, failing on the first malformed one. Duplicates are
/// dropped, keeping the first occurrence.
pub fn parse_date_set(raw: &[String]) -> Result<Vec<NaiveDate>, AppError> {
    let mut dates: Vec<NaiveDate> = Vec::with_capacity(raw.len());
    for entry in raw {
        let date = parse_calendar_date(entry)?;
        if !dates.contains(&date) {
            dates.push(date);
        }
    }
    Ok(dates)
}

/// Split a stored comma-joined date list back into its entries.
pub fn split_stored_dates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate a permit submission.
pub fn validate_permit(input: NewPermitRequest) -> Result<ValidPermit, AppError> {
    let phone = required("phone", &input.phone)?;
    let novelty_type = required("noveltyType", &input.novelty_type)?;
    let description = required("description", &input.description)?;

    if input.dates.is_empty() {
        return Err(AppError::Validation(
            "At least one date is required".to_string(),
        ));
    }
    let dates = parse_date_set(&input.dates)?;

    Ok(ValidPermit {
        phone,
        dates,
        time: optional(input.time),
        novelty_type,
        description,
    })
}

/// Validate an equipment submission.
pub fn validate_equipment(input: NewEquipmentRequest) -> Result<ValidEquipment, AppError> {
    Ok(ValidEquipment {
        equipment_type: required("type", &input.equipment_type)?,
        description: required("description", &input.description)?,
        zone: optional(input.zone),
        shift_code_am: optional(input.shift_code_am),
        shift_code_pm: optional(input.shift_code_pm),
        shift: optional(input.shift),
    })
}

/// Parse the target status of a decision. Only the two decided states are accepted.
pub fn parse_decision(raw: &str) -> Result<RequestStatus, AppError> {
    match RequestStatus::from_str(raw.trim()) {
        Some(status) if status.is_decided() => Ok(status),
        _ => Err(AppError::Validation(format!(
            "Invalid decision '{}': expected 'approved' or 'rejected'",
            raw
        ))),
    }
}

/// Submit a permit request with attachments.
///
/// Attachments are written before the insert. If any write or the insert
/// fails, every file written so far is deleted again before the error is
/// returned.
pub async fn submit_permit(
    repo: &Repository,
    files: &FileStore,
    user: &CurrentUser,
    input: NewPermitRequest,
    attachments: Vec<Attachment>,
) -> Result<PermitRequest, AppError> {
    let permit = validate_permit(input)?;

    if let Some(rejected) = attachments
        .iter()
        .find(|a| !is_mime_type_allowed(&a.content_type))
    {
        return Err(AppError::Validation(format!(
            "File type '{}' is not allowed for '{}'. Allowed types: {}",
            rejected.content_type,
            rejected.file_name,
            ALLOWED_MIME_TYPES.join(", ")
        )));
    }

    let mut compensations = CompensationLog::default();
    for attachment in &attachments {
        match files
            .save_file(&attachment.bytes, &attachment.file_name)
            .await
        {
            Ok(stored_name) => compensations.record(stored_name),
            Err(e) => {
                compensations.run(files).await;
                return Err(e);
            }
        }
    }

    match repo
        .insert_permit(user, &permit, compensations.stored_names())
        .await
    {
        Ok(created) => Ok(created),
        Err(e) => {
            tracing::warn!(
                "Permit insert for {} failed, removing {} attachment(s)",
                user.code,
                compensations.stored_names().len()
            );
            compensations.run(files).await;
            Err(e)
        }
    }
}

/// Submit an equipment request.
pub async fn submit_equipment(
    repo: &Repository,
    user: &CurrentUser,
    input: NewEquipmentRequest,
) -> Result<EquipmentRequest, AppError> {
    let equipment = validate_equipment(input)?;
    repo.insert_equipment(user, &equipment).await
}

/// Record a reviewer decision on a request of either kind.
pub async fn decide(
    repo: &Repository,
    id: i64,
    raw_status: &str,
    response_text: Option<String>,
) -> Result<Request, AppError> {
    let status = parse_decision(raw_status)?;
    let response_text = optional(response_text);
    repo.decide(id, status, response_text.as_deref()).await
}

/// Record the secondary approver of a permit.
pub async fn set_approval_marker(
    repo: &Repository,
    id: i64,
    marker: &str,
) -> Result<PermitRequest, AppError> {
    let marker = required("approvedBy", marker)?;
    repo.set_approval_marker(id, &marker).await
}

/// Delete a request of either kind. A deleted permit's attachments are
/// removed after the row is gone; a file that cannot be removed is logged
/// and left behind.
pub async fn delete_request(
    repo: &Repository,
    files: &FileStore,
    id: i64,
) -> Result<Request, AppError> {
    let deleted = repo.delete_request(id).await?;
    tracing::debug!(
        "Removing attachments of request {} (requester {})",
        id,
        deleted.requester_code()
    );

    if let Request::Permit(permit) = &deleted {
        for name in &permit.attachments {
            if let Err(e) = files.delete_file(name).await {
                tracing::warn!("Attachment {} of request {} not removed: {}", name, id, e);
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{test_repository, user};
    use crate::models::Lifecycle;
    use tempfile::TempDir;

    fn new_permit(dates: &[&str]) -> NewPermitRequest {
        NewPermitRequest {
            phone: "555-0101".to_string(),
            dates: dates.iter().map(|d| d.to_string()).collect(),
            time: Some("08:00".to_string()),
            novelty_type: "medical".to_string(),
            description: "dentist".to_string(),
        }
    }

    fn attachment(name: &str) -> Attachment {
        Attachment {
            file_name: name.to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        }
    }

    #[test]
    fn test_parse_calendar_date_is_strict() {
        assert!(parse_calendar_date("2024-06-05").is_ok());
        assert!(parse_calendar_date(" 2024-06-05 ").is_ok());
        assert!(parse_calendar_date("2024-6-5").is_err());
        assert!(parse_calendar_date("05/06/2024").is_err());
        assert!(parse_calendar_date("2024-02-30").is_err());
        assert!(parse_calendar_date("").is_err());
    }

    #[test]
    fn test_parse_date_set_dedupes_in_order() {
        let raw = vec![
            "2024-06-06".to_string(),
            "2024-06-05".to_string(),
            "2024-06-06".to_string(),
        ];
        let dates = parse_date_set(&raw).unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 6, 6).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
            ]
        );
    }

    #[test]
    fn test_split_stored_dates() {
        assert_eq!(
            split_stored_dates("2024-06-05, 2024-06-06,,"),
            vec!["2024-06-05", "2024-06-06"]
        );
        assert!(split_stored_dates("").is_empty());
    }

    #[test]
    fn test_validate_permit_requires_fields() {
        let mut input = new_permit(&["2024-06-05"]);
        input.phone = "  ".to_string();
        let err = validate_permit(input).unwrap_err();
        assert!(err.message().contains("phone"));

        let err = validate_permit(new_permit(&[])).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = validate_permit(new_permit(&["2024-06-05", "tomorrow"])).unwrap_err();
        assert!(err.message().contains("tomorrow"));
    }

    #[test]
    fn test_validate_equipment_drops_blank_optionals() {
        let valid = validate_equipment(NewEquipmentRequest {
            equipment_type: "radio".to_string(),
            description: "new battery".to_string(),
            zone: Some("  ".to_string()),
            shift: Some("night".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert!(valid.zone.is_none());
        assert_eq!(valid.shift.as_deref(), Some("night"));

        assert!(validate_equipment(NewEquipmentRequest::default()).is_err());
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision("approved").unwrap(), RequestStatus::Approved);
        assert_eq!(parse_decision("rejected").unwrap(), RequestStatus::Rejected);
        assert!(parse_decision("pending").is_err());
        assert!(parse_decision("maybe").is_err());
    }

    #[tokio::test]
    async fn test_decide_is_last_write_wins() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();
        let created = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(created.status, RequestStatus::Pending);

        let approved = decide(&repo, created.id, "approved", Some("ok".to_string()))
            .await
            .unwrap();
        assert_eq!(approved.status(), RequestStatus::Approved);
        assert_eq!(approved.response_text(), Some("ok"));

        let again = decide(&repo, created.id, "approved", Some("ok".to_string()))
            .await
            .unwrap();
        assert_eq!(again, approved);

        let rejected = decide(&repo, created.id, "rejected", Some("no cover".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status(), RequestStatus::Rejected);
        assert_eq!(rejected.response_text(), Some("no cover"));
        assert_eq!(rejected.notified(), 0);

        let err = decide(&repo, created.id, "pending", None).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_decide_resolves_equipment_and_missing_ids() {
        let (repo, _dir) = test_repository().await;
        let equipment = submit_equipment(
            &repo,
            &user("E1", "Ana"),
            NewEquipmentRequest {
                equipment_type: "boots".to_string(),
                description: "size 42".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let decided = decide(&repo, equipment.id, "rejected", None).await.unwrap();
        assert!(matches!(decided, Request::Equipment(_)));
        assert_eq!(decided.status(), RequestStatus::Rejected);

        let err = decide(&repo, 9_999, "approved", None).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_approval_marker_is_independent_of_status() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();
        let created = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![],
        )
        .await
        .unwrap();

        let marked = set_approval_marker(&repo, created.id, "supervisor-7")
            .await
            .unwrap();
        assert_eq!(marked.approval_marker.as_deref(), Some("supervisor-7"));
        assert_eq!(marked.status, RequestStatus::Pending);

        let err = set_approval_marker(&repo, created.id, " ").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let equipment = submit_equipment(
            &repo,
            &user("E1", "Ana"),
            NewEquipmentRequest {
                equipment_type: "boots".to_string(),
                description: "size 42".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = set_approval_marker(&repo, equipment.id, "supervisor-7")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_submit_permit_keeps_attachments() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();

        let created = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![attachment("note.pdf"), attachment("note.pdf")],
        )
        .await
        .unwrap();

        assert_eq!(created.attachments, vec!["note.pdf", "note_1.pdf"]);
        for name in &created.attachments {
            assert!(files.exists(name).await);
        }
    }

    #[tokio::test]
    async fn test_failed_insert_removes_written_attachments() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();

        sqlx::query("DROP TABLE permit_requests")
            .execute(repo.pool())
            .await
            .unwrap();

        let err = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![attachment("note.pdf"), attachment("scan.pdf")],
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "CONNECTIVITY_ERROR");
        assert!(!files.exists("note.pdf").await);
        assert!(!files.exists("scan.pdf").await);
        let mut entries = tokio::fs::read_dir(files.root()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_permit_writes_nothing() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();

        let err = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["06/05/2024"]),
            vec![attachment("note.pdf")],
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(!files.exists("note.pdf").await);
        assert!(repo.list_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disallowed_attachment_type_writes_nothing() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();

        let mut gif = attachment("cat.gif");
        gif.content_type = "image/gif".to_string();

        let err = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![attachment("note.pdf"), gif],
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.message().contains("image/gif"));
        assert!(!files.exists("note.pdf").await);
        assert!(repo.list_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_paths_are_flattened() {
        let (repo, _dir) = test_repository().await;
        let upload_dir = TempDir::new().unwrap();
        let files = FileStore::open(upload_dir.path()).unwrap();

        let created = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![attachment("first.pdf"), attachment("../../etc/inner.pdf")],
        )
        .await
        .unwrap();

        assert_eq!(created.attachments, vec!["first.pdf", "inner.pdf"]);
        assert!(upload_dir.path().join("inner.pdf").exists());
    }

    #[tokio::test]
    async fn test_delete_permit_removes_attachments() {
        let (repo, dir) = test_repository().await;
        let files = FileStore::open(&dir.path().join("uploads")).unwrap();

        let created = submit_permit(
            &repo,
            &files,
            &user("E1", "Ana"),
            new_permit(&["2024-06-05"]),
            vec![attachment("note.pdf"), attachment("scan.pdf")],
        )
        .await
        .unwrap();

        // one attachment already gone does not block the delete
        files.delete_file("scan.pdf").await.unwrap();

        let deleted = delete_request(&repo, &files, created.id).await.unwrap();
        assert_eq!(deleted.id(), created.id);
        assert!(!files.exists("note.pdf").await);
        assert!(repo.find_request(created.id).await.unwrap().is_none());

        let err = delete_request(&repo, &files, created.id).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
