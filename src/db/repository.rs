//! Database repository for request, user and report queries.
//!
//! Every mutation runs inside one transaction; an early return drops the
//! transaction, which rolls it back.

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::lifecycle::{split_stored_dates, ValidEquipment, ValidPermit};
use crate::models::{
    CreateUserRequest, EquipmentRequest, HistoricalRecord, HistoryEntry, Lifecycle, PermitRequest,
    Request, RequestKind, RequestStatus, RequesterFilter, User, UserRole,
};

const PERMIT_COLUMNS: &str = "id, requester_code, requester_name, phone, dates, time, \
     novelty_type, description, attachments, approval_marker, status, response_text, notified, \
     created_at";

const EQUIPMENT_COLUMNS: &str = "id, requester_code, requester_name, equipment_type, \
     description, zone, shift_code_am, shift_code_pm, shift, status, response_text, notified, \
     created_at";

/// Permit novelty types left out of the weekly history.
const WEEKLY_EXCLUDED_NOVELTIES: &str = "('descanso', 'licencia')";

/// Maximum number of entries returned by a user history lookup.
const HISTORY_LIMIT: i64 = 50;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== REQUEST WRITES ====================

    /// Insert a validated permit request with its stored attachment names.
    pub async fn insert_permit(
        &self,
        user: &CurrentUser,
        permit: &ValidPermit,
        attachments: &[String],
    ) -> Result<PermitRequest, AppError> {
        let now = now_timestamp();
        let dates = permit.date_strings();
        let attachments_json = if attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(attachments)?)
        };

        let mut tx = self.pool.begin().await?;
        let id = allocate_id(&mut tx, RequestKind::Permit, &now).await?;

        sqlx::query(
            r#"INSERT INTO permit_requests (
                id, requester_code, requester_name, phone, dates, time, novelty_type,
                description, attachments, approval_marker, status, response_text, notified,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 'pending', NULL, 0, ?)"#,
        )
        .bind(id)
        .bind(&user.code)
        .bind(&user.name)
        .bind(&permit.phone)
        .bind(dates.join(","))
        .bind(&permit.time)
        .bind(&permit.novelty_type)
        .bind(&permit.description)
        .bind(&attachments_json)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Permit request {} submitted by {} for {} date(s)",
            id,
            user.code,
            dates.len()
        );

        Ok(PermitRequest {
            id,
            requester_code: user.code.clone(),
            requester_name: user.name.clone(),
            phone: permit.phone.clone(),
            dates,
            time: permit.time.clone(),
            novelty_type: permit.novelty_type.clone(),
            description: permit.description.clone(),
            attachments: attachments.to_vec(),
            approval_marker: None,
            status: RequestStatus::Pending,
            response_text: None,
            notified: 0,
            created_at: now,
        })
    }

    /// Insert a validated equipment request.
    pub async fn insert_equipment(
        &self,
        user: &CurrentUser,
        equipment: &ValidEquipment,
    ) -> Result<EquipmentRequest, AppError> {
        let now = now_timestamp();

        let mut tx = self.pool.begin().await?;
        let id = allocate_id(&mut tx, RequestKind::Equipment, &now).await?;

        sqlx::query(
            r#"INSERT INTO equipment_requests (
                id, requester_code, requester_name, equipment_type, description, zone,
                shift_code_am, shift_code_pm, shift, status, response_text, notified, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', NULL, 0, ?)"#,
        )
        .bind(id)
        .bind(&user.code)
        .bind(&user.name)
        .bind(&equipment.equipment_type)
        .bind(&equipment.description)
        .bind(&equipment.zone)
        .bind(&equipment.shift_code_am)
        .bind(&equipment.shift_code_pm)
        .bind(&equipment.shift)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Equipment request {} submitted by {}", id, user.code);

        Ok(EquipmentRequest {
            id,
            requester_code: user.code.clone(),
            requester_name: user.name.clone(),
            equipment_type: equipment.equipment_type.clone(),
            description: equipment.description.clone(),
            zone: equipment.zone.clone(),
            shift_code_am: equipment.shift_code_am.clone(),
            shift_code_pm: equipment.shift_code_pm.clone(),
            shift: equipment.shift.clone(),
            status: RequestStatus::Pending,
            response_text: None,
            notified: 0,
            created_at: now,
        })
    }

    /// Set status and response text on whichever kind owns `id`.
    /// Does not touch `notified`.
    pub async fn decide(
        &self,
        id: i64,
        status: RequestStatus,
        response_text: Option<&str>,
    ) -> Result<Request, AppError> {
        if !status.is_decided() {
            return Err(AppError::Validation(format!(
                "Status '{}' cannot be set by a decision",
                status.as_str()
            )));
        }

        let mut tx = self.pool.begin().await?;

        let mut owner = None;
        for kind in RequestKind::RESOLUTION_ORDER {
            let sql = format!(
                "UPDATE {} SET status = ?, response_text = ? WHERE id = ?",
                kind.table()
            );
            let result = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(response_text)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                owner = Some(kind);
                break;
            }
        }

        let kind = owner.ok_or_else(|| request_not_found(id))?;
        let request = fetch_kind(&mut tx, kind, id)
            .await?
            .ok_or_else(|| request_not_found(id))?;

        tx.commit().await?;

        tracing::info!(
            "{} request {} decided: {}",
            kind.as_str(),
            id,
            status.as_str()
        );

        Ok(request)
    }

    /// Raise the notified flag on whichever kind owns `id`. A lower value
    /// leaves the stored one in place.
    pub async fn mark_notified(&self, id: i64, value: i64) -> Result<Request, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut owner = None;
        for kind in RequestKind::RESOLUTION_ORDER {
            let sql = format!(
                "UPDATE {} SET notified = MAX(notified, ?) WHERE id = ?",
                kind.table()
            );
            let result = sqlx::query(&sql)
                .bind(value)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                owner = Some(kind);
                break;
            }
        }

        let kind = owner.ok_or_else(|| request_not_found(id))?;
        let request = fetch_kind(&mut tx, kind, id)
            .await?
            .ok_or_else(|| request_not_found(id))?;

        tx.commit().await?;

        tracing::debug!("{} request {} marked notified ({})", kind.as_str(), id, value);

        Ok(request)
    }

    /// Record the secondary approver of a permit without touching its status.
    pub async fn set_approval_marker(
        &self,
        id: i64,
        marker: &str,
    ) -> Result<PermitRequest, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE permit_requests SET approval_marker = ? WHERE id = ?")
            .bind(marker)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Permit request {} not found", id)));
        }

        let permit = match fetch_kind(&mut tx, RequestKind::Permit, id).await? {
            Some(Request::Permit(permit)) => permit,
            _ => return Err(AppError::NotFound(format!("Permit request {} not found", id))),
        };

        tx.commit().await?;

        tracing::info!("Permit request {} approval marker set to '{}'", id, marker);

        Ok(permit)
    }

    /// Delete the request with `id`, Permit first. Returns the deleted record.
    pub async fn delete_request(&self, id: i64) -> Result<Request, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut deleted = None;
        for kind in RequestKind::RESOLUTION_ORDER {
            let sql = format!(
                "DELETE FROM {} WHERE id = ? RETURNING {}",
                kind.table(),
                columns(kind)
            );
            if let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? {
                deleted = Some(request_from_row(kind, &row));
                break;
            }
        }

        let request = deleted.ok_or_else(|| request_not_found(id))?;

        tx.commit().await?;

        tracing::info!("{} request {} deleted", request.kind().as_str(), id);

        Ok(request)
    }

    // ==================== REQUEST READS ====================

    /// Find a request by id, trying Permit then Equipment.
    pub async fn find_request(&self, id: i64) -> Result<Option<Request>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_request(&mut conn, id).await?)
    }

    /// Get a permit request by id.
    pub async fn get_permit(&self, id: i64) -> Result<Option<PermitRequest>, AppError> {
        let mut conn = self.pool.acquire().await?;
        match fetch_kind(&mut conn, RequestKind::Permit, id).await? {
            Some(Request::Permit(permit)) => Ok(Some(permit)),
            _ => Ok(None),
        }
    }

    /// List every request of both kinds, ordered by id.
    pub async fn list_requests(&self) -> Result<Vec<Request>, AppError> {
        self.select_requests("1 = 1", None).await
    }

    /// List a requester's requests matching `filter`, ordered by id.
    pub async fn requests_for(
        &self,
        requester_code: &str,
        filter: RequesterFilter,
    ) -> Result<Vec<Request>, AppError> {
        let condition = match filter {
            RequesterFilter::All => "requester_code = ?",
            RequesterFilter::Decided => {
                "requester_code = ? AND status IN ('approved', 'rejected')"
            }
            RequesterFilter::Unnotified => "requester_code = ? AND notified = 0",
        };
        self.select_requests(condition, Some(requester_code)).await
    }

    /// Raw date strings of the requester's permits that are not rejected.
    pub async fn active_permit_dates(&self, requester_code: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT dates FROM permit_requests WHERE requester_code = ? AND status != 'rejected'",
        )
        .bind(requester_code)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("dates")).collect())
    }

    async fn select_requests(
        &self,
        condition: &str,
        requester_code: Option<&str>,
    ) -> Result<Vec<Request>, AppError> {
        let mut requests = Vec::new();

        for kind in RequestKind::RESOLUTION_ORDER {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY id",
                columns(kind),
                kind.table(),
                condition
            );
            let mut query = sqlx::query(&sql);
            if let Some(code) = requester_code {
                query = query.bind(code);
            }
            let rows = query.fetch_all(&self.pool).await?;
            requests.extend(rows.iter().map(|row| request_from_row(kind, row)));
        }

        requests.sort_by_key(|request| request.id());
        Ok(requests)
    }

    // ==================== USER OPERATIONS ====================

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query("SELECT code, name, phone, email, role FROM users ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// Get a user by code.
    pub async fn get_user(&self, code: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query("SELECT code, name, phone, email, role FROM users WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Create a new user. A taken code is a validation error.
    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<User, AppError> {
        let result =
            sqlx::query("INSERT INTO users (code, name, phone, email, role) VALUES (?, ?, ?, ?, ?)")
                .bind(&request.code)
                .bind(&request.name)
                .bind(&request.phone)
                .bind(&request.email)
                .bind(request.role.as_str())
                .execute(&self.pool)
                .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::Validation(format!(
                    "User {} already exists",
                    request.code
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(User {
            code: request.code.clone(),
            name: request.name.clone(),
            phone: request.phone.clone(),
            email: request.email.clone(),
            role: request.role,
        })
    }

    /// Change a user's phone number.
    pub async fn update_phone(&self, code: &str, phone: &str) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE users SET phone = ? WHERE code = ?")
            .bind(phone)
            .bind(code)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(user_not_found(code));
        }

        let row = sqlx::query("SELECT code, name, phone, email, role FROM users WHERE code = ?")
            .bind(code)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user_from_row(&row))
    }

    /// Delete a user.
    pub async fn delete_user(&self, code: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM users WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(user_not_found(code));
        }

        Ok(())
    }

    /// Most recent permit requests of a user, newest first.
    pub async fn user_history(&self, code: &str) -> Result<Vec<HistoryEntry>, AppError> {
        if self.get_user(code).await?.is_none() {
            return Err(user_not_found(code));
        }

        let rows = sqlx::query(
            r#"SELECT id, novelty_type, dates, status, created_at
               FROM permit_requests
               WHERE requester_code = ?
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(code)
        .bind(HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let dates: String = row.get("dates");
                let status: Option<String> = row.get("status");
                HistoryEntry {
                    id: row.get("id"),
                    novelty_type: row.get("novelty_type"),
                    dates: split_stored_dates(&dates),
                    status: RequestStatus::decode(status.as_deref()),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    // ==================== REPORT QUERIES ====================

    /// Permit records for the aggregate report, optionally filtered by status.
    pub async fn permit_history(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<HistoricalRecord>, AppError> {
        let condition = match status {
            // Unknown and missing values read back as pending
            Some(RequestStatus::Pending) => {
                "WHERE status IS NULL OR status NOT IN ('approved', 'rejected')"
            }
            Some(_) => "WHERE status = ?",
            None => "",
        };
        let sql = format!(
            r#"SELECT requester_code, requester_name, phone, novelty_type, description,
                      response_text, dates
               FROM permit_requests {} ORDER BY id"#,
            condition
        );

        let mut query = sqlx::query(&sql);
        if let Some(status) = status.filter(|s| s.is_decided()) {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.iter().map(permit_record_from_row).collect())
    }

    /// Approved records of both kinds created between `start` and `end` inclusive.
    pub async fn weekly_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalRecord>, AppError> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();

        let permit_sql = format!(
            r#"SELECT requester_code, requester_name, phone, novelty_type, description,
                      response_text, dates
               FROM permit_requests
               WHERE status = 'approved'
                 AND lower(novelty_type) NOT IN {}
                 AND date(created_at) BETWEEN ? AND ?
               ORDER BY id"#,
            WEEKLY_EXCLUDED_NOVELTIES
        );
        let permit_rows = sqlx::query(&permit_sql)
            .bind(&start)
            .bind(&end)
            .fetch_all(&self.pool)
            .await?;

        let equipment_rows = sqlx::query(
            r#"SELECT requester_code, requester_name, equipment_type, description,
                      response_text, date(created_at) AS created_on
               FROM equipment_requests
               WHERE status = 'approved'
                 AND date(created_at) BETWEEN ? AND ?
               ORDER BY id"#,
        )
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<HistoricalRecord> =
            permit_rows.iter().map(permit_record_from_row).collect();
        records.extend(equipment_rows.iter().map(|row| {
            let response_text: Option<String> = row.get("response_text");
            HistoricalRecord {
                kind: RequestKind::Equipment,
                code: row.get("requester_code"),
                name: row.get("requester_name"),
                phone: String::new(),
                novelty_type: row.get("equipment_type"),
                description: row.get("description"),
                response_text: response_text.unwrap_or_default(),
                dates: vec![row.get("created_on")],
            }
        }));

        Ok(records)
    }
}

// Helper functions for id allocation and row conversion

async fn allocate_id(
    conn: &mut SqliteConnection,
    kind: RequestKind,
    now: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO request_ids (kind, created_at) VALUES (?, ?)")
        .bind(kind.as_str())
        .bind(now)
        .execute(conn)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn fetch_request(conn: &mut SqliteConnection, id: i64) -> Result<Option<Request>, sqlx::Error> {
    for kind in RequestKind::RESOLUTION_ORDER {
        if let Some(request) = fetch_kind(&mut *conn, kind, id).await? {
            return Ok(Some(request));
        }
    }
    Ok(None)
}

async fn fetch_kind(
    conn: &mut SqliteConnection,
    kind: RequestKind,
    id: i64,
) -> Result<Option<Request>, sqlx::Error> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", columns(kind), kind.table());
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    Ok(row.map(|row| request_from_row(kind, &row)))
}

fn columns(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Permit => PERMIT_COLUMNS,
        RequestKind::Equipment => EQUIPMENT_COLUMNS,
    }
}

fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn request_not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Request {} not found", id))
}

fn user_not_found(code: &str) -> AppError {
    AppError::NotFound(format!("User {} not found", code))
}

fn request_from_row(kind: RequestKind, row: &SqliteRow) -> Request {
    match kind {
        RequestKind::Permit => Request::Permit(permit_from_row(row)),
        RequestKind::Equipment => Request::Equipment(equipment_from_row(row)),
    }
}

fn permit_from_row(row: &SqliteRow) -> PermitRequest {
    let dates: String = row.get("dates");
    let attachments: Option<String> = row.get("attachments");
    let status: Option<String> = row.get("status");
    PermitRequest {
        id: row.get("id"),
        requester_code: row.get("requester_code"),
        requester_name: row.get("requester_name"),
        phone: row.get("phone"),
        dates: split_stored_dates(&dates),
        time: row
            .get::<Option<String>, _>("time")
            .filter(|t| !t.is_empty()),
        novelty_type: row.get("novelty_type"),
        description: row.get("description"),
        attachments: attachments
            .map(|s| parse_json_array(&s))
            .unwrap_or_default(),
        approval_marker: row.get("approval_marker"),
        status: RequestStatus::decode(status.as_deref()),
        response_text: row.get("response_text"),
        notified: row.get("notified"),
        created_at: row.get("created_at"),
    }
}

fn equipment_from_row(row: &SqliteRow) -> EquipmentRequest {
    let status: Option<String> = row.get("status");
    EquipmentRequest {
        id: row.get("id"),
        requester_code: row.get("requester_code"),
        requester_name: row.get("requester_name"),
        equipment_type: row.get("equipment_type"),
        description: row.get("description"),
        zone: row.get("zone"),
        shift_code_am: row.get("shift_code_am"),
        shift_code_pm: row.get("shift_code_pm"),
        shift: row.get("shift"),
        status: RequestStatus::decode(status.as_deref()),
        response_text: row.get("response_text"),
        notified: row.get("notified"),
        created_at: row.get("created_at"),
    }
}

fn user_from_row(row: &SqliteRow) -> User {
    let role: String = row.get("role");
    User {
        code: row.get("code"),
        name: row.get("name"),
        phone: row.get("phone"),
        email: row.get("email"),
        role: UserRole::from_str(&role).unwrap_or_default(),
    }
}

fn permit_record_from_row(row: &SqliteRow) -> HistoricalRecord {
    let dates: String = row.get("dates");
    let response_text: Option<String> = row.get("response_text");
    HistoricalRecord {
        kind: RequestKind::Permit,
        code: row.get("requester_code"),
        name: row.get("requester_name"),
        phone: row.get("phone"),
        novelty_type: row.get("novelty_type"),
        description: row.get("description"),
        response_text: response_text.unwrap_or_default(),
        dates: split_stored_dates(&dates),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
