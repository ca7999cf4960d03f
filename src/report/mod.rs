//! Historical reporting.
//!
//! Records are grouped by an exact-match key and each group collapses into
//! one row spanning its earliest to its latest date. A group holding any
//! unparsable date gets no range at all; other groups are unaffected.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::db::Repository;
use crate::errors::AppError;
use crate::lifecycle::{parse_calendar_date, DATE_FORMAT};
use crate::models::{GroupKeyField, HistoricalRecord, ReportRow, RequestStatus};

/// Grouping used by the permit report.
pub const PERMIT_REPORT_KEYS: [GroupKeyField; 6] = [
    GroupKeyField::Code,
    GroupKeyField::Name,
    GroupKeyField::Phone,
    GroupKeyField::NoveltyType,
    GroupKeyField::Description,
    GroupKeyField::ResponseText,
];

/// Grouping used by the weekly history.
pub const WEEKLY_REPORT_KEYS: [GroupKeyField; 4] = [
    GroupKeyField::Kind,
    GroupKeyField::Code,
    GroupKeyField::Name,
    GroupKeyField::NoveltyType,
];

fn key_part(record: &HistoricalRecord, field: GroupKeyField) -> &str {
    match field {
        GroupKeyField::Kind => record.kind.as_str(),
        GroupKeyField::Code => &record.code,
        GroupKeyField::Name => &record.name,
        GroupKeyField::Phone => &record.phone,
        GroupKeyField::NoveltyType => &record.novelty_type,
        GroupKeyField::Description => &record.description,
        GroupKeyField::ResponseText => &record.response_text,
    }
}

/// Group `records` by `keys` and summarize each group as one row.
///
/// Rows come out in the order their key was first seen. Fields outside the
/// key are taken from the first record of the group.
pub fn aggregate(
    records: Vec<HistoricalRecord>,
    keys: &[GroupKeyField],
) -> impl Iterator<Item = ReportRow> {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(HistoricalRecord, Vec<String>)> = Vec::new();

    for record in records {
        let key: Vec<String> = keys
            .iter()
            .map(|field| key_part(&record, *field).to_string())
            .collect();

        match index.get(&key) {
            Some(&position) => groups[position].1.extend(record.dates),
            None => {
                index.insert(key, groups.len());
                let dates = record.dates.clone();
                groups.push((record, dates));
            }
        }
    }

    groups.into_iter().map(|(first, dates)| {
        let (start_date, end_date) = match date_range(&dates) {
            Some((start, end)) => (
                Some(start.format(DATE_FORMAT).to_string()),
                Some(end.format(DATE_FORMAT).to_string()),
            ),
            None => (None, None),
        };

        ReportRow {
            kind: first.kind,
            code: first.code,
            name: first.name,
            phone: first.phone,
            novelty_type: first.novelty_type,
            description: first.description,
            response_text: first.response_text,
            start_date,
            end_date,
        }
    })
}

/// Earliest and latest date, or `None` if the set is empty or any entry is malformed.
fn date_range(raw: &[String]) -> Option<(NaiveDate, NaiveDate)> {
    let mut range: Option<(NaiveDate, NaiveDate)> = None;
    for entry in raw {
        let date = match parse_calendar_date(entry) {
            Ok(date) => date,
            Err(_) => {
                tracing::debug!("Unparsable report date '{}', group left without range", entry);
                return None;
            }
        };
        range = Some(match range {
            Some((start, end)) => (start.min(date), end.max(date)),
            None => (date, date),
        });
    }
    range
}

/// Sort rows by start date; rows without a range go last.
pub fn sort_by_start_date(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| {
        (a.start_date.is_none(), &a.start_date).cmp(&(b.start_date.is_none(), &b.start_date))
    });
}

/// Monday to Sunday of ISO week `week` in the current year, or of the week
/// containing `today` when no week is given.
pub fn week_range(week: Option<u32>, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), AppError> {
    let (year, week) = match week {
        Some(week) => (today.year(), week),
        None => (today.iso_week().year(), today.iso_week().week()),
    };

    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
        .ok_or_else(|| AppError::Validation(format!("Week {} does not exist in {}", week, year)))?;
    let sunday = NaiveDate::from_isoywd_opt(year, week, Weekday::Sun)
        .ok_or_else(|| AppError::Validation(format!("Week {} does not exist in {}", week, year)))?;

    Ok((monday, sunday))
}

/// Aggregated permit history, `approved` unless another status is given.
pub async fn permit_report(
    repo: &Repository,
    status: Option<RequestStatus>,
    sorted: bool,
) -> Result<Vec<ReportRow>, AppError> {
    let status = status.unwrap_or(RequestStatus::Approved);
    let records = repo.permit_history(Some(status)).await?;
    let mut rows: Vec<ReportRow> = aggregate(records, &PERMIT_REPORT_KEYS).collect();
    if sorted {
        sort_by_start_date(&mut rows);
    }
    Ok(rows)
}

/// Aggregated approved requests created during one week.
pub async fn weekly_report(
    repo: &Repository,
    week: Option<u32>,
    today: NaiveDate,
) -> Result<Vec<ReportRow>, AppError> {
    let (start, end) = week_range(week, today)?;
    let records = repo.weekly_history(start, end).await?;
    tracing::debug!(
        "Weekly report {}..{} over {} record(s)",
        start,
        end,
        records.len()
    );
    Ok(aggregate(records, &WEEKLY_REPORT_KEYS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{test_repository, user};
    use crate::lifecycle::validate_permit;
    use crate::models::{NewPermitRequest, RequestKind};
    use chrono::Utc;

    fn record(code: &str, novelty: &str, dates: &[&str]) -> HistoricalRecord {
        HistoricalRecord {
            kind: RequestKind::Permit,
            code: code.to_string(),
            name: format!("Employee {}", code),
            phone: "555-0101".to_string(),
            novelty_type: novelty.to_string(),
            description: "family matter".to_string(),
            response_text: "ok".to_string(),
            dates: dates.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_two_records_collapse_into_one_range() {
        let records = vec![
            record("E1", "personal", &["2024-01-01"]),
            record("E1", "personal", &["2024-01-03"]),
        ];

        let rows: Vec<ReportRow> = aggregate(records, &PERMIT_REPORT_KEYS).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(rows[0].end_date.as_deref(), Some("2024-01-03"));
    }

    #[test]
    fn test_malformed_date_only_affects_its_group() {
        let records = vec![
            record("E1", "personal", &["2024-01-01", "01/02/2024"]),
            record("E2", "personal", &["2024-02-10", "2024-02-08"]),
            record("E1", "personal", &["2024-01-05"]),
        ];

        let rows: Vec<ReportRow> = aggregate(records, &PERMIT_REPORT_KEYS).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "E1");
        assert!(rows[0].start_date.is_none());
        assert!(rows[0].end_date.is_none());
        assert_eq!(rows[1].start_date.as_deref(), Some("2024-02-08"));
        assert_eq!(rows[1].end_date.as_deref(), Some("2024-02-10"));
    }

    #[test]
    fn test_groups_keep_first_seen_order_and_exact_keys() {
        let records = vec![
            record("E2", "personal", &["2024-03-01"]),
            record("E1", "personal", &["2024-01-01"]),
            record("E1", "Personal", &["2024-01-02"]),
            record("E2", "personal", &["2024-02-01"]),
        ];

        let rows: Vec<ReportRow> = aggregate(records, &PERMIT_REPORT_KEYS).collect();

        let keys: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.code.as_str(), r.novelty_type.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("E2", "personal"), ("E1", "personal"), ("E1", "Personal")]
        );
        assert_eq!(rows[0].start_date.as_deref(), Some("2024-02-01"));
        assert_eq!(rows[0].end_date.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let records = vec![
            record("E1", "personal", &["2024-01-01"]),
            record("E2", "medical", &["bad"]),
            record("E1", "personal", &["2024-01-09"]),
        ];

        let first: Vec<ReportRow> = aggregate(records.clone(), &PERMIT_REPORT_KEYS).collect();
        let second: Vec<ReportRow> = aggregate(records, &PERMIT_REPORT_KEYS).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sort_by_start_date_puts_unranged_rows_last() {
        let mut rows: Vec<ReportRow> = aggregate(
            vec![
                record("E1", "personal", &["bad"]),
                record("E2", "personal", &["2024-05-01"]),
                record("E3", "personal", &["2024-04-01"]),
            ],
            &PERMIT_REPORT_KEYS,
        )
        .collect();

        sort_by_start_date(&mut rows);

        let codes: Vec<&str> = rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["E3", "E2", "E1"]);
    }

    #[test]
    fn test_week_range() {
        // 2024-06-05 is a Wednesday in ISO week 23
        let (start, end) = week_range(None, date("2024-06-05")).unwrap();
        assert_eq!(start, date("2024-06-03"));
        assert_eq!(end, date("2024-06-09"));

        let (start, end) = week_range(Some(1), date("2024-06-05")).unwrap();
        assert_eq!(start, date("2024-01-01"));
        assert_eq!(end, date("2024-01-07"));

        assert!(week_range(Some(0), date("2024-06-05")).is_err());
        assert!(week_range(Some(60), date("2024-06-05")).is_err());
    }

    #[tokio::test]
    async fn test_permit_report_defaults_to_approved() {
        let (repo, _dir) = test_repository().await;
        let ana = user("E1", "Ana");

        for dates in [["2024-01-01"], ["2024-01-03"], ["2024-01-09"]] {
            let permit = validate_permit(NewPermitRequest {
                phone: "555-0101".to_string(),
                dates: dates.iter().map(|d| d.to_string()).collect(),
                time: None,
                novelty_type: "personal".to_string(),
                description: "errand".to_string(),
            })
            .unwrap();
            let created = repo.insert_permit(&ana, &permit, &[]).await.unwrap();
            if dates[0] != "2024-01-09" {
                repo.decide(created.id, RequestStatus::Approved, Some("ok"))
                    .await
                    .unwrap();
            }
        }

        let approved = permit_report(&repo, None, true).await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(approved[0].end_date.as_deref(), Some("2024-01-03"));

        let pending = permit_report(&repo, Some(RequestStatus::Pending), false)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start_date.as_deref(), Some("2024-01-09"));
    }

    #[tokio::test]
    async fn test_pending_report_includes_legacy_status_values() {
        let (repo, _dir) = test_repository().await;
        let ana = user("E1", "Ana");

        let mut ids = Vec::new();
        for date in ["2024-01-09", "2024-01-11"] {
            let permit = validate_permit(NewPermitRequest {
                phone: "555-0101".to_string(),
                dates: vec![date.to_string()],
                time: None,
                novelty_type: "personal".to_string(),
                description: "errand".to_string(),
            })
            .unwrap();
            ids.push(repo.insert_permit(&ana, &permit, &[]).await.unwrap().id);
        }

        sqlx::query("UPDATE permit_requests SET status = 'pendiente' WHERE id = ?")
            .bind(ids[1])
            .execute(repo.pool())
            .await
            .unwrap();

        let pending = permit_report(&repo, Some(RequestStatus::Pending), false)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start_date.as_deref(), Some("2024-01-09"));
        assert_eq!(pending[0].end_date.as_deref(), Some("2024-01-11"));

        assert!(permit_report(&repo, Some(RequestStatus::Rejected), false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_weekly_report_covers_current_week() {
        let (repo, _dir) = test_repository().await;
        let permit = validate_permit(NewPermitRequest {
            phone: "555-0101".to_string(),
            dates: vec!["2024-06-05".to_string(), "2024-06-04".to_string()],
            time: None,
            novelty_type: "medical".to_string(),
            description: "surgery".to_string(),
        })
        .unwrap();
        let created = repo
            .insert_permit(&user("E1", "Ana"), &permit, &[])
            .await
            .unwrap();
        repo.decide(created.id, RequestStatus::Approved, None)
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        let rows = weekly_report(&repo, None, today).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, RequestKind::Permit);
        assert_eq!(rows[0].start_date.as_deref(), Some("2024-06-04"));
        assert_eq!(rows[0].end_date.as_deref(), Some("2024-06-05"));
    }
}
