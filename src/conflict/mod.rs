//! Duplicate date detection for permit requests.
//!
//! Only dates inside the active review window are checked. The window runs
//! from the most recent Wednesday at or before today up to, but excluding,
//! the next Wednesday.
//!
//! The check is advisory: submitting a permit does not call it and nothing
//! locks the dates in between, so two concurrent submissions can still
//! claim the same day.

use chrono::{Datelike, Days, NaiveDate};

use crate::db::Repository;
use crate::errors::AppError;
use crate::lifecycle::{parse_calendar_date, parse_date_set, split_stored_dates};

const WINDOW_DAYS: u64 = 7;

/// Seven-day window anchored on a Wednesday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewWindow {
    /// First day, always a Wednesday
    pub start: NaiveDate,
    /// Exclusive end, the following Wednesday
    pub end: NaiveDate,
}

impl ReviewWindow {
    /// The window that contains `today`.
    pub fn containing(today: NaiveDate) -> Self {
        // Monday = 0, so Wednesday = 2
        let back = (today.weekday().num_days_from_monday() + 7 - 2) % 7;
        let start = today - Days::new(u64::from(back));
        Self {
            start,
            end: start + Days::new(WINDOW_DAYS),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Parse `candidates` and keep the ones inside the window. A malformed
    /// candidate fails the whole call.
    pub fn filter(&self, candidates: &[String]) -> Result<Vec<NaiveDate>, AppError> {
        let dates = parse_date_set(candidates)?;
        Ok(dates.into_iter().filter(|d| self.contains(*d)).collect())
    }
}

/// Whether `requester_code` already holds a non-rejected permit for any of
/// `candidates` that falls inside the window around `today`.
pub async fn has_conflict(
    repo: &Repository,
    requester_code: &str,
    candidates: &[String],
    today: NaiveDate,
) -> Result<bool, AppError> {
    let window = ReviewWindow::containing(today);
    let in_window = window.filter(candidates)?;

    if in_window.is_empty() {
        return Ok(false);
    }

    for stored in repo.active_permit_dates(requester_code).await? {
        let clash = split_stored_dates(&stored)
            .iter()
            .filter_map(|raw| match parse_calendar_date(raw) {
                Ok(date) => Some(date),
                Err(_) => {
                    tracing::warn!(
                        "Skipping malformed stored date '{}' for {}",
                        raw,
                        requester_code
                    );
                    None
                }
            })
            .any(|date| in_window.contains(&date));

        if clash {
            tracing::debug!(
                "Date conflict for {} in window starting {}",
                requester_code,
                window.start
            );
            return Ok(true);
        }
    }

    Ok(false)
}
