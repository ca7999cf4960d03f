//! Reporting models: raw history records in, grouped rows out.

use serde::{Deserialize, Serialize};

use super::RequestKind;

/// One raw record fed to the aggregator.
///
/// `dates` holds the unparsed date strings of the record; a permit carries
/// its requested dates, an equipment request its creation date.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRecord {
    pub kind: RequestKind,
    pub code: String,
    pub name: String,
    pub phone: String,
    pub novelty_type: String,
    pub description: String,
    pub response_text: String,
    pub dates: Vec<String>,
}

/// Fields a report can be grouped by. Matching is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKeyField {
    Kind,
    Code,
    Name,
    Phone,
    NoveltyType,
    Description,
    ResponseText,
}

/// One grouped reporting row.
///
/// `start_date`/`end_date` are `None` when any date in the group failed to parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub kind: RequestKind,
    pub code: String,
    pub name: String,
    pub phone: String,
    pub novelty_type: String,
    pub description: String,
    pub response_text: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}
