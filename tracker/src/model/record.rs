use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Free-text status produced by the heuristic strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ApplicationStatus {
    Applied,
    #[strum(serialize = "Interview Scheduled")]
    InterviewScheduled,
    Shortlisted,
    Rejected,
    Unknown,
}

/// One normalized row, ready to be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedRecord {
    pub external_id: String,
    pub sender: String,
    pub subject: String,
    /// `confirmation`/`update`/`other` or an `ApplicationStatus`
    pub kind: String,
    pub company: String,
    pub role: String,
    pub event_date: Option<NaiveDate>,
    pub days_since: i32,
    pub raw_extraction: Value,
}
