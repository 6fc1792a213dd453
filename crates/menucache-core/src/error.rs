use chrono::NaiveDate;
use thiserror::Error;

/// A date could not be placed in a Sage cycle because it precedes the
/// cycle's anchor Sunday.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Date {date} is before cycle start {start}")]
pub struct DateRangeError {
    pub date: NaiveDate,
    pub start: NaiveDate,
}

/// A provider item was missing a required field or carried a value of the
/// wrong shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed menu item: field `{field}` {reason}")]
pub struct MalformedItemError {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedItemError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is missing".to_string(),
        }
    }

    pub fn invalid(field: &'static str, value: &serde_json::Value) -> Self {
        Self {
            field,
            reason: format!("has unexpected value {}", value),
        }
    }
}
