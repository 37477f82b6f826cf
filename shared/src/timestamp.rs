//! ISO-8601 timestamp helpers shared by the repository and its readers.
//!
//! Every log entry on a [`crate::TaskRecord`](crate::model::TaskRecord) is
//! stored as `"{iso8601},{message}"`. This module is the single place that
//! knows how to build and split that format, so the repository and any
//! operator tooling agree on it.

use chrono::{DateTime, Utc};

/// Returns the current instant in UTC, the clock used for every timestamp in
/// the system (`created_at`, `updated_at`, log entries).
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Builds a log entry of the form `"{iso8601 timestamp},{message}"`.
pub fn log_entry(message: &str) -> String {
    format!("{},{message}", now().to_rfc3339())
}

/// Splits a stored log entry back into its timestamp and message.
///
/// Returns `None` if `entry` has no comma or the prefix does not parse as a
/// valid RFC 3339 timestamp.
pub fn split_log_entry(entry: &str) -> Option<(DateTime<Utc>, &str)> {
    let (prefix, message) = entry.split_once(',')?;
    let timestamp = DateTime::parse_from_rfc3339(prefix).ok()?.with_timezone(&Utc);
    Some((timestamp, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_round_trips() {
        let entry = log_entry("Dispatching to scheduler");
        let (_, message) = split_log_entry(&entry).expect("entry should parse");
        assert_eq!(message, "Dispatching to scheduler");
    }

    #[test]
    fn split_log_entry_rejects_missing_comma() {
        assert!(split_log_entry("no comma here").is_none());
    }

    #[test]
    fn split_log_entry_rejects_bad_timestamp() {
        assert!(split_log_entry("not-a-timestamp,message").is_none());
    }
}
