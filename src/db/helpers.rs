use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::models::Source;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("failed to parse {field} '{value}': {err}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_source(value: &str) -> Result<Source> {
    match value {
        "user" => Ok(Source::User),
        "system" => Ok(Source::System),
        "evidence" => Ok(Source::Evidence),
        "derived" => Ok(Source::Derived),
        "user_input" => Ok(Source::UserInput),
        "actual_adjust" => Ok(Source::ActualAdjust),
        other => Err(anyhow!("unknown event source '{other}'")),
    }
}

/// True when a query failed because the expected table has not been
/// created yet. Readers treat that the same as an empty table so a fresh
/// database behaves like one with no history.
pub fn is_missing_schema(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_datetimes() {
        let dt = parse_datetime("2024-03-04T09:00:00+00:00", "start_time").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-04T09:00:00+00:00");
        assert!(parse_datetime("not a date", "start_time").is_err());
    }

    #[test]
    fn parses_sources_round_trip() {
        for source in [
            Source::User,
            Source::System,
            Source::Evidence,
            Source::Derived,
            Source::UserInput,
            Source::ActualAdjust,
        ] {
            assert_eq!(parse_source(source.as_str()).unwrap(), source);
        }
        assert!(parse_source("nonsense").is_err());
    }
}
