//! Go-compatible duration-string parsing.
//!
//! The sign-in record's `validityPeriod` and the capability rule's `period`
//! are both duration strings in Go's `time.ParseDuration` syntax (`"10m"`,
//! `"1h30m"`, `"9m59s"`), not ISO-8601 — the source this spec was distilled
//! from is a Go program and clients embed Go-formatted strings. We parse
//! them with the same grammar via `go-parse-duration` rather than
//! `humantime`, whose grammar differs at the edges (no implicit minutes,
//! different unit suffixes).

use chrono::Duration;

/// Minimum accepted `validityPeriod` for a sign-in record (spec.md §3).
pub const MIN_VALIDITY: Duration = Duration::minutes(10);

#[derive(Debug, thiserror::Error)]
pub enum DurationParseError {
    #[error("invalid duration string {raw:?}: {source:?}")]
    Malformed {
        raw: String,
        source: go_parse_duration::Error,
    },
}

/// Parse a Go-syntax duration string into a [`chrono::Duration`].
pub fn parse(raw: &str) -> Result<Duration, DurationParseError> {
    let nanos =
        go_parse_duration::parse_duration(raw).map_err(|source| DurationParseError::Malformed {
            raw: raw.to_string(),
            source,
        })?;
    Ok(Duration::nanoseconds(nanos))
}

/// Parse and enforce the minimum validity period in one step, used by the
/// sign-in record store's `upsert` (4.C).
pub fn parse_validity_period(raw: &str) -> Result<Duration, String> {
    let parsed = parse(raw).map_err(|e| e.to_string())?;
    if parsed < MIN_VALIDITY {
        return Err(format!(
            "validity period {raw:?} is below the minimum of {} minutes",
            MIN_VALIDITY.num_minutes()
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_minutes_is_accepted() {
        assert!(parse_validity_period("10m").is_ok());
    }

    #[test]
    fn nine_minutes_fifty_nine_seconds_is_rejected() {
        assert!(parse_validity_period("9m59s").is_err());
    }

    #[test]
    fn fifteen_minutes_parses_to_expected_duration() {
        let d = parse("15m").unwrap();
        assert_eq!(d, Duration::minutes(15));
    }

    #[test]
    fn malformed_duration_is_rejected() {
        assert!(parse("not-a-duration").is_err());
    }

    #[test]
    fn compound_duration_parses() {
        let d = parse("1h30m").unwrap();
        assert_eq!(d, Duration::minutes(90));
    }
}
