//! TTL and timestamp arithmetic shared by the aggregator and the
//! reconciliation loop. TTL literals use the `"2h"` / `"30m"` form and stay
//! unparsed until they are needed.

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DurationError {
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid TTL duration {0:?}")]
    InvalidTtl(String),
}

/// Parse an RFC 3339 timestamp (fractional seconds and numeric or `Z`
/// offsets accepted). Empty or date-only input is rejected.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DurationError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DurationError::InvalidTimestamp(text.to_string()))
}

/// Age of an entity created at `creation`. Negative when the creation
/// timestamp lies in the future; callers decide whether to clamp.
pub fn entity_age(creation: DateTime<Utc>) -> chrono::Duration {
    Utc::now() - creation
}

/// Parse a TTL literal of the `"2h"` form.
pub fn parse_ttl(text: &str) -> Result<Duration, DurationError> {
    humantime::parse_duration(text)
        .map_err(|_| DurationError::InvalidTtl(text.to_string()))
}

/// Remaining lifetime: `max(0, ttl * factor - age)`.
pub fn remaining_duration(
    creation: DateTime<Utc>,
    ttl_text: &str,
    factor: f64,
) -> Result<Duration, DurationError> {
    let ttl = parse_ttl(ttl_text)?;
    let budget_secs = ttl.as_secs_f64() * factor;
    let age_secs = entity_age(creation).num_milliseconds() as f64 / 1000.0;
    let left = budget_secs - age_secs;
    if !left.is_finite() || left <= 0.0 {
        Ok(Duration::ZERO)
    } else {
        Ok(Duration::from_secs_f64(left))
    }
}

/// The chronologically later of two timestamps; ties return the first.
pub fn later_of(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    if b > a { b } else { a }
}

/// Return the literal text of whichever duration parses larger. Ties keep
/// the first argument. Either side failing to parse is an error.
pub fn greater_duration(
    a_text: &str,
    b_text: &str,
) -> Result<String, DurationError> {
    let a = parse_ttl(a_text)?;
    let b = parse_ttl(b_text)?;
    if b > a {
        Ok(b_text.to_string())
    } else {
        Ok(a_text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: Duration = Duration::from_secs(1);

    fn close_to(actual: Duration, expected: Duration) -> bool {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        diff <= TOLERANCE
    }

    #[test]
    fn remaining_positive_ttl() {
        let creation = Utc::now() - chrono::Duration::hours(1);
        let d = remaining_duration(creation, "2h", 1.0).unwrap();
        assert!(close_to(d, Duration::from_secs(3600)), "got {d:?}");
    }

    #[test]
    fn remaining_clamps_to_zero_when_expired() {
        let creation = Utc::now() - chrono::Duration::hours(3);
        let d = remaining_duration(creation, "2h", 1.0).unwrap();
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn remaining_with_factor_greater_than_one() {
        let creation = Utc::now() - chrono::Duration::hours(1);
        let d = remaining_duration(creation, "1h", 2.0).unwrap();
        assert!(close_to(d, Duration::from_secs(3600)), "got {d:?}");
    }

    #[test]
    fn remaining_with_factor_less_than_one() {
        let creation = Utc::now() - chrono::Duration::minutes(30);
        let d = remaining_duration(creation, "2h", 0.5).unwrap();
        assert!(close_to(d, Duration::from_secs(1800)), "got {d:?}");
    }

    #[test]
    fn remaining_rejects_invalid_ttl() {
        let err = remaining_duration(Utc::now(), "invalid", 1.0).unwrap_err();
        assert!(matches!(err, DurationError::InvalidTtl(_)));
    }

    #[test]
    fn age_of_fresh_entity_is_near_zero() {
        let age = entity_age(Utc::now());
        assert!(age.num_seconds().abs() <= 1, "got {age}");
    }

    #[test]
    fn age_one_hour_ago() {
        let age = entity_age(Utc::now() - chrono::Duration::hours(1));
        assert!((age.num_seconds() - 3600).abs() <= 1, "got {age}");
    }

    #[test]
    fn age_is_negative_for_future_creation() {
        let age = entity_age(Utc::now() + chrono::Duration::minutes(10));
        assert!(age < chrono::Duration::zero(), "got {age}");
    }

    #[test]
    fn parse_timestamp_table() {
        let cases = [
            ("2023-11-25T14:04:31Z", true),
            ("2023-11-25T17:04:31+03:00", true),
            ("2023-11-25T14:04:31.123Z", true),
            ("2023-11-25T14:04:31.123456789+00:00", true),
            ("2023-11-25", false),
            ("", false),
            ("not-a-date", false),
        ];
        for (input, ok) in cases {
            assert_eq!(parse_timestamp(input).is_ok(), ok, "input {input:?}");
        }
    }

    #[test]
    fn later_of_picks_maximum() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(1);
        assert_eq!(later_of(later, now), later);
        assert_eq!(later_of(now, later), later);
        assert_eq!(later_of(now, now), now);
    }

    #[test]
    fn greater_duration_table() {
        assert_eq!(greater_duration("2h", "1h").unwrap(), "2h");
        assert_eq!(greater_duration("30m", "1h").unwrap(), "1h");
        assert_eq!(greater_duration("45m", "45m").unwrap(), "45m");
        assert!(greater_duration("bad", "1h").is_err());
        assert!(greater_duration("1h", "bad").is_err());
        assert!(greater_duration("bad", "bad").is_err());
    }
}
