//! XML Schema `dateTime` and `duration` lexical forms used by metadata
//! `validUntil` and `cacheDuration` attributes.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::DocumentError;

const SECS_PER_DAY: f64 = 86_400.0;

/// Parses an `xs:dateTime`. Values without a timezone are taken as UTC.
pub fn parse_date_time(value: &str) -> Result<DateTime<Utc>, DocumentError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| DocumentError::InvalidDateTime(value.to_string()))
}

/// Parses an `xs:duration` such as `PT6H` or `P1DT12H30M`.
///
/// Years count as 365 days and months as 30 days. Negative durations are
/// rejected since a cache duration cannot be negative.
pub fn parse_duration(value: &str) -> Result<Duration, DocumentError> {
    let invalid = || DocumentError::InvalidDuration(value.to_string());
    let trimmed = value.trim();

    if trimmed.starts_with('-') {
        return Err(invalid());
    }
    let rest = trimmed.strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((_, "")) => return Err(invalid()),
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let date_units = [
        ('Y', 365.0 * SECS_PER_DAY),
        ('M', 30.0 * SECS_PER_DAY),
        ('D', SECS_PER_DAY),
    ];
    let time_units = [('H', 3600.0), ('M', 60.0), ('S', 1.0)];

    let mut seconds = sum_components(date_part, &date_units).ok_or_else(invalid)?;
    if let Some(time) = time_part {
        seconds += sum_components(time, &time_units).ok_or_else(invalid)?;
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

/// Sums `<number><designator>` pairs, requiring designators in the given order.
fn sum_components(part: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut next_unit = 0;

    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let position = units[next_unit..].iter().position(|(designator, _)| *designator == ch)?;
        let (_, scale) = units[next_unit + position];
        if number.is_empty() {
            return None;
        }
        total += number.parse::<f64>().ok()? * scale;
        number.clear();
        next_unit += position + 1;
    }

    number.is_empty().then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_duration("PT6H").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("P1D").unwrap(), Duration::from_secs(86_400));
        assert_eq!(
            parse_duration("P1DT12H30M").unwrap(),
            Duration::from_secs(86_400 + 12 * 3600 + 30 * 60)
        );
        assert_eq!(parse_duration("PT0.5S").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_malformed_durations() {
        for bad in ["", "P", "PT", "6H", "-PT1H", "PT1H2H", "P1H", "PTH"] {
            assert!(parse_duration(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn parses_date_times() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_date_time("2030-01-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_date_time("2030-01-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_date_time("2030-01-01T01:00:00+01:00").unwrap(), expected);
        assert!(parse_date_time("next tuesday").is_err());
    }
}
