// keepalive-service-rs/src/timefmt.rs
// Timestamps are local time with an explicit numeric UTC offset
// (YYYY-MM-DDTHH:mm:ss+HH:MM), so log lines and response bodies read in the
// host's wall-clock time while remaining machine-parseable.

use chrono::{DateTime, Local};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Current time in the offset-annotated format
pub fn timestamp_with_offset() -> String {
    format_with_offset(Local::now())
}

pub fn format_with_offset(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_round_trips_to_same_instant() {
        let emitted = timestamp_with_offset();
        let parsed = DateTime::parse_from_str(&emitted, TIMESTAMP_FORMAT)
            .expect("emitted timestamp parses with its own format");

        let delta = Utc::now().signed_duration_since(parsed.with_timezone(&Utc));
        assert!(delta.num_seconds().abs() <= 1, "delta was {}", delta);
    }

    #[test]
    fn test_shape() {
        let emitted = timestamp_with_offset();
        // YYYY-MM-DDTHH:MM:SS+HH:MM
        assert_eq!(emitted.len(), 25);
        assert_eq!(&emitted[10..11], "T");
        assert!(matches!(&emitted[19..20], "+" | "-"));
        assert_eq!(&emitted[22..23], ":");
    }
}
