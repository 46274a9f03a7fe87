//! Wall-clock helpers. Rows store timestamps as `YYYY-MM-DD HH:MM:SS` (UTC).

use chrono::{DateTime, NaiveDateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn format_timestamp(secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(epoch_secs())
}

pub fn parse_timestamp(text: &str) -> Option<u64> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|dt| u64::try_from(dt.and_utc().timestamp()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_parse_roundtrip() {
        let now = epoch_secs();
        assert_eq!(parse_timestamp(&format_timestamp(now)), Some(now));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
