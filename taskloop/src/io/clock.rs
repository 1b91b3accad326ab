//! Wall-clock formatting used in task documents, audit lines and signals.

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Format used for every human-readable timestamp in the vault.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Current local time as `YYYY-MM-DD HH:MM:SS`.
pub fn timestamp() -> String {
    now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn today() -> NaiveDate {
    now().date()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_parses_back() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 19);
        assert!(parse_timestamp(&stamp).is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
