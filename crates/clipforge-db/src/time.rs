//! Timestamp encoding.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that
//! lexicographic comparison in SQL matches chronological order across both
//! backing drivers.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn encode(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(encode)
}

pub fn decode(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

pub fn decode_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoding_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 10, 2, 3, 4, 5).unwrap();
        assert!(encode(early) < encode(late));
    }

    #[test]
    fn round_trip() {
        let now = Utc::now();
        let decoded = decode(&encode(now));
        assert_eq!(decoded.timestamp_micros(), now.timestamp_micros());
    }
}
