//! HTTP date parsing/formatting (spec.md §6 "HTTP date format"). Grounded on
//! `examples/original_source/nsd/httptime.c`: the parser accepts three
//! historical formats, the formatter only ever emits RFC 1123.

use chrono::{DateTime, NaiveDateTime, Utc};

const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y GMT";

/// Parses an HTTP date in any of RFC 1123, RFC 850, or asctime form, returning
/// seconds since the Unix epoch.
pub fn parse(s: &str) -> Option<i64> {
    let s = s.trim();
    for fmt in [RFC1123, RFC850, ASCTIME] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp());
        }
    }
    None
}

/// Formats seconds since the Unix epoch as an RFC 1123 HTTP date.
pub fn format(epoch_seconds: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    dt.format(RFC1123).to_string()
}

/// `true` when `if_modified_since` (a raw header value) covers `mtime`, i.e.
/// the client's cached copy is still fresh and a 304 should be returned.
pub fn covers(if_modified_since: &str, mtime: i64) -> bool {
    match parse(if_modified_since) {
        Some(since) => since >= mtime,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1123_round_trips() {
        let s = "Thu, 10 Jan 1993 01:29:59 GMT";
        let t = parse(s).expect("parses");
        assert_eq!(t, 726_629_399);
        assert_eq!(format(t), s);
    }

    #[test]
    fn rfc850_and_asctime_parse_to_the_same_instant() {
        let rfc850 = "Thursday, 10-Jan-93 01:29:59 GMT";
        let asctime = "Thu Jan 10 01:29:59 1993 GMT";
        assert_eq!(parse(rfc850), parse(asctime));
        assert_eq!(parse(rfc850), Some(726_629_399));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(parse("not a date"), None);
    }

    #[test]
    fn covers_checks_freshness() {
        assert!(covers("Thu, 10 Jan 1993 01:29:59 GMT", 726_629_399));
        assert!(covers("Thu, 10 Jan 1993 02:00:00 GMT", 726_629_399));
        assert!(!covers("Thu, 10 Jan 1993 00:00:00 GMT", 726_629_399));
    }
}
