//! Filesystem-safe names and the human-readable capture timestamp.

use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// Punctuation kept as-is by [`safe_filename`]; everything else non-alphanumeric becomes `_`.
const ALLOWED_PUNCTUATION: &[char] = &['-', '_', '.', '(', ')'];

const MONTH_ABBR: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sept", "Oct", "Nov", "Dec",
];

/// Replace every character that is neither alphanumeric nor allow-listed punctuation with `_`.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Format like `7 Sept, 7:00 am`.
pub fn pretty_timestamp<Tz: TimeZone>(dt: &DateTime<Tz>) -> String {
    let (pm, hour) = dt.hour12();
    format!(
        "{} {}, {}:{:02} {}",
        dt.day(),
        MONTH_ABBR[dt.month0() as usize],
        hour,
        dt.minute(),
        if pm { "pm" } else { "am" }
    )
}

/// `<name>_<seat>_<sanitized pretty timestamp>.jpg` for already-sanitized name and seat.
pub fn capture_file_name<Tz: TimeZone>(name: &str, seat: &str, at: &DateTime<Tz>) -> String {
    format!("{name}_{seat}_{}.jpg", safe_filename(&pretty_timestamp(at)))
}
