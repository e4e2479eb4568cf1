//! RFC 1123 date formatting.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::time::SystemTime;

// Fixed English abbreviations: HTTP dates must not vary with the locale.
const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Format a time as RFC 1123, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
///
/// `when` of `None` means the current time.
pub fn date_rfc1123(when: Option<SystemTime>) -> String {
    let t: DateTime<Utc> = when.unwrap_or_else(SystemTime::now).into();
    format!(
        "{}, {:02} {} {:4} {:02}:{:02}:{:02} GMT",
        DAYS[t.weekday().num_days_from_sunday() as usize],
        t.day(),
        MONTHS[t.month0() as usize],
        t.year(),
        t.hour(),
        t.minute(),
        t.second()
    )
}
