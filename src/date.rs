use std::fmt::{self, Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Format a time in the IMF-fixdate form used by the `Date` header.
///
/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub(crate) fn fmt_http_date(time: SystemTime) -> String {
    HttpDate::from(time).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HttpDate {
    year: i64,
    month: usize,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    week_day: usize,
}

impl From<SystemTime> for HttpDate {
    fn from(time: SystemTime) -> Self {
        // Times before the epoch are clamped.
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64;

        let days = secs.div_euclid(86_400);
        let secs_of_day = secs.rem_euclid(86_400);

        // Howard Hinnant's civil_from_days.
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);

        HttpDate {
            year,
            month: (month - 1) as usize,
            day: day as u8,
            hour: (secs_of_day / 3600) as u8,
            minute: (secs_of_day % 3600 / 60) as u8,
            second: (secs_of_day % 60) as u8,
            week_day: (days + 4).rem_euclid(7) as usize,
        }
    }
}

impl Display for HttpDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
            DAYS[self.week_day],
            self.day,
            MONTHS[self.month],
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rfc_example() {
        let time = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(fmt_http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn leap_day() {
        // 2020-02-29T23:59:59Z
        let time = UNIX_EPOCH + Duration::from_secs(1_583_020_799);
        assert_eq!(fmt_http_date(time), "Sat, 29 Feb 2020 23:59:59 GMT");
    }

    #[test]
    fn epoch() {
        assert_eq!(fmt_http_date(UNIX_EPOCH), "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
