use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Asia::Tokyo;
use chrono_tz::Tz;

/// Canonical timezone for batch target dates and disclosure timestamps.
///
/// EDINET publishes per JST calendar day; keeping the zone in one place avoids
/// scattering `Asia/Tokyo` literals across queries and date math.
pub const JST: Tz = Tokyo;

pub fn jst_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&JST)
}

pub fn jst_today() -> NaiveDate {
    jst_now().date_naive()
}

/// Convert a JST wall-clock instant back to UTC for storage columns.
pub fn to_utc(jst: DateTime<Tz>) -> DateTime<Utc> {
    jst.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn jst_is_nine_hours_ahead_of_utc() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 15, 20, 0, 0).unwrap();
        let jst = utc.with_timezone(&JST);
        assert_eq!(jst.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 16).unwrap());
    }

    #[test]
    fn round_trips_through_utc() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let jst = utc.with_timezone(&JST);
        assert_eq!(to_utc(jst), utc);
    }
}
