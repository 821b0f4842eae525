use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TargetDateError {
    #[error("future batch dates are rejected: {0}")]
    FutureDate(NaiveDate),
    #[error("unknown auto date mode: {0}")]
    UnknownMode(String),
}

/// 自動日付決定のモード。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoDateMode {
    /// 時刻帯でターゲットを切り替える（既定）
    TimeBased,
    YesterdayOnly,
    TodayOnly,
}

impl AutoDateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoDateMode::TimeBased => "time_based",
            AutoDateMode::YesterdayOnly => "yesterday_only",
            AutoDateMode::TodayOnly => "today_only",
        }
    }
}

impl FromStr for AutoDateMode {
    type Err = TargetDateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "time_based" => Ok(AutoDateMode::TimeBased),
            "yesterday_only" => Ok(AutoDateMode::YesterdayOnly),
            "today_only" => Ok(AutoDateMode::TodayOnly),
            other => Err(TargetDateError::UnknownMode(other.to_string())),
        }
    }
}

/// バッチ対象日の指定方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelection {
    Explicit(NaiveDate),
    Today,
    Yesterday,
    Auto,
}

const STALE_WARNING_DAYS: i64 = 30;

/// JST 現在時刻からバッチ対象日を決める。
///
/// 明示指定: 未来日は拒否、30日より前は警告のみ。
/// 自動 (time_based): 夜間バッチ時刻以降または 00:00〜06:00 は前日、
/// 06:00〜夜間バッチ時刻は前々日。
pub fn resolve_target_date(
    now_jst: DateTime<Tz>,
    selection: DateSelection,
    mode: AutoDateMode,
    night_batch_time: NaiveTime,
) -> Result<NaiveDate, TargetDateError> {
    let today = now_jst.date_naive();

    let target = match selection {
        DateSelection::Explicit(date) => {
            if date > today {
                return Err(TargetDateError::FutureDate(date));
            }
            if today - date > Duration::days(STALE_WARNING_DAYS) {
                warn!(
                    date = %date,
                    days_ago = (today - date).num_days(),
                    "batch target date is more than 30 days in the past"
                );
            }
            date
        }
        DateSelection::Today => today,
        DateSelection::Yesterday => today - Duration::days(1),
        DateSelection::Auto => match mode {
            AutoDateMode::TodayOnly => today,
            AutoDateMode::YesterdayOnly => today - Duration::days(1),
            AutoDateMode::TimeBased => {
                let time = now_jst.time();
                let six_am = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
                if time >= night_batch_time || time < six_am {
                    today - Duration::days(1)
                } else if time < night_batch_time {
                    today - Duration::days(2)
                } else {
                    today - Duration::days(1)
                }
            }
        },
    };

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::JST;
    use chrono::TimeZone;

    fn jst(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Tz> {
        JST.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
    }

    fn night() -> NaiveTime {
        NaiveTime::from_hms_opt(23, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn time_based_after_night_threshold_targets_yesterday() {
        let resolved = resolve_target_date(
            jst(2024, 5, 15, 23, 30),
            DateSelection::Auto,
            AutoDateMode::TimeBased,
            night(),
        )
        .unwrap();
        assert_eq!(resolved, date(2024, 5, 14));
    }

    #[test]
    fn time_based_early_morning_targets_yesterday() {
        let resolved = resolve_target_date(
            jst(2024, 5, 15, 2, 0),
            DateSelection::Auto,
            AutoDateMode::TimeBased,
            night(),
        )
        .unwrap();
        assert_eq!(resolved, date(2024, 5, 14));
    }

    #[test]
    fn time_based_daytime_targets_day_before_yesterday() {
        let resolved = resolve_target_date(
            jst(2024, 5, 15, 10, 0),
            DateSelection::Auto,
            AutoDateMode::TimeBased,
            night(),
        )
        .unwrap();
        assert_eq!(resolved, date(2024, 5, 13));
    }

    #[test]
    fn fixed_modes_ignore_the_clock() {
        let now = jst(2024, 5, 15, 10, 0);
        assert_eq!(
            resolve_target_date(now, DateSelection::Auto, AutoDateMode::TodayOnly, night())
                .unwrap(),
            date(2024, 5, 15)
        );
        assert_eq!(
            resolve_target_date(
                now,
                DateSelection::Auto,
                AutoDateMode::YesterdayOnly,
                night()
            )
            .unwrap(),
            date(2024, 5, 14)
        );
    }

    #[test]
    fn explicit_future_date_is_rejected() {
        let result = resolve_target_date(
            jst(2024, 5, 15, 10, 0),
            DateSelection::Explicit(date(2024, 5, 16)),
            AutoDateMode::TimeBased,
            night(),
        );
        assert!(matches!(result, Err(TargetDateError::FutureDate(_))));
    }

    #[test]
    fn explicit_sunday_still_runs() {
        // 2024-05-12 は日曜。週末スキップはしない。
        let resolved = resolve_target_date(
            jst(2024, 5, 15, 10, 0),
            DateSelection::Explicit(date(2024, 5, 12)),
            AutoDateMode::TimeBased,
            night(),
        )
        .unwrap();
        assert_eq!(resolved, date(2024, 5, 12));
    }

    #[test]
    fn explicit_old_date_is_allowed_with_warning() {
        let resolved = resolve_target_date(
            jst(2024, 5, 15, 10, 0),
            DateSelection::Explicit(date(2024, 1, 1)),
            AutoDateMode::TimeBased,
            night(),
        )
        .unwrap();
        assert_eq!(resolved, date(2024, 1, 1));
    }

    #[test]
    fn mode_parses_from_cli_strings() {
        assert_eq!(
            "time_based".parse::<AutoDateMode>().unwrap(),
            AutoDateMode::TimeBased
        );
        assert!("nonsense".parse::<AutoDateMode>().is_err());
    }
}
