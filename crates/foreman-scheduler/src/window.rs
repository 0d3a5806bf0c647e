//! Pure window calculations.
//!
//! A schedule's window recurs on every day whose bit is set in
//! `days_of_week`, starting at `start_time` UTC and lasting
//! `duration_minutes`. The start instant is inside the window, the end
//! instant is not. A window that crosses midnight is attributed to the day
//! it *starts* on: Wednesday 23:30 + 90min is a Wednesday window even
//! though it ends Thursday 01:00.

use chrono::{DateTime, Datelike, Duration, Utc};
use foreman_store::Schedule;

/// Whether `now` falls inside the schedule's recurring window.
pub fn is_active(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let window_start = now.date_naive().and_time(schedule.start_time).and_utc();
    let window_end = window_start + Duration::minutes(i64::from(schedule.duration_minutes));

    if schedule.crosses_midnight() {
        // Tail end of a window that started today.
        if schedule.days_of_week.contains(now.weekday()) && now >= window_start {
            return true;
        }
        // Head of a window that started yesterday: shift yesterday's
        // window forward a day and test against it.
        if schedule.days_of_week.contains(now.weekday().pred()) {
            let start = window_start - Duration::days(1);
            let end = window_end - Duration::days(1);
            if start <= now && now < end {
                return true;
            }
        }
        false
    } else {
        schedule.days_of_week.contains(now.weekday()) && window_start <= now && now < window_end
    }
}

/// The instant the window containing (or most recently preceding) `now`
/// ends. Used to pick the expiry for manual overrides.
pub fn current_window_end(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut window_start = now.date_naive().and_time(schedule.start_time).and_utc();
    if now < window_start {
        // The active window started yesterday.
        window_start -= Duration::days(1);
    }
    window_start + Duration::minutes(i64::from(schedule.duration_minutes))
}
