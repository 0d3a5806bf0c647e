//! Core types for schedules, overrides, and projects.

use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// Minutes in a day.
const MINUTES_PER_DAY: u32 = 24 * 60;

/// A 7-bit day-of-week mask: bit 0 = Monday ... bit 6 = Sunday.
///
/// Values above 127 are rejected at construction and deserialization,
/// so a `DayMask` in hand is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayMask(u8);

impl DayMask {
    /// All seven days set.
    pub const EVERY_DAY: DayMask = DayMask(0x7f);

    /// Construct a mask, rejecting values with bits above the 7th.
    pub fn new(bits: u8) -> Result<Self, StoreError> {
        if bits > 0x7f {
            return Err(StoreError::InvalidSchedule(format!(
                "day mask {bits} out of range (0..=127)"
            )));
        }
        Ok(DayMask(bits))
    }

    /// Raw bit pattern.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether the given weekday's bit is set.
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    /// Rotate the mask forward by one day: the bit for day `d` moves to
    /// day `d + 1`, Sunday wraps to Monday. Used for the stop trigger of a
    /// midnight-crossing window, which fires on the following calendar day.
    pub fn shift_forward(self) -> DayMask {
        DayMask(((self.0 << 1) | (self.0 >> 6)) & 0x7f)
    }

    /// True when no day is set (the schedule never fires).
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for DayMask {
    type Error = StoreError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        DayMask::new(bits)
    }
}

impl From<DayMask> for u8 {
    fn from(mask: DayMask) -> u8 {
        mask.0
    }
}

/// Serde codec for `HH:MM` start times (UTC, minute precision).
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT)
            .map_err(|e| D::Error::custom(format!("invalid start time '{s}': {e}")))
    }
}

/// A recurring automation rule: run the project's agent every day in
/// `days_of_week`, from `start_time` (UTC) for `duration_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Stable identifier.
    pub id: Uuid,
    /// Project this schedule belongs to.
    pub project_name: String,
    /// Window start, UTC, minute precision (`HH:MM`).
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Window length in minutes (> 0).
    pub duration_minutes: u32,
    /// Days the window recurs on.
    pub days_of_week: DayMask,
    /// Disabled schedules register no triggers.
    pub enabled: bool,
    /// Passed through to the agent process on start.
    pub yolo_mode: bool,
    /// Optional model override, passed through on start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Worker concurrency, passed through on start (>= 1).
    pub max_concurrency: u32,
    /// Consecutive crashes inside the current window. Reset to 0 at the
    /// start of every successfully activated window.
    #[serde(default)]
    pub crash_count: u32,
    /// When this schedule was created.
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Validate invariants that the type system can't enforce.
    ///
    /// Called at the creation boundary (`upsert`, config load) so malformed
    /// schedules never reach the trigger engine.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.project_name.is_empty() {
            return Err(StoreError::InvalidSchedule(
                "project name must not be empty".to_string(),
            ));
        }
        if self.duration_minutes == 0 {
            return Err(StoreError::InvalidSchedule(format!(
                "schedule {} has non-positive duration",
                self.id
            )));
        }
        if self.max_concurrency == 0 {
            return Err(StoreError::InvalidSchedule(format!(
                "schedule {} has zero max concurrency",
                self.id
            )));
        }
        Ok(())
    }

    /// Minute-of-day of the window start.
    pub fn start_minute(&self) -> u32 {
        use chrono::Timelike;
        self.start_time.hour() * 60 + self.start_time.minute()
    }

    /// Whether the window ends on a later calendar day than it starts.
    pub fn crosses_midnight(&self) -> bool {
        self.start_minute() + self.duration_minutes >= MINUTES_PER_DAY
    }

    /// Wall-clock time at which the window ends (wraps past midnight).
    pub fn end_time(&self) -> NaiveTime {
        let end = (self.start_minute() + self.duration_minutes) % MINUTES_PER_DAY;
        NaiveTime::from_hms_opt(end / 60, end % 60, 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Day mask for the stop trigger: shifted forward by one day when the
    /// window crosses midnight, since the stop fires on the following day.
    pub fn stop_days(&self) -> DayMask {
        if self.crosses_midnight() {
            self.days_of_week.shift_forward()
        } else {
            self.days_of_week
        }
    }
}

/// Which automatic action a manual override suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Manual start: suppresses the next automatic stop.
    Start,
    /// Manual stop: suppresses the next automatic start.
    Stop,
}

impl std::fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideKind::Start => write!(f, "start"),
            OverrideKind::Stop => write!(f, "stop"),
        }
    }
}

/// A temporary manual instruction recorded when a human starts or stops a
/// project while a schedule window is active. At most one unexpired
/// override of a given kind exists per schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    pub id: Uuid,
    /// Owning schedule.
    pub schedule_id: Uuid,
    pub kind: OverrideKind,
    /// The override lapses at this instant (end of the current window).
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Override {
    /// Whether the override has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A registered project: a name plus the working directory its agent
/// runs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn schedule(start: &str, duration: u32, days: u8) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            project_name: "demo".to_string(),
            start_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            duration_minutes: duration,
            days_of_week: DayMask::new(days).unwrap(),
            enabled: true,
            yolo_mode: false,
            model: None,
            max_concurrency: 2,
            crash_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn day_mask_rejects_out_of_range() {
        assert!(DayMask::new(0x80).is_err());
        assert!(DayMask::new(0xff).is_err());
        assert!(DayMask::new(0x7f).is_ok());
        assert!(DayMask::new(0).is_ok());
    }

    #[test]
    fn day_mask_contains_maps_bits_to_weekdays() {
        let monday_only = DayMask::new(0b0000001).unwrap();
        assert!(monday_only.contains(Weekday::Mon));
        assert!(!monday_only.contains(Weekday::Tue));
        assert!(!monday_only.contains(Weekday::Sun));

        let sunday_only = DayMask::new(0b1000000).unwrap();
        assert!(sunday_only.contains(Weekday::Sun));
        assert!(!sunday_only.contains(Weekday::Mon));
    }

    #[test]
    fn shift_forward_wraps_sunday_to_monday() {
        let sunday = DayMask::new(0b1000000).unwrap();
        assert_eq!(sunday.shift_forward().bits(), 0b0000001);

        let wednesday = DayMask::new(0b0000100).unwrap();
        assert_eq!(wednesday.shift_forward().bits(), 0b0001000);
    }

    #[test]
    fn schedule_end_time_wraps_midnight() {
        let s = schedule("23:30", 90, 0b0010000);
        assert!(s.crosses_midnight());
        assert_eq!(s.end_time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());

        let s = schedule("08:00", 120, 0b0000001);
        assert!(!s.crosses_midnight());
        assert_eq!(s.end_time(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn schedule_ending_exactly_at_midnight_crosses() {
        // 23:00 + 60min ends at 00:00 on the next calendar day, so the stop
        // trigger needs the shifted mask.
        let s = schedule("23:00", 60, 0b0000001);
        assert!(s.crosses_midnight());
        assert_eq!(s.end_time(), NaiveTime::MIN);
        assert_eq!(s.stop_days().bits(), 0b0000010);
    }

    #[test]
    fn stop_days_unshifted_for_non_crossing_window() {
        let s = schedule("08:00", 120, 0b0011111);
        assert_eq!(s.stop_days(), s.days_of_week);
    }

    #[test]
    fn validate_rejects_bad_schedules() {
        let mut s = schedule("08:00", 0, 1);
        assert!(s.validate().is_err());

        s.duration_minutes = 60;
        s.max_concurrency = 0;
        assert!(s.validate().is_err());

        s.max_concurrency = 1;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn schedule_serde_round_trips_hhmm() {
        let s = schedule("23:30", 90, 0b0010000);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["startTime"], "23:30");
        assert_eq!(json["daysOfWeek"], 0b0010000);

        let back: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(back.start_time, s.start_time);
        assert_eq!(back.days_of_week, s.days_of_week);
    }

    #[test]
    fn schedule_rejects_malformed_start_time() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "projectName": "demo",
            "startTime": "25:61",
            "durationMinutes": 60,
            "daysOfWeek": 1,
            "enabled": true,
            "yoloMode": false,
            "maxConcurrency": 1,
            "createdAt": Utc::now(),
        });
        assert!(serde_json::from_value::<Schedule>(json).is_err());
    }

    #[test]
    fn day_mask_rejects_out_of_range_on_deserialize() {
        assert!(serde_json::from_value::<DayMask>(serde_json::json!(128)).is_err());
        assert!(serde_json::from_value::<DayMask>(serde_json::json!(127)).is_ok());
    }

    proptest! {
        // shift_forward is a bijection on the 7-bit domain
        #[test]
        fn shift_forward_is_bijective(bits in 0u8..=0x7f) {
            let mask = DayMask::new(bits).unwrap();
            let shifted = mask.shift_forward();
            prop_assert_eq!(shifted.bits().count_ones(), bits.count_ones());
            prop_assert!(shifted.bits() <= 0x7f);
        }

        // seven rotations bring the mask back to itself
        #[test]
        fn shift_forward_seven_times_is_identity(bits in 0u8..=0x7f) {
            let mask = DayMask::new(bits).unwrap();
            let mut rotated = mask;
            for _ in 0..7 {
                rotated = rotated.shift_forward();
            }
            prop_assert_eq!(rotated, mask);
        }

        // every weekday bit survives the rotation, moved forward one day
        #[test]
        fn shift_forward_moves_each_day_forward(day in 0u8..7) {
            let mask = DayMask::new(1 << day).unwrap();
            let expected = 1u8 << ((day + 1) % 7);
            prop_assert_eq!(mask.shift_forward().bits(), expected);
        }
    }
}
