use chrono::{FixedOffset, Local, NaiveDateTime, Utc};

/// Source of "now" for date decisions, in the dining hall's local time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock, either in a fixed UTC offset or the host's local zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn new(offset: Option<FixedOffset>) -> Self {
        Self { offset }
    }

    /// Builds a clock from an offset in minutes east of UTC.
    /// Out-of-range offsets fall back to local time.
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        Self::new(
            minutes
                .and_then(|m| m.checked_mul(60))
                .and_then(FixedOffset::east_opt),
        )
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset).naive_local(),
            None => Local::now().naive_local(),
        }
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_fixed_clock() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        assert_eq!(FixedClock(at).now().hour(), 14);
    }

    #[test]
    fn test_offset_clock_tracks_utc() {
        let utc = SystemClock::from_offset_minutes(Some(0)).now();
        let diff = (Utc::now().naive_utc() - utc).num_seconds().abs();
        assert!(diff < 5);
    }

    #[test]
    fn test_invalid_offset_falls_back_to_local() {
        let clock = SystemClock::from_offset_minutes(Some(100 * 60));
        assert!(clock.offset.is_none());
    }

    #[test]
    fn test_overflowing_offset_falls_back_to_local() {
        let clock = SystemClock::from_offset_minutes(Some(i32::MAX));
        assert!(clock.offset.is_none());
    }
}
