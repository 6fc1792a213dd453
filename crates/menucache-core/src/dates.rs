//! Date reconciliation between provider menu cycles and calendar dates.
//!
//! Providers describe menus in their own terms: the legacy calendar by month
//! pages, Sage by a repeating cycle of weeks anchored on a Sunday. Everything
//! in here is pure date arithmetic; no I/O.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DateRangeError;

/// Format used for every date key rendered by the crate.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Sage `menuFirstDate` format.
const SAGE_FIRST_DATE_FORMAT: &str = "%m/%d/%Y";

/// Legacy calendar `this_date` attribute format.
const CALENDAR_CELL_DATE_FORMAT: &str = "%m/%d/%y";

/// Returns the day whose menu is currently relevant.
///
/// Once `cutoff_hour` has passed (lunch is over), today's menu no longer
/// serves a purpose and tomorrow is returned instead.
pub fn resolve_current_day(now: NaiveDateTime, cutoff_hour: u32) -> NaiveDate {
    let today = now.date();
    if now.hour() >= cutoff_hour {
        today.succ_opt().unwrap_or(today)
    } else {
        today
    }
}

/// Returns the Sunday on or before `date`.
pub fn anchor_to_week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_sunday() as u64;
    date - Days::new(back)
}

/// Parses a Sage `menuFirstDate` (`MM/DD/YYYY`) and anchors it to its Sunday.
pub fn parse_sage_first_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let date = NaiveDate::parse_from_str(raw.trim(), SAGE_FIRST_DATE_FORMAT)?;
    Ok(anchor_to_week_start(date))
}

/// Parses a legacy calendar cell's `this_date` attribute (`MM/DD/YY`).
pub fn parse_calendar_cell_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), CALENDAR_CELL_DATE_FORMAT)
}

/// Renders a date as its canonical `YYYY-MM-DD` key.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Position of a date inside a Sage cycle.
///
/// `week` is absolute (weeks since `start_sunday`), not wrapped by the cycle
/// length; see [`CycleDescriptor::cycle_week`] for the wrapped index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePosition {
    pub week: u32,
    pub day: u32,
}

/// Scheduling of one Sage menu: a cycle of `cycle_length_weeks` weeks whose
/// week 0 starts on `start_sunday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleDescriptor {
    cycle_length_weeks: u32,
    start_sunday: NaiveDate,
}

impl CycleDescriptor {
    /// Builds a descriptor, anchoring `first_date` to its Sunday.
    /// A zero cycle length is treated as a one week cycle.
    pub fn new(cycle_length_weeks: u32, first_date: NaiveDate) -> Self {
        Self {
            cycle_length_weeks: cycle_length_weeks.max(1),
            start_sunday: anchor_to_week_start(first_date),
        }
    }

    pub fn cycle_length_weeks(&self) -> u32 {
        self.cycle_length_weeks
    }

    pub fn start_sunday(&self) -> NaiveDate {
        self.start_sunday
    }

    pub fn cycle_date_to_calendar(&self, week: u32, day: u32) -> NaiveDate {
        let offset = u64::from(week) * 7 + u64::from(day);
        self.start_sunday + Days::new(offset)
    }

    pub fn calendar_to_cycle(&self, date: NaiveDate) -> Result<CyclePosition, DateRangeError> {
        if date < self.start_sunday {
            return Err(DateRangeError {
                date,
                start: self.start_sunday,
            });
        }
        let days = (date - self.start_sunday).num_days();
        Ok(CyclePosition {
            week: (days / 7) as u32,
            day: (days % 7) as u32,
        })
    }

    /// Sunday..Saturday of absolute cycle week `week`.
    pub fn week_date_list(&self, week: u32) -> [NaiveDate; 7] {
        let sunday = self.cycle_date_to_calendar(week, 0);
        std::array::from_fn(|day| sunday + Days::new(day as u64))
    }

    /// Wraps an absolute week into the index the provider understands.
    pub fn cycle_week(&self, absolute_week: u32) -> u32 {
        absolute_week % self.cycle_length_weeks
    }
}

/// A calendar month, ordered and stepped by integer month index so that
/// December rolls into January without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Months since year 0, January.
    pub fn index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    pub fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn next(&self) -> Self {
        Self::from_index(self.index() + 1)
    }

    /// True when `self` is the month right after `other`.
    pub fn follows(&self, other: YearMonth) -> bool {
        self.index() == other.index() + 1
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or_else(|| self.first_day())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One `YYYY-MM` token per month touched by the inclusive range, ascending.
/// An inverted range yields nothing.
pub fn enumerate_month_span(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    month_range(start, end).iter().map(|m| m.to_string()).collect()
}

/// Months touched by the inclusive range, ascending.
pub fn month_range(start: NaiveDate, end: NaiveDate) -> Vec<YearMonth> {
    let first = YearMonth::of(start).index();
    let last = YearMonth::of(end).index();
    (first..=last).map(YearMonth::from_index).collect()
}

/// Splits an inclusive range into one inclusive sub-range per month.
pub fn split_by_month(start: NaiveDate, end: NaiveDate) -> Vec<(YearMonth, NaiveDate, NaiveDate)> {
    month_range(start, end)
        .into_iter()
        .map(|month| {
            let from = start.max(month.first_day());
            let to = end.min(month.last_day());
            (month, from, to)
        })
        .collect()
}

/// Every date of the inclusive range, ascending.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Saturday and Sunday roll forward to the following Monday.
fn skip_weekend(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Days::new(2),
        Weekday::Sun => date + Days::new(1),
        _ => date,
    }
}

/// The next school day whose menu is relevant: the current day after the
/// cutoff, moved off the weekend.
pub fn next_school_day(now: NaiveDateTime, cutoff_hour: u32) -> NaiveDate {
    skip_weekend(resolve_current_day(now, cutoff_hour))
}

/// Monday of the school week containing `date`. Weekends belong to the
/// coming week.
pub fn school_week_monday(date: NaiveDate) -> NaiveDate {
    let date = skip_weekend(date);
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}
