use chrono::{Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now". Canonical windows slide daily, so everything that
/// classifies or refreshes takes the clock instead of reading it directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Period types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    RollingMonth,
    RollingHalfYear,
    RollingYear,
    CalendarQuarter,
    TrailingFourQuarters,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::RollingMonth => "rolling_month",
            PeriodType::RollingHalfYear => "rolling_half_year",
            PeriodType::RollingYear => "rolling_year",
            PeriodType::CalendarQuarter => "calendar_quarter",
            PeriodType::TrailingFourQuarters => "trailing_four_quarters",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rolling_month" => Some(PeriodType::RollingMonth),
            "rolling_half_year" => Some(PeriodType::RollingHalfYear),
            "rolling_year" => Some(PeriodType::RollingYear),
            "calendar_quarter" => Some(PeriodType::CalendarQuarter),
            "trailing_four_quarters" => Some(PeriodType::TrailingFourQuarters),
            _ => None,
        }
    }

    /// Rolling rows are overwritten in place as their window slides.
    pub fn is_rolling(&self) -> bool {
        matches!(
            self,
            PeriodType::RollingMonth | PeriodType::RollingHalfYear | PeriodType::RollingYear
        )
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const TRAILING_FOUR_QUARTERS_KEY: &str = "past-4-completed-quarters";

/// A canonical period, with the data needed to build its snapshot key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Period {
    RollingMonth,
    RollingHalfYear,
    RollingYear,
    CalendarQuarter { year: i32, quarter: u32 },
    TrailingFourQuarters,
}

impl Period {
    pub fn period_type(&self) -> PeriodType {
        match self {
            Period::RollingMonth => PeriodType::RollingMonth,
            Period::RollingHalfYear => PeriodType::RollingHalfYear,
            Period::RollingYear => PeriodType::RollingYear,
            Period::CalendarQuarter { .. } => PeriodType::CalendarQuarter,
            Period::TrailingFourQuarters => PeriodType::TrailingFourQuarters,
        }
    }

    pub fn key(&self) -> String {
        match self {
            Period::RollingMonth => "last-month".to_string(),
            Period::RollingHalfYear => "last-half-year".to_string(),
            Period::RollingYear => "last-year".to_string(),
            Period::CalendarQuarter { year, quarter } => format!("{year}-Q{quarter}"),
            Period::TrailingFourQuarters => TRAILING_FOUR_QUARTERS_KEY.to_string(),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.period_type(), self.key())
    }
}

// ---------------------------------------------------------------------------
// Canonical windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalWindow {
    pub period: Period,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CanonicalWindow {
    fn new(period: Period, first_day: NaiveDate, last_day: NaiveDate) -> Self {
        Self {
            period,
            start: start_of_day(first_day),
            end: end_of_day(last_day),
        }
    }

    /// Date-only comparison; time of day is ignored.
    pub fn matches(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start.date() == start.date() && self.end.date() == end.date()
    }

    /// Whole days between the first and last day.
    pub fn span_days(&self) -> i64 {
        (self.end.date() - self.start.date()).num_days()
    }
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Last millisecond of the day.
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + Duration::days(1) - Duration::milliseconds(1)
}

/// 1-based calendar quarter of a month (1..=12).
pub fn quarter_of(month: u32) -> u32 {
    (month + 2) / 3
}

/// Step `back` quarters before (year, quarter), wrapping into earlier years.
pub fn shift_quarter(year: i32, quarter: u32, back: u32) -> (i32, u32) {
    let index = year as i64 * 4 + (quarter as i64 - 1) - back as i64;
    (index.div_euclid(4) as i32, index.rem_euclid(4) as u32 + 1)
}

/// First and last day of a calendar quarter.
pub fn quarter_bounds(year: i32, quarter: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, quarter * 3 - 2, 1)?;
    let next_first = if quarter == 4 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, quarter * 3 + 1, 1)?
    };
    Some((first, next_first.pred_opt()?))
}

/// Every canonical window as of `now`, in classification priority order:
/// rolling month, half-year, year, the four most recent calendar quarters
/// (current first), then the trailing four completed quarters.
pub fn canonical_windows(now: NaiveDateTime) -> Vec<CanonicalWindow> {
    let today = now.date();
    let mut windows = Vec::with_capacity(8);

    for (period, months) in [
        (Period::RollingMonth, 1),
        (Period::RollingHalfYear, 6),
        (Period::RollingYear, 12),
    ] {
        if let Some(first) = today.checked_sub_months(Months::new(months)) {
            windows.push(CanonicalWindow::new(period, first, today));
        }
    }

    let current_quarter = quarter_of(today.month());
    for back in 0..4 {
        let (year, quarter) = shift_quarter(today.year(), current_quarter, back);
        if let Some((first, last)) = quarter_bounds(year, quarter) {
            windows.push(CanonicalWindow::new(
                Period::CalendarQuarter { year, quarter },
                first,
                last,
            ));
        }
    }

    let (oldest_year, oldest_quarter) = shift_quarter(today.year(), current_quarter, 4);
    let (newest_year, newest_quarter) = shift_quarter(today.year(), current_quarter, 1);
    if let (Some((first, _)), Some((_, last))) = (
        quarter_bounds(oldest_year, oldest_quarter),
        quarter_bounds(newest_year, newest_quarter),
    ) {
        windows.push(CanonicalWindow::new(Period::TrailingFourQuarters, first, last));
    }

    windows
}
