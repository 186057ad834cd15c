use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::config::{DAILY_BUCKET_MAX_DAYS, MONTHLY_BUCKET_MIN_DAYS, QUARTER_WEEKLY_MAX_DAYS};
use crate::period::{CanonicalWindow, PeriodType};
use crate::types::{Interval, SeriesPoint, TimeSeries};

/// Span-driven interval for ad-hoc ranges: up to a week per day, two months
/// and wider per month, weekly in between.
pub fn interval_for_span(first: NaiveDate, last: NaiveDate) -> Interval {
    let span = (last - first).num_days();
    if span <= DAILY_BUCKET_MAX_DAYS {
        Interval::Day
    } else if span >= MONTHLY_BUCKET_MIN_DAYS {
        Interval::Month
    } else {
        Interval::Week
    }
}

/// Period-driven interval used when building snapshot series.
pub fn interval_for_period(window: &CanonicalWindow) -> Interval {
    match window.period.period_type() {
        PeriodType::RollingMonth => Interval::Day,
        PeriodType::RollingHalfYear => Interval::Week,
        PeriodType::RollingYear | PeriodType::TrailingFourQuarters => Interval::Month,
        PeriodType::CalendarQuarter if window.span_days() <= QUARTER_WEEKLY_MAX_DAYS => {
            Interval::Week
        }
        PeriodType::CalendarQuarter => Interval::Month,
    }
}

/// `2025-03-07`, `2025-W10` (ISO week, Monday start) or `2025-03`.
/// All three sort lexicographically in chronological order.
pub fn bucket_label(date: NaiveDate, interval: Interval) -> String {
    match interval {
        Interval::Day => date.format("%Y-%m-%d").to_string(),
        Interval::Week => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Interval::Month => date.format("%Y-%m").to_string(),
    }
}

/// Every bucket touched by [first, last], in order, without gaps.
pub fn bucket_labels(first: NaiveDate, last: NaiveDate, interval: Interval) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut day = first;
    while day <= last {
        let label = bucket_label(day, interval);
        if labels.last() != Some(&label) {
            labels.push(label);
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    labels
}

// ---------------------------------------------------------------------------
// Buckets: zero-filled integer accumulators keyed by label
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Buckets {
    interval: Interval,
    labels: Vec<String>,
    totals: Vec<i64>,
    index: HashMap<String, usize>,
}

impl Buckets {
    pub fn zero_filled(first: NaiveDate, last: NaiveDate, interval: Interval) -> Self {
        let labels = bucket_labels(first, last, interval);
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self {
            interval,
            totals: vec![0; labels.len()],
            labels,
            index,
        }
    }

    /// Adds to the bucket containing `date`. Dates outside the range are ignored.
    pub fn add(&mut self, date: NaiveDate, amount: i64) {
        if let Some(&i) = self.index.get(&bucket_label(date, self.interval)) {
            self.totals[i] += amount;
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Converts accumulated integers into a series, dividing each by `divisor`
    /// (100 for cents → major units, 1 for counts).
    pub fn into_series(self, divisor: f64) -> TimeSeries {
        let points = self
            .labels
            .into_iter()
            .zip(self.totals)
            .map(|(label, total)| SeriesPoint {
                label,
                value: total as f64 / divisor,
            })
            .collect();
        TimeSeries {
            interval: self.interval,
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::canonical_windows;
    use crate::testing::{at, day};

    #[test]
    fn span_thresholds() {
        assert_eq!(interval_for_span(day(2025, 3, 1), day(2025, 3, 1)), Interval::Day);
        assert_eq!(interval_for_span(day(2025, 3, 1), day(2025, 3, 8)), Interval::Day);
        assert_eq!(interval_for_span(day(2025, 3, 1), day(2025, 3, 9)), Interval::Week);
        assert_eq!(interval_for_span(day(2025, 3, 1), day(2025, 4, 29)), Interval::Week);
        assert_eq!(interval_for_span(day(2025, 3, 1), day(2025, 4, 30)), Interval::Month);
    }

    #[test]
    fn daily_buckets_count_every_day() {
        let labels = bucket_labels(day(2025, 2, 26), day(2025, 3, 2), Interval::Day);
        assert_eq!(
            labels,
            vec!["2025-02-26", "2025-02-27", "2025-02-28", "2025-03-01", "2025-03-02"]
        );
    }

    #[test]
    fn weekly_buckets_use_iso_weeks_across_year_end() {
        // 2024-12-23 is a Monday; 2024-12-30 starts ISO week 1 of 2025.
        let labels = bucket_labels(day(2024, 12, 22), day(2025, 1, 6), Interval::Week);
        assert_eq!(labels, vec!["2024-W51", "2024-W52", "2025-W01", "2025-W02"]);
    }

    #[test]
    fn monthly_buckets_have_no_gaps() {
        let labels = bucket_labels(day(2024, 11, 15), day(2025, 5, 15), Interval::Month);
        assert_eq!(labels.len(), 7);
        assert_eq!(labels.first().map(String::as_str), Some("2024-11"));
        assert_eq!(labels.last().map(String::as_str), Some("2025-05"));
    }

    #[test]
    fn inverted_range_has_no_buckets() {
        assert!(bucket_labels(day(2025, 3, 2), day(2025, 3, 1), Interval::Day).is_empty());
    }

    #[test]
    fn zero_filled_buckets_keep_empty_slots() {
        let mut buckets = Buckets::zero_filled(day(2025, 3, 1), day(2025, 3, 4), Interval::Day);
        buckets.add(day(2025, 3, 2), 250);
        buckets.add(day(2025, 3, 2), 100);
        buckets.add(day(2025, 4, 1), 999);
        let series = buckets.into_series(100.0);
        assert_eq!(series.values(), vec![0.0, 3.5, 0.0, 0.0]);
        assert_eq!(series.interval, Interval::Day);
    }

    #[test]
    fn period_intervals() {
        let now = at(2025, 5, 15, 12);
        let intervals: Vec<(String, Interval)> = canonical_windows(now)
            .iter()
            .map(|w| (w.period.key(), interval_for_period(w)))
            .collect();
        assert_eq!(
            intervals,
            vec![
                ("last-month".to_string(), Interval::Day),
                ("last-half-year".to_string(), Interval::Week),
                ("last-year".to_string(), Interval::Month),
                // Q2 spans 90 days (Apr 1 → Jun 30), Q1 89, Q4/Q3 91.
                ("2025-Q2".to_string(), Interval::Week),
                ("2025-Q1".to_string(), Interval::Week),
                ("2024-Q4".to_string(), Interval::Month),
                ("2024-Q3".to_string(), Interval::Month),
                ("past-4-completed-quarters".to_string(), Interval::Month),
            ]
        );
    }
}
