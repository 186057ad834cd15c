use chrono::NaiveDateTime;

use crate::period::windows::{canonical_windows, CanonicalWindow, Period};

/// Match a requested range against the canonical windows as of `now`.
///
/// Returns None when either bound is missing or nothing matches. Windows are
/// checked in priority order and the first match wins, so a range that fits
/// both a rolling window and a quarter is reported as the rolling window.
/// Recomputed on every call: the anchors move with the date.
pub fn classify(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<Period> {
    classify_window(start, end, now).map(|w| w.period)
}

/// Like [`classify`], but keeps the matched window's bounds.
pub fn classify_window(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<CanonicalWindow> {
    let (start, end) = (start?, end?);
    canonical_windows(now)
        .into_iter()
        .find(|w| w.matches(start, end))
}
