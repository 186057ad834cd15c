pub mod classifier;
pub mod windows;

pub use classifier::{classify, classify_window};
pub use windows::{
    canonical_windows, end_of_day, start_of_day, CanonicalWindow, Clock, FixedClock, Period,
    PeriodType, SystemClock,
};
