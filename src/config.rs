use std::time::Duration;

use crate::error::{AppError, Result};

/// Unit-type codes that identify a dryer. Every other code is a washer.
pub const DRYER_UNIT_TYPES: &[i64] = &[1, 5, 10, 14, 18, 19, 27, 29, 41];

/// Ranges spanning at most this many days are bucketed per day.
pub const DAILY_BUCKET_MAX_DAYS: i64 = 7;

/// Ranges spanning at least this many days are bucketed per month.
pub const MONTHLY_BUCKET_MIN_DAYS: i64 = 60;

/// A single calendar quarter spanning at most this many days gets weekly buckets.
pub const QUARTER_WEEKLY_MAX_DAYS: i64 = 90;

/// Requests wider than this many days AND covering more than
/// `LARGE_REQUEST_MIN_SITES` sites are grouped in the store instead of in memory.
pub const LARGE_REQUEST_MIN_DAYS: i64 = 30;
pub const LARGE_REQUEST_MIN_SITES: usize = 3;

/// Channel capacity for ingestion-triggered refresh requests.
pub const REFRESH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    /// Local hour (0-23) at which the nightly snapshot refresh runs (REFRESH_HOUR)
    pub refresh_hour: u32,
    /// Run a full refresh once at startup before arming the schedule (REFRESH_ON_STARTUP)
    pub refresh_on_startup: bool,
    /// Upper bound on cached metric results (CACHE_MAX_ENTRIES)
    pub cache_max_entries: u64,
    /// TTL for results answered from snapshots (SNAPSHOT_TTL_SECS)
    pub snapshot_ttl: Duration,
    /// TTL for results computed on demand (FALLBACK_TTL_SECS)
    pub fallback_ttl: Duration,
    /// Delay before re-arming the nightly refresh after a failed run (REFRESH_RETRY_SECS)
    pub refresh_retry: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "analytics.db".to_string(),
            log_level: "info".to_string(),
            refresh_hour: 3,
            refresh_on_startup: false,
            cache_max_entries: 10_000,
            snapshot_ttl: Duration::from_secs(3600),
            fallback_ttl: Duration::from_secs(1800),
            refresh_retry: Duration::from_secs(900),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let refresh_hour = std::env::var("REFRESH_HOUR")
            .unwrap_or_else(|_| defaults.refresh_hour.to_string())
            .parse::<u32>()
            .ok()
            .filter(|h| *h < 24)
            .ok_or_else(|| AppError::Config("REFRESH_HOUR must be an hour between 0 and 23".to_string()))?;

        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            refresh_hour,
            refresh_on_startup: std::env::var("REFRESH_ON_STARTUP")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.refresh_on_startup),
            cache_max_entries: std::env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.cache_max_entries),
            snapshot_ttl: secs_from_env("SNAPSHOT_TTL_SECS", defaults.snapshot_ttl),
            fallback_ttl: secs_from_env("FALLBACK_TTL_SECS", defaults.fallback_ttl),
            refresh_retry: secs_from_env("REFRESH_RETRY_SECS", defaults.refresh_retry),
        })
    }
}

fn secs_from_env(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
