use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use moka::future::Cache;
use moka::Expiry;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::metric::{Metric, MetricValue};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// (metric, sorted distinct site ids, start, end).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub metric: Metric,
    pub site_ids: Vec<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl CacheKey {
    pub fn new(
        metric: Metric,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Self {
        let mut site_ids = site_ids.to_vec();
        site_ids.sort();
        site_ids.dedup();
        Self { metric, site_ids, start, end }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |b: Option<NaiveDateTime>| b.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{}|{}|{}|{}",
            self.metric,
            self.site_ids.join(","),
            bound(self.start),
            bound(self.end)
        )
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// How much a cached value is trusted, which decides how long it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Aggregated from precomputed snapshots.
    Snapshot,
    /// Computed on demand from raw records.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: MetricValue,
    pub tier: CacheTier,
}

struct TierExpiry {
    snapshot_ttl: Duration,
    fallback_ttl: Duration,
}

impl TierExpiry {
    fn ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Snapshot => self.snapshot_ttl,
            CacheTier::Fallback => self.fallback_ttl,
        }
    }
}

impl Expiry<CacheKey, CacheEntry> for TierExpiry {
    fn expire_after_create(&self, _key: &CacheKey, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(self.ttl(value.tier))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl(value.tier))
    }
}

// ---------------------------------------------------------------------------
// MetricCache
// ---------------------------------------------------------------------------

/// Process-local cache of resolved metrics. Created once at startup and
/// shared by reference; `shutdown` drops everything.
pub struct MetricCache {
    entries: Cache<CacheKey, CacheEntry>,
}

impl MetricCache {
    pub fn new(max_entries: u64, snapshot_ttl: Duration, fallback_ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(TierExpiry { snapshot_ttl, fallback_ttl })
            .support_invalidation_closures()
            .build();
        Self { entries }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.cache_max_entries, cfg.snapshot_ttl, cfg.fallback_ttl)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<MetricValue> {
        let hit = self.entries.get(key).await;
        debug!(key = %key, hit = hit.is_some(), "Metric cache lookup");
        hit.map(|entry| entry.value)
    }

    pub async fn insert(&self, key: CacheKey, value: MetricValue, tier: CacheTier) {
        self.entries.insert(key, CacheEntry { value, tier }).await;
    }

    /// Drop every entry whose site set includes `site_id`.
    pub fn invalidate_site(&self, site_id: &str) {
        let site = site_id.to_string();
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |key, _| key.site_ids.contains(&site))
        {
            warn!(site_id = %site_id, "Failed to invalidate cached metrics: {e}");
        }
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn shutdown(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}
