use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::aggregator::{interval_for_period, OnDemandAggregator, Scope};
use crate::db::{PeriodAggregate, RecordStore, SeriesBlob, SnapshotStore};
use crate::error::Result;
use crate::period::{canonical_windows, CanonicalWindow, Clock};
use crate::state::MetricCache;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Recomputes every canonical period for a site and upserts the results.
pub struct SnapshotRefresher {
    records: Arc<dyn RecordStore>,
    aggregator: Arc<OnDemandAggregator>,
    snapshots: Arc<dyn SnapshotStore>,
    cache: Arc<MetricCache>,
    clock: Arc<dyn Clock>,
    /// One lock per site. A trigger that arrives mid-refresh waits for the
    /// running pass and then recomputes, so rows written before a newer
    /// ingestion commit are overwritten.
    site_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SnapshotRefresher {
    pub fn new(
        records: Arc<dyn RecordStore>,
        aggregator: Arc<OnDemandAggregator>,
        snapshots: Arc<dyn SnapshotStore>,
        cache: Arc<MetricCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            aggregator,
            snapshots,
            cache,
            clock,
            site_locks: DashMap::new(),
        }
    }

    /// Rows written, one per canonical window.
    pub async fn refresh_site(&self, site_id: &str) -> Result<usize> {
        let lock = self.site_locks.entry(site_id.to_string()).or_default().clone();
        let _held = match lock.try_lock() {
            Ok(held) => held,
            Err(_) => {
                debug!(site_id = %site_id, "Refresh in progress, waiting to rerun");
                lock.lock().await
            }
        };

        let now = self.clock.now();
        let mut written = 0;

        for window in canonical_windows(now) {
            let row = self.compute(site_id, &window, now).await?;
            self.snapshots.upsert(&row).await?;
            written += 1;
        }

        self.cache.invalidate_site(site_id);
        info!(site_id = %site_id, rows = written, "Snapshots refreshed");
        Ok(written)
    }

    async fn compute(
        &self,
        site_id: &str,
        window: &CanonicalWindow,
        now: NaiveDateTime,
    ) -> Result<PeriodAggregate> {
        let scope = Scope::new(&[site_id.to_string()], Some(window.start), Some(window.end));
        let metrics = self
            .aggregator
            .period_metrics(&scope, interval_for_period(window))
            .await?;
        let summary = metrics.summary;

        Ok(PeriodAggregate {
            site_id: site_id.to_string(),
            period_type: window.period.period_type(),
            period_key: window.period.key(),
            start: window.start,
            end: window.end,
            total_revenue: summary.total_revenue,
            total_transactions: summary.total_transactions,
            washer_transactions: summary.washer_transactions,
            dryer_transactions: summary.dryer_transactions,
            washer_start_price: summary.washer_start_price,
            dryer_start_price: summary.dryer_start_price,
            revenue_series: Some(SeriesBlob::encode(&metrics.revenue_series)?),
            count_series: Some(SeriesBlob::encode(&metrics.count_series)?),
            last_calculated_at: now,
        })
    }

    /// Refresh every known site in turn. A failing site is logged and counted.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let site_ids = self.records.all_site_ids().await?;
        let mut report = RefreshReport::default();

        for site_id in &site_ids {
            match self.refresh_site(site_id).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    error!(site_id = %site_id, "Snapshot refresh failed: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            failed = report.failed,
            "Snapshot refresh complete: {} refreshed, {} failed",
            report.refreshed,
            report.failed,
        );
        Ok(report)
    }
}
