use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{Config, REFRESH_CHANNEL_CAPACITY};
use crate::period::Clock;
use crate::refresh::snapshot_refresher::SnapshotRefresher;

/// Ask for one site's snapshots to be recomputed, e.g. after ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub site_id: String,
}

/// Sending half handed to the ingestion side. A scheduler whose handles are
/// all dropped keeps its nightly run and stops taking requests.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<RefreshRequest>,
}

impl RefreshHandle {
    pub async fn request(&self, site_id: impl Into<String>) {
        let site_id = site_id.into();
        if let Err(e) = self.tx.send(RefreshRequest { site_id: site_id.clone() }).await {
            warn!(site_id = %site_id, "Failed to queue snapshot refresh: {e}");
        }
    }
}

/// First `hour:00` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Runs `refresh_all` once a day and single-site refreshes on request.
pub struct RefreshScheduler {
    refresher: Arc<SnapshotRefresher>,
    clock: Arc<dyn Clock>,
    refresh_hour: u32,
    retry: Duration,
    requests: mpsc::Receiver<RefreshRequest>,
}

impl RefreshScheduler {
    pub fn new(refresher: Arc<SnapshotRefresher>, clock: Arc<dyn Clock>, cfg: &Config) -> (Self, RefreshHandle) {
        let (tx, requests) = mpsc::channel(REFRESH_CHANNEL_CAPACITY);
        let scheduler = Self {
            refresher,
            clock,
            refresh_hour: cfg.refresh_hour,
            retry: cfg.refresh_retry,
            requests,
        };
        (scheduler, RefreshHandle { tx })
    }

    pub async fn run(mut self) {
        let mut next = next_run_after(self.clock.now(), self.refresh_hour);
        info!(next = %next, "Snapshot refresh scheduled");

        loop {
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    next = match self.refresher.refresh_all().await {
                        Ok(_) => next_run_after(self.clock.now(), self.refresh_hour),
                        Err(e) => {
                            warn!(retry_in = ?self.retry, "Scheduled snapshot refresh failed: {e}");
                            self.clock.now() + chrono::Duration::from_std(self.retry).unwrap_or_default()
                        }
                    };
                    info!(next = %next, "Snapshot refresh re-armed");
                }
                Some(request) = self.requests.recv() => {
                    if let Err(e) = self.refresher.refresh_site(&request.site_id).await {
                        error!(site_id = %request.site_id, "Requested snapshot refresh failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::OnDemandAggregator;
    use crate::db::{RecordStore, SnapshotStore, SqliteRecordStore, SqliteSnapshotStore};
    use crate::period::{FixedClock, PeriodType};
    use crate::state::MetricCache;
    use crate::testing::{at, insert_site, insert_tx, memory_pool, tx};

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        assert_eq!(next_run_after(at(2025, 5, 15, 1), 3), at(2025, 5, 15, 3));
        assert_eq!(next_run_after(at(2025, 5, 15, 3), 3), at(2025, 5, 16, 3));
        assert_eq!(next_run_after(at(2025, 5, 15, 14), 3), at(2025, 5, 16, 3));
        assert_eq!(next_run_after(at(2025, 12, 31, 23), 0), at(2026, 1, 1, 0));
    }

    #[tokio::test]
    async fn requests_refresh_a_single_site() {
        let pool = memory_pool().await;
        insert_site(&pool, "s1", "Alpha").await;
        insert_tx(&pool, &tx("a", "s1", at(2025, 5, 10, 9), 300)).await;

        let clock: Arc<dyn Clock> = Arc::new(FixedClock(at(2025, 5, 15, 14)));
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotStore::new(pool));
        let refresher = Arc::new(SnapshotRefresher::new(
            records.clone(),
            Arc::new(OnDemandAggregator::new(records)),
            snapshots.clone(),
            Arc::new(MetricCache::new(10, Duration::from_secs(60), Duration::from_secs(60))),
            clock.clone(),
        ));
        let (scheduler, handle) = RefreshScheduler::new(refresher, clock, &Config::default());
        let task = tokio::spawn(scheduler.run());

        handle.request("s1").await;

        let ids = ["s1".to_string()];
        let mut rows = Vec::new();
        for _ in 0..100 {
            rows = snapshots.snapshots(&ids, PeriodType::RollingMonth, None).await.unwrap();
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_revenue, 3.0);
    }

    #[tokio::test]
    async fn nightly_run_fires_with_no_request_handle() {
        let pool = memory_pool().await;
        insert_site(&pool, "s1", "Alpha").await;
        insert_tx(&pool, &tx("a", "s1", at(2025, 5, 10, 9), 300)).await;

        // 50ms before the 03:00 run.
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(at(2025, 5, 15, 3) - chrono::Duration::milliseconds(50)));
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotStore::new(pool));
        let refresher = Arc::new(SnapshotRefresher::new(
            records.clone(),
            Arc::new(OnDemandAggregator::new(records)),
            snapshots.clone(),
            Arc::new(MetricCache::new(10, Duration::from_secs(60), Duration::from_secs(60))),
            clock.clone(),
        ));
        let (scheduler, handle) = RefreshScheduler::new(refresher, clock, &Config::default());
        drop(handle);
        let task = tokio::spawn(scheduler.run());

        let ids = ["s1".to_string()];
        let mut rows = Vec::new();
        for _ in 0..100 {
            rows = snapshots.snapshots(&ids, PeriodType::RollingYear, None).await.unwrap();
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_revenue, 3.0);
    }
}
