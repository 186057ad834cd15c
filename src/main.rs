use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use site_analytics::aggregator::OnDemandAggregator;
use site_analytics::config::Config;
use site_analytics::db::{RecordStore, SnapshotStore, SqliteRecordStore, SqliteSnapshotStore};
use site_analytics::error::Result;
use site_analytics::period::{Clock, SystemClock};
use site_analytics::refresh::{RefreshScheduler, SnapshotRefresher};
use site_analytics::state::MetricCache;
use site_analytics::ResolutionEngine;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = SqlitePoolOptions::new()
        .connect(&format!("sqlite:{}?mode=rwc", cfg.db_path))
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared components ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(pool.clone()));
    let aggregator = Arc::new(OnDemandAggregator::new(Arc::clone(&records)));
    let cache = Arc::new(MetricCache::from_config(&cfg));

    let engine = ResolutionEngine::new(
        Arc::clone(&aggregator),
        Arc::clone(&snapshots),
        Arc::clone(&cache),
        Arc::clone(&clock),
    );

    let refresher = Arc::new(SnapshotRefresher::new(
        Arc::clone(&records),
        aggregator,
        snapshots,
        Arc::clone(&cache),
        Arc::clone(&clock),
    ));

    if cfg.refresh_on_startup {
        let report = refresher.refresh_all().await?;
        info!(
            "Startup refresh complete: {} refreshed, {} failed",
            report.refreshed, report.failed,
        );
    }

    // --- Nightly refresh + ingestion-triggered refreshes ---
    // Ingestion runs in another process here, so nothing sends on the handle.
    // Embedders that ingest in-process clone it and call `request` after each
    // commit. It is held until shutdown; the nightly run does not depend on it.
    let (scheduler, refresh_handle) = RefreshScheduler::new(refresher, clock, &cfg);
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    info!(
        refresh_hour = cfg.refresh_hour,
        cache_max_entries = cfg.cache_max_entries,
        "Analytics engine ready",
    );

    // Startup check over the open range (never cached).
    let site_ids = records.all_site_ids().await?;
    match engine.transaction_count(&site_ids, None, None).await {
        Ok(count) => info!(sites = site_ids.len(), transactions = count, "Record store reachable"),
        Err(e) => error!("Record store check failed: {e}"),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    drop(refresh_handle);
    scheduler_task.abort();
    cache.shutdown().await;

    Ok(())
}
