use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, SqlitePool};
use tracing::warn;

use crate::db::models::PeriodAggregateRow;
use crate::error::Result;
use crate::period::PeriodType;
use crate::types::TimeSeries;

/// Bits of `series_flags` marking which embedded series a row carries.
pub mod series_flags {
    pub const REVENUE: i64 = 1;
    pub const COUNT: i64 = 1 << 1;
}

/// A serialized time series as persisted on a snapshot row.
///
/// Kept encoded until a reader needs it, so a corrupt blob only costs the
/// reader that one row's series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesBlob(String);

impl SeriesBlob {
    pub fn encode(series: &TimeSeries) -> Result<Self> {
        Ok(Self(serde_json::to_string(series)?))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn decode(&self) -> Result<TimeSeries> {
        Ok(serde_json::from_str(&self.0)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// PeriodAggregate
// ---------------------------------------------------------------------------

/// Precomputed metrics for one site over one canonical period.
/// Identity: (site_id, period_type, period_key).
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodAggregate {
    pub site_id: String,
    pub period_type: PeriodType,
    pub period_key: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Major currency units.
    pub total_revenue: f64,
    /// Always washer_transactions + dryer_transactions.
    pub total_transactions: i64,
    pub washer_transactions: i64,
    pub dryer_transactions: i64,
    pub washer_start_price: f64,
    pub dryer_start_price: f64,
    pub revenue_series: Option<SeriesBlob>,
    pub count_series: Option<SeriesBlob>,
    pub last_calculated_at: NaiveDateTime,
}

impl PeriodAggregate {
    pub fn series_flags(&self) -> i64 {
        let mut flags = 0;
        if self.revenue_series.is_some() {
            flags |= series_flags::REVENUE;
        }
        if self.count_series.is_some() {
            flags |= series_flags::COUNT;
        }
        flags
    }

    fn from_row(row: PeriodAggregateRow) -> Option<Self> {
        let Some(period_type) = PeriodType::parse(&row.period_type) else {
            warn!(
                site_id = %row.site_id,
                period_type = %row.period_type,
                "Skipping snapshot row with unknown period type",
            );
            return None;
        };
        let flagged = |bit: i64, blob: Option<String>| {
            blob.filter(|_| row.series_flags & bit != 0).map(SeriesBlob::from_raw)
        };

        Some(Self {
            revenue_series: flagged(series_flags::REVENUE, row.revenue_series),
            count_series: flagged(series_flags::COUNT, row.count_series),
            site_id: row.site_id,
            period_type,
            period_key: row.period_key,
            start: row.start_date,
            end: row.end_date,
            total_revenue: row.total_revenue,
            total_transactions: row.total_transactions,
            washer_transactions: row.washer_transactions,
            dryer_transactions: row.dryer_transactions,
            washer_start_price: row.washer_start_price,
            dryer_start_price: row.dryer_start_price,
            last_calculated_at: row.last_calculated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Rows for any of `site_ids` with the given type (and key, when given).
    async fn snapshots(
        &self,
        site_ids: &[String],
        period_type: PeriodType,
        period_key: Option<&str>,
    ) -> Result<Vec<PeriodAggregate>>;

    /// Insert, or overwrite every field of the existing row with the same identity.
    async fn upsert(&self, snapshot: &PeriodAggregate) -> Result<()>;
}

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn snapshots(
        &self,
        site_ids: &[String],
        period_type: PeriodType,
        period_key: Option<&str>,
    ) -> Result<Vec<PeriodAggregate>> {
        if site_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(
            r#"
            SELECT site_id, period_type, period_key, start_date, end_date,
                   total_revenue, total_transactions, washer_transactions, dryer_transactions,
                   washer_start_price, dryer_start_price,
                   series_flags, revenue_series, count_series, last_calculated_at
            FROM period_aggregates
            WHERE period_type = "#,
        );
        qb.push_bind(period_type.as_str());
        if let Some(key) = period_key {
            qb.push(" AND period_key = ").push_bind(key);
        }
        qb.push(" AND site_id IN (");
        let mut ids = qb.separated(", ");
        for id in site_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(") ORDER BY site_id");

        let rows = qb
            .build_query_as::<PeriodAggregateRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().filter_map(PeriodAggregate::from_row).collect())
    }

    async fn upsert(&self, s: &PeriodAggregate) -> Result<()> {
        let flags = s.series_flags();
        let revenue_series = s.revenue_series.as_ref().map(SeriesBlob::as_str);
        let count_series = s.count_series.as_ref().map(SeriesBlob::as_str);

        sqlx::query(
            r#"
            INSERT INTO period_aggregates (
                site_id, period_type, period_key, start_date, end_date,
                total_revenue, total_transactions, washer_transactions, dryer_transactions,
                washer_start_price, dryer_start_price,
                series_flags, revenue_series, count_series, last_calculated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id, period_type, period_key) DO UPDATE SET
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                total_revenue = excluded.total_revenue,
                total_transactions = excluded.total_transactions,
                washer_transactions = excluded.washer_transactions,
                dryer_transactions = excluded.dryer_transactions,
                washer_start_price = excluded.washer_start_price,
                dryer_start_price = excluded.dryer_start_price,
                series_flags = excluded.series_flags,
                revenue_series = excluded.revenue_series,
                count_series = excluded.count_series,
                last_calculated_at = excluded.last_calculated_at
            "#,
        )
        .bind(&s.site_id)
        .bind(s.period_type.as_str())
        .bind(&s.period_key)
        .bind(s.start)
        .bind(s.end)
        .bind(s.total_revenue)
        .bind(s.total_transactions)
        .bind(s.washer_transactions)
        .bind(s.dryer_transactions)
        .bind(s.washer_start_price)
        .bind(s.dryer_start_price)
        .bind(flags)
        .bind(revenue_series)
        .bind(count_series)
        .bind(s.last_calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
