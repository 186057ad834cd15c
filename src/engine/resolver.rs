use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::aggregator::{interval_for_period, OnDemandAggregator, Scope};
use crate::db::{PeriodAggregate, SeriesBlob, SnapshotStore};
use crate::engine::metric::{CachedMetric, Metric, MetricValue};
use crate::error::{AppError, Result};
use crate::period::{classify_window, CanonicalWindow, Clock};
use crate::state::{CacheKey, CacheTier, MetricCache};
use crate::types::{
    Interval, LabelCount, LabelPercentage, MachineBreakdown, SeriesKind, SeriesPoint,
    SiteComparison, Summary, TimeSeries,
};

/// Answers metric requests from the cache, then from precomputed snapshots
/// when the range is canonical and every site has one, else from raw records.
pub struct ResolutionEngine {
    aggregator: Arc<OnDemandAggregator>,
    snapshots: Arc<dyn SnapshotStore>,
    cache: Arc<MetricCache>,
    clock: Arc<dyn Clock>,
}

impl ResolutionEngine {
    pub fn new(
        aggregator: Arc<OnDemandAggregator>,
        snapshots: Arc<dyn SnapshotStore>,
        cache: Arc<MetricCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            aggregator,
            snapshots,
            cache,
            clock,
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    pub async fn revenue(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<f64> {
        self.resolve_as(Metric::Revenue, site_ids, start, end).await
    }

    pub async fn transaction_count(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<i64> {
        self.resolve_as(Metric::TransactionCount, site_ids, start, end).await
    }

    pub async fn summary(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Summary> {
        self.resolve_as(Metric::Summary, site_ids, start, end).await
    }

    pub async fn revenue_series(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<TimeSeries> {
        self.resolve_as(Metric::RevenueSeries, site_ids, start, end).await
    }

    pub async fn count_series(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<TimeSeries> {
        self.resolve_as(Metric::CountSeries, site_ids, start, end).await
    }

    /// Minutes.
    pub async fn average_duration(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<f64> {
        self.resolve_as(Metric::AverageDuration, site_ids, start, end).await
    }

    pub async fn temperature_breakdown(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelCount>> {
        self.resolve_as(Metric::TemperatureBreakdown, site_ids, start, end).await
    }

    pub async fn temperature_percentages(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelPercentage>> {
        self.resolve_as(Metric::TemperaturePercentages, site_ids, start, end).await
    }

    pub async fn soap_breakdown(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelCount>> {
        self.resolve_as(Metric::SoapBreakdown, site_ids, start, end).await
    }

    pub async fn soap_percentages(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelPercentage>> {
        self.resolve_as(Metric::SoapPercentages, site_ids, start, end).await
    }

    pub async fn program_breakdown(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelCount>> {
        self.resolve_as(Metric::ProgramBreakdown, site_ids, start, end).await
    }

    pub async fn program_percentages(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<LabelPercentage>> {
        self.resolve_as(Metric::ProgramPercentages, site_ids, start, end).await
    }

    pub async fn machine_breakdown(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<MachineBreakdown> {
        self.resolve_as(Metric::MachineBreakdown, site_ids, start, end).await
    }

    pub async fn site_comparison(
        &self,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        kind: SeriesKind,
    ) -> Result<SiteComparison> {
        let metric = match kind {
            SeriesKind::Revenue => Metric::RevenueComparison,
            SeriesKind::Count => Metric::CountComparison,
        };
        self.resolve_as(metric, site_ids, start, end).await
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    async fn resolve_as<T: CachedMetric>(
        &self,
        metric: Metric,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<T> {
        let value = self.resolve(metric, site_ids, start, end).await?;
        T::from_value(value).ok_or(AppError::UnexpectedValue(metric.name()))
    }

    /// Resolve any metric to its cached form.
    pub async fn resolve(
        &self,
        metric: Metric,
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<MetricValue> {
        let scope = Scope::new(site_ids, start, end);

        // Open ranges and empty site sets never touch the cache.
        if scope.site_ids.is_empty() || scope.start.is_none() || scope.end.is_none() {
            return self.on_demand(metric, &scope, None).await;
        }
        scope.validate()?;

        let key = CacheKey::new(metric, &scope.site_ids, scope.start, scope.end);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let (value, tier) = self.resolve_uncached(metric, &scope).await?;
        self.cache.insert(key, value.clone(), tier).await;
        Ok(value)
    }

    async fn resolve_uncached(&self, metric: Metric, scope: &Scope) -> Result<(MetricValue, CacheTier)> {
        let window = classify_window(scope.start, scope.end, self.clock.now());
        // A canonical range buckets by its period whether or not snapshots answer it.
        let period_interval = window.as_ref().map(interval_for_period);
        let Some(window) = window.filter(|_| metric.snapshot_backed()) else {
            let value = self.on_demand(metric, scope, period_interval).await?;
            return Ok((value, CacheTier::Fallback));
        };

        let period = &window.period;
        let period_key = period.key();
        let rows = self
            .snapshots
            .snapshots(&scope.site_ids, period.period_type(), Some(period_key.as_str()))
            .await?;

        let covered: HashSet<&str> = rows.iter().map(|r| r.site_id.as_str()).collect();
        let missing: Vec<&str> = scope
            .site_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !covered.contains(id))
            .collect();
        if !missing.is_empty() {
            debug!(
                metric = %metric,
                period = %period,
                covered = covered.len(),
                requested = scope.site_ids.len(),
                missing = ?missing,
                "Snapshot coverage incomplete, computing on demand",
            );
            let value = self.on_demand(metric, scope, period_interval).await?;
            return Ok((value, CacheTier::Fallback));
        }

        debug!(metric = %metric, period = %period, rows = rows.len(), "Answering from snapshots");
        let value = from_snapshots(metric, &rows, &window)?;
        Ok((value, CacheTier::Snapshot))
    }

    /// `interval` pins the series bucket size; otherwise the span decides.
    async fn on_demand(&self, metric: Metric, scope: &Scope, interval: Option<Interval>) -> Result<MetricValue> {
        let agg = &self.aggregator;
        let series = |kind: SeriesKind| async move {
            match interval {
                Some(interval) => agg.series_with_interval(scope, kind, interval).await,
                None => agg.series(scope, kind).await,
            }
        };
        Ok(match metric {
            Metric::Revenue => agg.revenue(scope).await?.into_value(),
            Metric::TransactionCount => agg.transaction_count(scope).await?.into_value(),
            Metric::Summary => agg.summary(scope).await?.into_value(),
            Metric::RevenueSeries => series(SeriesKind::Revenue).await?.into_value(),
            Metric::CountSeries => series(SeriesKind::Count).await?.into_value(),
            Metric::AverageDuration => agg.average_duration(scope).await?.into_value(),
            Metric::TemperatureBreakdown => agg.temperature_breakdown(scope).await?.into_value(),
            Metric::TemperaturePercentages => agg.temperature_percentages(scope).await?.into_value(),
            Metric::SoapBreakdown => agg.soap_breakdown(scope).await?.into_value(),
            Metric::SoapPercentages => agg.soap_percentages(scope).await?.into_value(),
            Metric::ProgramBreakdown => agg.program_breakdown(scope).await?.into_value(),
            Metric::ProgramPercentages => agg.program_percentages(scope).await?.into_value(),
            Metric::MachineBreakdown => agg.machine_breakdown(scope).await?.into_value(),
            Metric::RevenueComparison => agg.site_comparison(scope, SeriesKind::Revenue).await?.into_value(),
            Metric::CountComparison => agg.site_comparison(scope, SeriesKind::Count).await?.into_value(),
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot aggregation
// ---------------------------------------------------------------------------

fn cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_snapshots(metric: Metric, rows: &[PeriodAggregate], window: &CanonicalWindow) -> Result<MetricValue> {
    Ok(match metric {
        Metric::Revenue => {
            let total: i64 = rows.iter().map(|r| cents(r.total_revenue)).sum();
            (total as f64 / 100.0).into_value()
        }
        Metric::TransactionCount => rows
            .iter()
            .map(|r| r.total_transactions)
            .sum::<i64>()
            .into_value(),
        Metric::Summary => summary_from_snapshots(rows).into_value(),
        Metric::RevenueSeries => merge_series(rows, window, |r| r.revenue_series.as_ref()).into_value(),
        Metric::CountSeries => merge_series(rows, window, |r| r.count_series.as_ref()).into_value(),
        other => return Err(AppError::UnexpectedValue(other.name())),
    })
}

/// Start prices are per-row averages, so group revenue is rebuilt as
/// price × count before re-averaging across sites.
fn summary_from_snapshots(rows: &[PeriodAggregate]) -> Summary {
    let mut total_cents = 0i64;
    let mut summary = Summary::default();
    let (mut washer_cents, mut dryer_cents) = (0i64, 0i64);

    for row in rows {
        total_cents += cents(row.total_revenue);
        summary.total_transactions += row.total_transactions;
        summary.washer_transactions += row.washer_transactions;
        summary.dryer_transactions += row.dryer_transactions;
        washer_cents += cents(row.washer_start_price * row.washer_transactions as f64);
        dryer_cents += cents(row.dryer_start_price * row.dryer_transactions as f64);
    }

    let price = |group_cents: i64, count: i64| {
        if count == 0 {
            0.0
        } else {
            group_cents as f64 / 100.0 / count as f64
        }
    };
    summary.total_revenue = total_cents as f64 / 100.0;
    summary.washer_start_price = price(washer_cents, summary.washer_transactions);
    summary.dryer_start_price = price(dryer_cents, summary.dryer_transactions);
    summary
}

/// Sum embedded series by bucket label. Rows without a usable series are skipped.
fn merge_series<'a, F>(rows: &'a [PeriodAggregate], window: &CanonicalWindow, blob: F) -> TimeSeries
where
    F: Fn(&'a PeriodAggregate) -> Option<&'a SeriesBlob>,
{
    let mut interval = None;
    let mut merged: BTreeMap<String, i64> = BTreeMap::new();

    for row in rows {
        let Some(encoded) = blob(row) else {
            continue;
        };
        let series = match encoded.decode() {
            Ok(series) => series,
            Err(e) => {
                warn!(
                    site_id = %row.site_id,
                    period_key = %row.period_key,
                    "Skipping undecodable snapshot series: {e}",
                );
                continue;
            }
        };
        interval.get_or_insert(series.interval);
        for point in series.points {
            *merged.entry(point.label).or_default() += cents(point.value);
        }
    }

    TimeSeries {
        interval: interval.unwrap_or_else(|| interval_for_period(window)),
        points: merged
            .into_iter()
            .map(|(label, value)| SeriesPoint {
                label,
                value: value as f64 / 100.0,
            })
            .collect(),
    }
}
