use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::future::try_join_all;
use tracing::debug;

use crate::aggregator::breakdown::{
    count_by, machine_breakdown, percentages, percentages_closing_third, soap_counts,
};
use crate::aggregator::buckets::{interval_for_span, Buckets};
use crate::config::{LARGE_REQUEST_MIN_DAYS, LARGE_REQUEST_MIN_SITES};
use crate::db::{RecordStore, TransactionFilter, TransactionQuery};
use crate::error::{AppError, Result};
use crate::types::{
    Interval, LabelCount, LabelPercentage, MachineBreakdown, MachineKind, SeriesKind,
    SiteComparison, SiteDataset, Summary, TimeSeries, TransactionRecord,
};

// ---------------------------------------------------------------------------
// Scope: what a metric is computed over
// ---------------------------------------------------------------------------

/// Sorted distinct site ids plus optional inclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub site_ids: Vec<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Scope {
    pub fn new(site_ids: &[String], start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        let mut site_ids = site_ids.to_vec();
        site_ids.sort();
        site_ids.dedup();
        Self { site_ids, start, end }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => Err(AppError::InvalidRange { start, end }),
            _ => Ok(()),
        }
    }

    /// Both bounds, for operations whose contract requires a closed range.
    pub fn bounds(&self) -> Result<(NaiveDateTime, NaiveDateTime)> {
        let start = self.start.ok_or(AppError::MissingParameter("start_date"))?;
        let end = self.end.ok_or(AppError::MissingParameter("end_date"))?;
        if end < start {
            return Err(AppError::InvalidRange { start, end });
        }
        Ok((start, end))
    }

    pub fn query(&self, filter: TransactionFilter) -> TransactionQuery {
        TransactionQuery::new(&self.site_ids, self.start, self.end, filter)
    }

    fn with_sites(&self, site_ids: Vec<String>) -> Self {
        Self { site_ids, start: self.start, end: self.end }
    }
}

// ---------------------------------------------------------------------------
// Pure aggregations over materialized records
// ---------------------------------------------------------------------------

/// Σ|amount| in major units.
pub fn revenue_of(records: &[TransactionRecord]) -> f64 {
    cents_of(records.iter()) as f64 / 100.0
}

fn cents_of<'a>(records: impl Iterator<Item = &'a TransactionRecord>) -> i64 {
    records.map(TransactionRecord::revenue_cents).sum()
}

/// Mean run time in minutes over runs with a known (positive) duration.
pub fn average_duration_of(records: &[TransactionRecord]) -> f64 {
    let (total, n) = records
        .iter()
        .filter(|r| r.seconds > 0)
        .fold((0i64, 0i64), |(total, n), r| (total + r.seconds, n + 1));
    if n == 0 {
        return 0.0;
    }
    total as f64 / n as f64 / 60.0
}

pub fn summary_of(records: &[TransactionRecord]) -> Summary {
    let (dryers, washers): (Vec<&TransactionRecord>, Vec<&TransactionRecord>) =
        records.iter().partition(|r| r.machine_kind() == MachineKind::Dryer);

    let start_price = |group: &[&TransactionRecord]| {
        if group.is_empty() {
            0.0
        } else {
            cents_of(group.iter().copied()) as f64 / 100.0 / group.len() as f64
        }
    };

    Summary {
        total_revenue: revenue_of(records),
        total_transactions: records.len() as i64,
        washer_transactions: washers.len() as i64,
        dryer_transactions: dryers.len() as i64,
        washer_start_price: start_price(washers.as_slice()),
        dryer_start_price: start_price(dryers.as_slice()),
    }
}

fn series_of(
    records: &[TransactionRecord],
    kind: SeriesKind,
    first: NaiveDate,
    last: NaiveDate,
    interval: Interval,
) -> TimeSeries {
    let mut buckets = Buckets::zero_filled(first, last, interval);
    for record in records {
        let amount = match kind {
            SeriesKind::Revenue => record.revenue_cents(),
            SeriesKind::Count => 1,
        };
        buckets.add(record.occurred_at.date(), amount);
    }
    buckets.into_series(divisor(kind))
}

fn divisor(kind: SeriesKind) -> f64 {
    match kind {
        SeriesKind::Revenue => 100.0,
        SeriesKind::Count => 1.0,
    }
}

/// Everything a snapshot row stores, computed from one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMetrics {
    pub summary: Summary,
    pub revenue_series: TimeSeries,
    pub count_series: TimeSeries,
}

// ---------------------------------------------------------------------------
// OnDemandAggregator
// ---------------------------------------------------------------------------

/// Computes metrics directly from raw records.
pub struct OnDemandAggregator {
    records: Arc<dyn RecordStore>,
}

impl OnDemandAggregator {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    async fn fetch(&self, scope: &Scope, filter: TransactionFilter) -> Result<Vec<TransactionRecord>> {
        scope.validate()?;
        if scope.site_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.records.transactions(&scope.query(filter)).await
    }

    pub async fn revenue(&self, scope: &Scope) -> Result<f64> {
        Ok(revenue_of(&self.fetch(scope, TransactionFilter::REVENUE).await?))
    }

    pub async fn transaction_count(&self, scope: &Scope) -> Result<i64> {
        Ok(self.fetch(scope, TransactionFilter::REVENUE).await?.len() as i64)
    }

    pub async fn average_duration(&self, scope: &Scope) -> Result<f64> {
        Ok(average_duration_of(&self.fetch(scope, TransactionFilter::default()).await?))
    }

    pub async fn summary(&self, scope: &Scope) -> Result<Summary> {
        Ok(summary_of(&self.fetch(scope, TransactionFilter::REVENUE).await?))
    }

    pub async fn temperature_breakdown(&self, scope: &Scope) -> Result<Vec<LabelCount>> {
        let records = self.fetch(scope, TransactionFilter::TEMPERATURE).await?;
        Ok(count_by(&records, |r| r.temperature))
    }

    pub async fn temperature_percentages(&self, scope: &Scope) -> Result<Vec<LabelPercentage>> {
        Ok(percentages(&self.temperature_breakdown(scope).await?))
    }

    pub async fn soap_breakdown(&self, scope: &Scope) -> Result<Vec<LabelCount>> {
        let records = self.fetch(scope, TransactionFilter::default()).await?;
        Ok(count_by(&records, |r| r.soap))
    }

    pub async fn soap_percentages(&self, scope: &Scope) -> Result<Vec<LabelPercentage>> {
        let records = self.fetch(scope, TransactionFilter::SOAP).await?;
        Ok(percentages_closing_third(&soap_counts(&records)))
    }

    pub async fn program_breakdown(&self, scope: &Scope) -> Result<Vec<LabelCount>> {
        let records = self.fetch(scope, TransactionFilter::default()).await?;
        Ok(count_by(&records, |r| r.program_type))
    }

    pub async fn program_percentages(&self, scope: &Scope) -> Result<Vec<LabelPercentage>> {
        Ok(percentages(&self.program_breakdown(scope).await?))
    }

    pub async fn machine_breakdown(&self, scope: &Scope) -> Result<MachineBreakdown> {
        let records = self.fetch(scope, TransactionFilter::REVENUE).await?;
        Ok(machine_breakdown(&records))
    }

    /// Zero-filled series with the span-driven interval.
    pub async fn series(&self, scope: &Scope, kind: SeriesKind) -> Result<TimeSeries> {
        let (start, end) = scope.bounds()?;
        let interval = interval_for_span(start.date(), end.date());
        self.series_with_interval(scope, kind, interval).await
    }

    /// Zero-filled series at an explicit interval.
    ///
    /// Wide multi-site requests are grouped per day by the store and folded
    /// into buckets here; both paths sum the same integers, so they agree.
    pub async fn series_with_interval(
        &self,
        scope: &Scope,
        kind: SeriesKind,
        interval: Interval,
    ) -> Result<TimeSeries> {
        let (start, end) = scope.bounds()?;
        let (first, last) = (start.date(), end.date());

        let large = (last - first).num_days() > LARGE_REQUEST_MIN_DAYS
            && scope.site_ids.len() > LARGE_REQUEST_MIN_SITES;
        if !large {
            let records = self.fetch(scope, TransactionFilter::REVENUE).await?;
            return Ok(series_of(&records, kind, first, last, interval));
        }

        debug!(
            sites = scope.site_ids.len(),
            days = (last - first).num_days(),
            "Grouping series in the store",
        );
        let totals = self
            .records
            .daily_totals(&scope.query(TransactionFilter::REVENUE))
            .await?;
        let mut buckets = Buckets::zero_filled(first, last, interval);
        for total in &totals {
            let amount = match kind {
                SeriesKind::Revenue => total.revenue_cents,
                SeriesKind::Count => total.count,
            };
            buckets.add(total.day, amount);
        }
        Ok(buckets.into_series(divisor(kind)))
    }

    /// Summary plus both series at `interval`, from a single scan.
    pub async fn period_metrics(&self, scope: &Scope, interval: Interval) -> Result<PeriodMetrics> {
        let (start, end) = scope.bounds()?;
        let (first, last) = (start.date(), end.date());
        let records = self.fetch(scope, TransactionFilter::REVENUE).await?;
        Ok(PeriodMetrics {
            summary: summary_of(&records),
            revenue_series: series_of(&records, SeriesKind::Revenue, first, last, interval),
            count_series: series_of(&records, SeriesKind::Count, first, last, interval),
        })
    }

    /// One series per site over a shared label list, keyed by site name.
    pub async fn site_comparison(&self, scope: &Scope, kind: SeriesKind) -> Result<SiteComparison> {
        let (start, end) = scope.bounds()?;
        let interval = interval_for_span(start.date(), end.date());

        let names: HashMap<String, String> = self
            .records
            .sites(&scope.site_ids)
            .await?
            .into_iter()
            .map(|site| (site.id, site.name))
            .collect();

        let per_site = try_join_all(scope.site_ids.iter().map(|id| {
            let site_scope = scope.with_sites(vec![id.clone()]);
            async move {
                let series = self.series_with_interval(&site_scope, kind, interval).await?;
                Ok::<_, AppError>((id, series))
            }
        }))
        .await?;

        let labels = Buckets::zero_filled(start.date(), end.date(), interval)
            .labels()
            .to_vec();
        let mut by_name: BTreeMap<String, TimeSeries> = BTreeMap::new();
        let mut datasets = Vec::with_capacity(per_site.len());
        for (id, series) in per_site {
            let name = names.get(id).cloned().unwrap_or_else(|| id.clone());
            datasets.push(SiteDataset {
                site: name.clone(),
                values: series.values(),
            });
            by_name.insert(name, series);
        }

        Ok(SiteComparison {
            kind,
            interval,
            labels,
            per_site: by_name,
            datasets,
        })
    }
}
