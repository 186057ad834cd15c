use serde::{Deserialize, Serialize};

use crate::types::{
    LabelCount, LabelPercentage, MachineBreakdown, SiteComparison, Summary, TimeSeries,
};

/// Every metric family the engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Revenue,
    TransactionCount,
    Summary,
    RevenueSeries,
    CountSeries,
    AverageDuration,
    TemperatureBreakdown,
    TemperaturePercentages,
    SoapBreakdown,
    SoapPercentages,
    ProgramBreakdown,
    ProgramPercentages,
    MachineBreakdown,
    RevenueComparison,
    CountComparison,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Revenue => "revenue",
            Metric::TransactionCount => "transaction_count",
            Metric::Summary => "summary",
            Metric::RevenueSeries => "revenue_series",
            Metric::CountSeries => "count_series",
            Metric::AverageDuration => "average_duration",
            Metric::TemperatureBreakdown => "temperature_breakdown",
            Metric::TemperaturePercentages => "temperature_percentages",
            Metric::SoapBreakdown => "soap_breakdown",
            Metric::SoapPercentages => "soap_percentages",
            Metric::ProgramBreakdown => "program_breakdown",
            Metric::ProgramPercentages => "program_percentages",
            Metric::MachineBreakdown => "machine_breakdown",
            Metric::RevenueComparison => "revenue_comparison",
            Metric::CountComparison => "count_comparison",
        }
    }

    /// Whether a snapshot row carries enough to answer this metric.
    pub fn snapshot_backed(&self) -> bool {
        matches!(
            self,
            Metric::Revenue
                | Metric::TransactionCount
                | Metric::Summary
                | Metric::RevenueSeries
                | Metric::CountSeries
        )
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// MetricValue: the cached form of any metric result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Amount(f64),
    Count(i64),
    Summary(Summary),
    Series(TimeSeries),
    Counts(Vec<LabelCount>),
    Percentages(Vec<LabelPercentage>),
    Machines(MachineBreakdown),
    Comparison(SiteComparison),
}

/// Conversion between a concrete result type and its cached form.
pub trait CachedMetric: Sized {
    fn into_value(self) -> MetricValue;
    fn from_value(value: MetricValue) -> Option<Self>;
}

macro_rules! cached_metric {
    ($ty:ty, $variant:ident) => {
        impl CachedMetric for $ty {
            fn into_value(self) -> MetricValue {
                MetricValue::$variant(self)
            }

            fn from_value(value: MetricValue) -> Option<Self> {
                match value {
                    MetricValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

cached_metric!(f64, Amount);
cached_metric!(i64, Count);
cached_metric!(Summary, Summary);
cached_metric!(TimeSeries, Series);
cached_metric!(Vec<LabelCount>, Counts);
cached_metric!(Vec<LabelPercentage>, Percentages);
cached_metric!(MachineBreakdown, Machines);
cached_metric!(SiteComparison, Comparison);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_values_only_unwrap_to_their_own_type() {
        let v = 12.5f64.into_value();
        assert_eq!(f64::from_value(v.clone()), Some(12.5));
        assert_eq!(i64::from_value(v), None);
    }

    #[test]
    fn breakdowns_are_not_snapshot_backed() {
        assert!(Metric::Revenue.snapshot_backed());
        assert!(Metric::CountSeries.snapshot_backed());
        assert!(!Metric::SoapPercentages.snapshot_backed());
        assert!(!Metric::RevenueComparison.snapshot_backed());
    }
}
