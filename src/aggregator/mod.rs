pub mod breakdown;
pub mod buckets;
pub mod on_demand;

pub use buckets::{bucket_label, bucket_labels, interval_for_period, interval_for_span, Buckets};
pub use on_demand::{OnDemandAggregator, PeriodMetrics, Scope};
