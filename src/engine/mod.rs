pub mod metric;
pub mod resolver;

pub use metric::{CachedMetric, Metric, MetricValue};
pub use resolver::ResolutionEngine;
