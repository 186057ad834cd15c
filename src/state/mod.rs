pub mod metric_cache;

pub use metric_cache::{CacheKey, CacheTier, MetricCache};
