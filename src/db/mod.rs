pub mod models;
pub mod records;
pub mod snapshots;

pub use records::{DailyTotal, RecordStore, SqliteRecordStore, TransactionFilter, TransactionQuery};
pub use snapshots::{PeriodAggregate, SeriesBlob, SnapshotStore, SqliteSnapshotStore};
