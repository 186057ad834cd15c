pub mod scheduler;
pub mod snapshot_refresher;

pub use scheduler::{next_run_after, RefreshHandle, RefreshRequest, RefreshScheduler};
pub use snapshot_refresher::{RefreshReport, SnapshotRefresher};
