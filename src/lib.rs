//! Statistics resolution for laundromat sites: revenue, run counts, time
//! series and usage breakdowns, answered from precomputed period snapshots
//! when possible and from raw transactions otherwise.

pub mod aggregator;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod period;
pub mod refresh;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use engine::ResolutionEngine;
pub use error::{AppError, Result};
