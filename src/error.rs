use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The record or snapshot store could not serve the query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// A cached or computed value did not have the shape its metric produces.
    #[error("Unexpected value for metric {0}")]
    UnexpectedValue(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
