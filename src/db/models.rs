/// Database row types matching `migrations/0001_init.sql`.
/// Used by sqlx for typed queries; converted to domain types at the store boundary.
use chrono::NaiveDateTime;

#[derive(Debug, sqlx::FromRow)]
pub struct PeriodAggregateRow {
    pub site_id: String,
    pub period_type: String,
    pub period_key: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub total_revenue: f64,
    pub total_transactions: i64,
    pub washer_transactions: i64,
    pub dryer_transactions: i64,
    pub washer_start_price: f64,
    pub dryer_start_price: f64,
    pub series_flags: i64,
    pub revenue_series: Option<String>,
    pub count_series: Option<String>,
    pub last_calculated_at: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct DailyTotalRow {
    /// `YYYY-MM-DD` prefix of `occurred_at`.
    pub day: String,
    pub revenue_cents: i64,
    pub count: i64,
}
