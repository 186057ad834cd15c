//! Fixtures shared by the unit tests: in-memory SQLite, seed helpers and a
//! record store wrapper that counts how often raw records are read.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::db::{DailyTotal, PeriodAggregate, RecordStore, SqliteRecordStore, TransactionQuery};
use crate::error::Result;
use crate::period::{end_of_day, PeriodType};
use crate::types::{Site, TransactionRecord};

pub async fn memory_pool() -> SqlitePool {
    // One connection: every new connection to :memory: would be a fresh database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

pub fn at(y: i32, m: u32, d: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .expect("valid test timestamp")
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

/// A washer run with neutral codes; override fields with struct update syntax.
pub fn tx(id: &str, site_id: &str, occurred_at: NaiveDateTime, amount: i64) -> TransactionRecord {
    TransactionRecord {
        id: id.to_string(),
        site_id: site_id.to_string(),
        occurred_at,
        amount,
        unit_name: "W1".to_string(),
        unit_type: 2,
        temperature: 40,
        soap: 1,
        seconds: 60,
        program_type: 1,
    }
}

pub fn snapshot(site_id: &str, period_type: PeriodType, key: &str, revenue: f64) -> PeriodAggregate {
    PeriodAggregate {
        site_id: site_id.to_string(),
        period_type,
        period_key: key.to_string(),
        start: at(2025, 4, 1, 0),
        end: end_of_day(day(2025, 6, 30)),
        total_revenue: revenue,
        total_transactions: 3,
        washer_transactions: 2,
        dryer_transactions: 1,
        washer_start_price: 4.0,
        dryer_start_price: 2.5,
        revenue_series: None,
        count_series: None,
        last_calculated_at: at(2025, 5, 15, 3),
    }
}

pub async fn insert_site(pool: &SqlitePool, id: &str, name: &str) {
    sqlx::query("INSERT INTO sites (id, name, bank_id) VALUES (?, ?, NULL)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .expect("insert site");
}

pub async fn insert_tx(pool: &SqlitePool, t: &TransactionRecord) {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, site_id, occurred_at, amount, unit_name, unit_type,
            temperature, soap, seconds, program_type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&t.id)
    .bind(&t.site_id)
    .bind(t.occurred_at)
    .bind(t.amount)
    .bind(&t.unit_name)
    .bind(t.unit_type)
    .bind(t.temperature)
    .bind(t.soap)
    .bind(t.seconds)
    .bind(t.program_type)
    .execute(pool)
    .await
    .expect("insert transaction");
}

/// Delegates to SQLite and counts raw-record reads.
pub struct CountingRecordStore {
    inner: SqliteRecordStore,
    reads: AtomicUsize,
}

impl CountingRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteRecordStore::new(pool),
            reads: AtomicUsize::new(0),
        }
    }

    /// Calls to `transactions` + `daily_totals`.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for CountingRecordStore {
    async fn transactions(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.transactions(query).await
    }

    async fn daily_totals(&self, query: &TransactionQuery) -> Result<Vec<DailyTotal>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.daily_totals(query).await
    }

    async fn sites(&self, site_ids: &[String]) -> Result<Vec<Site>> {
        self.inner.sites(site_ids).await
    }

    async fn all_site_ids(&self) -> Result<Vec<String>> {
        self.inner.all_site_ids().await
    }
}
