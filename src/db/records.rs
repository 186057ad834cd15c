use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::warn;

use crate::db::models::DailyTotalRow;
use crate::error::Result;
use crate::types::{Site, TransactionRecord};

const TRANSACTION_COLUMNS: &str =
    "id, site_id, occurred_at, amount, unit_name, unit_type, temperature, soap, seconds, program_type";

// ---------------------------------------------------------------------------
// Query shape
// ---------------------------------------------------------------------------

/// Per-metric record predicates, applied in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub exclude_zero_amount: bool,
    pub exclude_zero_temperature: bool,
    pub exclude_zero_soap: bool,
}

impl TransactionFilter {
    /// Revenue and count metrics ignore zero-amount runs.
    pub const REVENUE: Self = Self {
        exclude_zero_amount: true,
        exclude_zero_temperature: false,
        exclude_zero_soap: false,
    };

    pub const TEMPERATURE: Self = Self {
        exclude_zero_amount: false,
        exclude_zero_temperature: true,
        exclude_zero_soap: false,
    };

    pub const SOAP: Self = Self {
        exclude_zero_amount: false,
        exclude_zero_temperature: false,
        exclude_zero_soap: true,
    };

    pub fn matches(&self, tx: &TransactionRecord) -> bool {
        !(self.exclude_zero_amount && tx.amount == 0)
            && !(self.exclude_zero_temperature && tx.temperature == 0)
            && !(self.exclude_zero_soap && tx.soap == 0)
    }
}

/// Site set + optional inclusive time bounds + filter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionQuery {
    pub site_ids: Vec<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub filter: TransactionFilter,
}

impl TransactionQuery {
    pub fn new(
        site_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        filter: TransactionFilter,
    ) -> Self {
        Self {
            site_ids: site_ids.to_vec(),
            start,
            end,
            filter,
        }
    }
}

/// Store-side daily rollup used for wide multi-site series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub revenue_cents: i64,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Read-only access to persisted transactions and sites.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn transactions(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>>;

    /// Σ|amount| and count per calendar day, grouped by the store.
    async fn daily_totals(&self, query: &TransactionQuery) -> Result<Vec<DailyTotal>>;

    async fn sites(&self, site_ids: &[String]) -> Result<Vec<Site>>;

    async fn all_site_ids(&self) -> Result<Vec<String>>;
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_conditions<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &'a TransactionQuery) {
    qb.push(" WHERE site_id IN (");
    let mut ids = qb.separated(", ");
    for id in &query.site_ids {
        ids.push_bind(id.as_str());
    }
    ids.push_unseparated(")");

    if let Some(start) = query.start {
        qb.push(" AND occurred_at >= ").push_bind(start);
    }
    if let Some(end) = query.end {
        qb.push(" AND occurred_at <= ").push_bind(end);
    }
    if query.filter.exclude_zero_amount {
        qb.push(" AND amount <> 0");
    }
    if query.filter.exclude_zero_temperature {
        qb.push(" AND temperature <> 0");
    }
    if query.filter.exclude_zero_soap {
        qb.push(" AND soap <> 0");
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn transactions(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>> {
        if query.site_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"));
        push_conditions(&mut qb, query);
        qb.push(" ORDER BY occurred_at");

        let rows = qb
            .build_query_as::<TransactionRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn daily_totals(&self, query: &TransactionQuery) -> Result<Vec<DailyTotal>> {
        if query.site_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(
            r#"
            SELECT
                substr(occurred_at, 1, 10) AS day,
                COALESCE(SUM(ABS(amount)), 0) AS revenue_cents,
                COUNT(*) AS count
            FROM transactions"#,
        );
        push_conditions(&mut qb, query);
        qb.push(" GROUP BY day ORDER BY day");

        let rows = qb
            .build_query_as::<DailyTotalRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match NaiveDate::parse_from_str(&row.day, "%Y-%m-%d") {
                Ok(day) => Some(DailyTotal {
                    day,
                    revenue_cents: row.revenue_cents,
                    count: row.count,
                }),
                Err(e) => {
                    warn!(day = %row.day, "Skipping daily total with unparseable day: {e}");
                    None
                }
            })
            .collect())
    }

    async fn sites(&self, site_ids: &[String]) -> Result<Vec<Site>> {
        if site_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new("SELECT id, name, bank_id FROM sites WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in site_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(") ORDER BY id");

        let rows = qb.build_query_as::<Site>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn all_site_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, insert_site, insert_tx, memory_pool, tx};

    async fn seeded() -> SqliteRecordStore {
        let pool = memory_pool().await;
        insert_site(&pool, "s1", "North").await;
        insert_site(&pool, "s2", "South").await;
        insert_tx(&pool, &tx("a", "s1", at(2025, 3, 1, 9), 100)).await;
        insert_tx(&pool, &tx("b", "s1", at(2025, 3, 1, 18), -200)).await;
        insert_tx(&pool, &tx("c", "s1", at(2025, 3, 2, 9), 0)).await;
        insert_tx(&pool, &tx("d", "s2", at(2025, 3, 3, 9), 50)).await;
        SqliteRecordStore::new(pool)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn transactions_respect_sites_range_and_filter() {
        let store = seeded().await;

        let all = store
            .transactions(&TransactionQuery::new(&ids(&["s1"]), None, None, TransactionFilter::default()))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let revenue = store
            .transactions(&TransactionQuery::new(&ids(&["s1"]), None, None, TransactionFilter::REVENUE))
            .await
            .unwrap();
        assert_eq!(revenue.len(), 2, "zero-amount run must be filtered");

        let ranged = store
            .transactions(&TransactionQuery::new(
                &ids(&["s1", "s2"]),
                Some(at(2025, 3, 1, 12)),
                Some(at(2025, 3, 3, 12)),
                TransactionFilter::default(),
            ))
            .await
            .unwrap();
        let got: Vec<&str> = ranged.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(got, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn daily_totals_group_by_day() {
        let store = seeded().await;
        let totals = store
            .daily_totals(&TransactionQuery::new(&ids(&["s1", "s2"]), None, None, TransactionFilter::REVENUE))
            .await
            .unwrap();

        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].day, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(totals[0].revenue_cents, 300);
        assert_eq!(totals[0].count, 2);
        assert_eq!(totals[1].revenue_cents, 50);
    }

    #[tokio::test]
    async fn empty_site_set_returns_nothing() {
        let store = seeded().await;
        let q = TransactionQuery::new(&[], None, None, TransactionFilter::default());
        assert!(store.transactions(&q).await.unwrap().is_empty());
        assert!(store.daily_totals(&q).await.unwrap().is_empty());
        assert!(store.sites(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sites_and_ids() {
        let store = seeded().await;
        let sites = store.sites(&ids(&["s2", "missing"])).await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].name, "South");
        assert_eq!(store.all_site_ids().await.unwrap(), ids(&["s1", "s2"]));
    }
}
