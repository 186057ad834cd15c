use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::DRYER_UNIT_TYPES;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One metered machine run. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: String,
    pub site_id: String,
    pub occurred_at: NaiveDateTime,
    /// Minor currency units. Negative for reversals; revenue uses the magnitude.
    pub amount: i64,
    pub unit_name: String,
    pub unit_type: i64,
    pub temperature: i64,
    /// 0 = no soap, 1..=3 = detergent programs.
    pub soap: i64,
    /// Run duration. Values <= 0 mean unknown.
    pub seconds: i64,
    pub program_type: i64,
}

impl TransactionRecord {
    pub fn machine_kind(&self) -> MachineKind {
        MachineKind::from_unit_type(self.unit_type)
    }

    pub fn revenue_cents(&self) -> i64 {
        self.amount.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub bank_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    Washer,
    Dryer,
}

impl MachineKind {
    pub fn from_unit_type(unit_type: i64) -> Self {
        if DRYER_UNIT_TYPES.contains(&unit_type) {
            MachineKind::Dryer
        } else {
            MachineKind::Washer
        }
    }
}

impl std::fmt::Display for MachineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineKind::Washer => write!(f, "washer"),
            MachineKind::Dryer => write!(f, "dryer"),
        }
    }
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Week,
    Month,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

/// Ordered (label, value) points at one bucket interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub interval: Interval,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn empty(interval: Interval) -> Self {
        Self { interval, points: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.points.iter().map(|p| p.label.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }
}

/// Which quantity a series tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Revenue,
    Count,
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesKind::Revenue => write!(f, "revenue"),
            SeriesKind::Count => write!(f, "count"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metric results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelPercentage {
    pub label: String,
    pub count: i64,
    /// Share of the filtered total, rounded to 2 decimals.
    pub percentage: f64,
}

/// Run counts per machine unit name, split by machine kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineBreakdown {
    pub washers: Vec<LabelCount>,
    pub dryers: Vec<LabelCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_revenue: f64,
    pub total_transactions: i64,
    pub washer_transactions: i64,
    pub dryer_transactions: i64,
    pub washer_start_price: f64,
    pub dryer_start_price: f64,
}

impl Summary {
    /// Flat key/value view for tabular rendering.
    pub fn key_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("total_revenue", self.total_revenue),
            ("total_transactions", self.total_transactions as f64),
            ("washer_transactions", self.washer_transactions as f64),
            ("dryer_transactions", self.dryer_transactions as f64),
            ("washer_start_price", self.washer_start_price),
            ("dryer_start_price", self.dryer_start_price),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDataset {
    pub site: String,
    pub values: Vec<f64>,
}

/// Per-site series over a common label list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteComparison {
    pub kind: SeriesKind,
    pub interval: Interval,
    pub labels: Vec<String>,
    /// Keyed by site display name.
    pub per_site: BTreeMap<String, TimeSeries>,
    /// labels × values projection, one dataset per site, for multi-series charts.
    pub datasets: Vec<SiteDataset>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dryer_table_classifies_known_codes() {
        for code in [1, 18, 5] {
            assert_eq!(MachineKind::from_unit_type(code), MachineKind::Dryer, "code {code}");
        }
        for code in [2, 99, 0, -1] {
            assert_eq!(MachineKind::from_unit_type(code), MachineKind::Washer, "code {code}");
        }
    }

    #[test]
    fn revenue_uses_magnitude() {
        let tx = TransactionRecord {
            id: "t1".to_string(),
            site_id: "s1".to_string(),
            occurred_at: chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
                .and_then(|d| d.and_hms_opt(10, 0, 0))
                .unwrap(),
            amount: -200,
            unit_name: "W1".to_string(),
            unit_type: 2,
            temperature: 40,
            soap: 1,
            seconds: 60,
            program_type: 1,
        };
        assert_eq!(tx.revenue_cents(), 200);
        assert_eq!(tx.machine_kind(), MachineKind::Washer);
    }
}
