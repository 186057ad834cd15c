use std::collections::BTreeMap;
use std::fmt::Display;

use crate::types::{LabelCount, LabelPercentage, MachineBreakdown, MachineKind, TransactionRecord};

/// Soap programs that make up the soap percentage breakdown.
pub const SOAP_PROGRAMS: [i64; 3] = [1, 2, 3];

/// Count records per discriminant, ordered by the discriminant.
pub fn count_by<K, F>(records: &[TransactionRecord], key: F) -> Vec<LabelCount>
where
    K: Ord + Display,
    F: Fn(&TransactionRecord) -> K,
{
    let mut counts: BTreeMap<K, i64> = BTreeMap::new();
    for record in records {
        *counts.entry(key(record)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(k, count)| LabelCount {
            label: k.to_string(),
            count,
        })
        .collect()
}

/// Share in hundredths of a percent, rounded half up. 0 when `total` is 0.
fn hundredths(count: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (count * 20_000 + total) / (total * 2)
}

fn with_share(c: &LabelCount, share: i64) -> LabelPercentage {
    LabelPercentage {
        label: c.label.clone(),
        count: c.count,
        percentage: share as f64 / 100.0,
    }
}

/// Each group's share of the total, rounded to 2 decimals independently.
pub fn percentages(counts: &[LabelCount]) -> Vec<LabelPercentage> {
    let total: i64 = counts.iter().map(|c| c.count).sum();
    counts
        .iter()
        .map(|c| with_share(c, hundredths(c.count, total)))
        .collect()
}

/// Like [`percentages`], but with exactly three groups the last one is
/// `100 - first - second` so the three always sum to exactly 100.
///
/// The forced value can differ from the third group's independently rounded
/// share by a hundredth when the first two round the same way. When both of
/// them round up it can drop below zero: counts (1, 19999, 0) give
/// 0.01, 100.00 and -0.01.
pub fn percentages_closing_third(counts: &[LabelCount]) -> Vec<LabelPercentage> {
    let total: i64 = counts.iter().map(|c| c.count).sum();
    match counts {
        [a, b, c] if total > 0 => {
            let pa = hundredths(a.count, total);
            let pb = hundredths(b.count, total);
            vec![
                with_share(a, pa),
                with_share(b, pb),
                with_share(c, 10_000 - pa - pb),
            ]
        }
        _ => percentages(counts),
    }
}

/// Counts for soap programs 1..=3, always all three in order (zero when absent).
/// Records with other soap codes are not part of the breakdown.
pub fn soap_counts(records: &[TransactionRecord]) -> Vec<LabelCount> {
    SOAP_PROGRAMS
        .iter()
        .map(|&program| LabelCount {
            label: program.to_string(),
            count: records.iter().filter(|r| r.soap == program).count() as i64,
        })
        .collect()
}

pub fn machine_breakdown(records: &[TransactionRecord]) -> MachineBreakdown {
    let (dryers, washers): (Vec<TransactionRecord>, Vec<TransactionRecord>) = records
        .iter()
        .cloned()
        .partition(|r| r.machine_kind() == MachineKind::Dryer);
    MachineBreakdown {
        washers: count_by(&washers, |r| r.unit_name.clone()),
        dryers: count_by(&dryers, |r| r.unit_name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, tx};

    fn with_soap(codes: &[i64]) -> Vec<TransactionRecord> {
        codes
            .iter()
            .enumerate()
            .map(|(i, &soap)| TransactionRecord {
                soap,
                ..tx(&format!("t{i}"), "s1", at(2025, 3, 1, 9), 100)
            })
            .collect()
    }

    fn sum_hundredths(p: &[LabelPercentage]) -> i64 {
        p.iter().map(|x| (x.percentage * 100.0).round() as i64).sum()
    }

    #[test]
    fn count_by_orders_by_key() {
        let records: Vec<TransactionRecord> = [60, 30, 60, 90]
            .iter()
            .enumerate()
            .map(|(i, &temperature)| TransactionRecord {
                temperature,
                ..tx(&format!("t{i}"), "s1", at(2025, 3, 1, 9), 100)
            })
            .collect();
        let counts = count_by(&records, |r| r.temperature);
        let got: Vec<(&str, i64)> = counts.iter().map(|c| (c.label.as_str(), c.count)).collect();
        assert_eq!(got, vec![("30", 1), ("60", 2), ("90", 1)]);
    }

    #[test]
    fn soap_thirds_sum_to_exactly_100() {
        let records = with_soap(&[1, 2, 3]);
        let pcts = percentages_closing_third(&soap_counts(&records));
        assert_eq!(pcts[0].percentage, 33.33);
        assert_eq!(pcts[1].percentage, 33.33);
        assert_eq!(pcts[2].percentage, 33.34);
        assert_eq!(sum_hundredths(&pcts), 10_000);
    }

    #[test]
    fn soap_fix_up_holds_for_uneven_mixes() {
        for codes in [
            vec![1, 1, 2, 3, 3, 3, 3],
            vec![1, 2, 2, 2, 2, 2],
            vec![3],
            vec![1, 1, 1, 2, 2, 3, 3, 3, 3, 3, 3],
        ] {
            let pcts = percentages_closing_third(&soap_counts(&with_soap(&codes)));
            assert_eq!(pcts.len(), 3);
            assert_eq!(sum_hundredths(&pcts), 10_000, "codes {codes:?}");
        }
    }

    #[test]
    fn closing_third_goes_negative_when_both_others_round_up() {
        let counts: Vec<LabelCount> = [("1", 1), ("2", 19_999), ("3", 0)]
            .iter()
            .map(|(label, count)| LabelCount { label: label.to_string(), count: *count })
            .collect();
        let p = percentages_closing_third(&counts);
        let got: Vec<f64> = p.iter().map(|x| x.percentage).collect();
        assert_eq!(got, vec![0.01, 100.0, -0.01]);
        assert_eq!(sum_hundredths(&p), 10_000);
    }

    #[test]
    fn soap_counts_ignore_unknown_programs() {
        let counts = soap_counts(&with_soap(&[1, 4, 3, 3]));
        let got: Vec<i64> = counts.iter().map(|c| c.count).collect();
        assert_eq!(got, vec![1, 0, 2]);
    }

    #[test]
    fn empty_breakdown_is_all_zero() {
        let pcts = percentages_closing_third(&soap_counts(&[]));
        assert!(pcts.iter().all(|p| p.percentage == 0.0 && p.count == 0));
    }

    #[test]
    fn independent_percentages_round_each_group() {
        let counts = vec![
            LabelCount { label: "a".to_string(), count: 1 },
            LabelCount { label: "b".to_string(), count: 2 },
        ];
        let pcts = percentages(&counts);
        assert_eq!(pcts[0].percentage, 33.33);
        assert_eq!(pcts[1].percentage, 66.67);
    }

    #[test]
    fn machines_split_by_dryer_table() {
        let records = vec![
            TransactionRecord { unit_type: 1, unit_name: "D1".to_string(), ..tx("a", "s1", at(2025, 3, 1, 9), 100) },
            TransactionRecord { unit_type: 18, unit_name: "D2".to_string(), ..tx("b", "s1", at(2025, 3, 1, 9), 100) },
            TransactionRecord { unit_type: 2, unit_name: "W1".to_string(), ..tx("c", "s1", at(2025, 3, 1, 9), 100) },
            TransactionRecord { unit_type: 99, unit_name: "W1".to_string(), ..tx("d", "s1", at(2025, 3, 1, 9), 100) },
        ];
        let breakdown = machine_breakdown(&records);
        assert_eq!(breakdown.dryers.len(), 2);
        assert_eq!(breakdown.washers, vec![LabelCount { label: "W1".to_string(), count: 2 }]);
    }
}
