use serde::Serialize;
use tracing::info;

use crate::table::CountTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanStep {
    pub rows_before: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub empty_symbol: CleanStep,
    pub negative: CleanStep,
    pub missing: CleanStep,
}

impl CleanReport {
    pub fn total_removed(&self) -> usize {
        self.empty_symbol.removed + self.negative.removed + self.missing.removed
    }
}

fn step<F>(table: CountTable, name: &str, keep: F) -> (CountTable, CleanStep)
where
    F: FnMut(&str, &[Option<f64>]) -> bool,
{
    let rows_before = table.n_rows();
    let kept = table.filter_rows(keep);
    let removed = rows_before - kept.n_rows();
    info!(step = name, rows_before, removed, "cleaned rows");
    (
        kept,
        CleanStep {
            rows_before,
            removed,
        },
    )
}

/// Removes rows with an empty symbol, then rows with a negative cell, then
/// rows with a missing cell.
pub fn clean_rows(table: &CountTable) -> (CountTable, CleanReport) {
    let (table, empty_symbol) = step(table.clone(), "empty_symbol", |id, _| {
        !id.trim().is_empty()
    });
    let (table, negative) = step(table, "negative", |_, row| {
        row.iter().all(|cell| cell.is_none_or(|value| value >= 0.0))
    });
    let (table, missing) = step(table, "missing", |_, row| row.iter().all(Option::is_some));
    (
        table,
        CleanReport {
            empty_symbol,
            negative,
            missing,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_each_kind_once() {
        let table = CountTable::new(
            vec![
                "TP53".to_string(),
                " ".to_string(),
                "BRCA1".to_string(),
                "EGFR".to_string(),
                "MYC".to_string(),
            ],
            vec!["s1".to_string(), "s2".to_string()],
            vec![
                vec![Some(1.0), Some(2.0)],
                vec![Some(1.0), Some(2.0)],
                vec![Some(-1.0), Some(2.0)],
                vec![None, Some(2.0)],
                vec![Some(-4.0), None],
            ],
        )
        .unwrap();

        let (cleaned, report) = clean_rows(&table);
        assert_eq!(cleaned.row_ids(), ["TP53".to_string()]);
        assert_eq!(report.empty_symbol, CleanStep { rows_before: 5, removed: 1 });
        assert_eq!(report.negative, CleanStep { rows_before: 4, removed: 2 });
        assert_eq!(report.missing, CleanStep { rows_before: 2, removed: 1 });
        assert_eq!(report.total_removed(), 4);
    }

    #[test]
    fn row_count_never_increases() {
        let table = CountTable::new(
            vec!["A".to_string(), "B".to_string()],
            vec!["s1".to_string()],
            vec![vec![Some(0.0)], vec![Some(5.0)]],
        )
        .unwrap();
        let (cleaned, report) = clean_rows(&table);
        assert_eq!(cleaned.n_rows(), 2);
        assert_eq!(report.total_removed(), 0);
        assert!(report.missing.rows_before <= report.negative.rows_before);
        assert!(report.negative.rows_before <= report.empty_symbol.rows_before);
    }
}
