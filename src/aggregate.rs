use std::collections::BTreeMap;

use tracing::info;

use crate::error::PrepError;
use crate::table::CountTable;

/// Sums rows sharing a symbol. Missing cells count as zero and the output is
/// ordered by symbol, so input row order does not matter.
pub fn aggregate_by_symbol(table: &CountTable) -> Result<CountTable, PrepError> {
    let width = table.n_samples();
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (symbol, row) in table.rows() {
        let sums = groups.entry(symbol).or_insert_with(|| vec![0.0; width]);
        for (sum, cell) in sums.iter_mut().zip(row) {
            *sum += cell.unwrap_or(0.0);
        }
    }

    let duplicates = table.n_rows() - groups.len();
    info!(
        rows = table.n_rows(),
        symbols = groups.len(),
        merged = duplicates,
        "aggregated rows by symbol"
    );

    let (row_ids, values): (Vec<_>, Vec<_>) = groups
        .into_iter()
        .map(|(symbol, sums)| {
            (
                symbol.to_string(),
                sums.into_iter().map(Some).collect::<Vec<_>>(),
            )
        })
        .unzip();
    CountTable::new(row_ids, table.samples().to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ids: &[&str], values: Vec<Vec<Option<f64>>>) -> CountTable {
        CountTable::new(
            ids.iter().map(|id| id.to_string()).collect(),
            vec!["s1".to_string(), "s2".to_string()],
            values,
        )
        .unwrap()
    }

    #[test]
    fn sums_duplicate_symbols() {
        let input = table(
            &["TP53", "EGFR", "TP53"],
            vec![
                vec![Some(1.0), Some(2.0)],
                vec![Some(5.0), Some(0.0)],
                vec![Some(3.0), None],
            ],
        );
        let out = aggregate_by_symbol(&input).unwrap();
        assert_eq!(out.row_ids(), ["EGFR".to_string(), "TP53".to_string()]);
        assert_eq!(out.row(1), [Some(4.0), Some(2.0)]);
        assert_eq!(out.row(0), [Some(5.0), Some(0.0)]);
    }

    #[test]
    fn permutation_does_not_change_result() {
        let rows = vec![
            ("A", vec![Some(1.0), Some(7.0)]),
            ("B", vec![Some(2.0), Some(0.0)]),
            ("A", vec![Some(4.0), Some(1.0)]),
            ("C", vec![None, Some(3.0)]),
            ("B", vec![Some(6.0), Some(2.0)]),
        ];
        let forward = table(
            &rows.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            rows.iter().map(|(_, v)| v.clone()).collect(),
        );
        let reversed = table(
            &rows.iter().rev().map(|(id, _)| *id).collect::<Vec<_>>(),
            rows.iter().rev().map(|(_, v)| v.clone()).collect(),
        );
        assert_eq!(
            aggregate_by_symbol(&forward).unwrap(),
            aggregate_by_symbol(&reversed).unwrap()
        );
    }
}
