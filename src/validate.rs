use serde::Serialize;
use tracing::info;

use crate::domain::is_transcript_id;
use crate::table::CountTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub rejected: usize,
}

pub fn validate_identifiers<S: AsRef<str>>(ids: &[S]) -> ValidationReport {
    let mut valid = Vec::new();
    let mut rejected = 0usize;
    for id in ids {
        let id = id.as_ref();
        if is_transcript_id(id) {
            valid.push(id.to_string());
        } else {
            rejected += 1;
        }
    }
    ValidationReport { valid, rejected }
}

/// Drops rows whose identifier fails validation; returns the rejected count.
pub fn filter_valid_rows(table: &CountTable) -> (CountTable, usize) {
    let filtered = table.filter_rows(|id, _| is_transcript_id(id));
    let rejected = table.n_rows() - filtered.n_rows();
    info!(
        rows = table.n_rows(),
        rejected, "validated transcript identifiers"
    );
    (filtered, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_transcript_ids() {
        let report = validate_identifiers(&[
            "ENST00000456328",
            "ENSG00000456328",
            "ENST123",
            "ENST00000450305.2",
        ]);
        assert_eq!(report.valid, vec!["ENST00000456328", "ENST00000450305.2"]);
        assert_eq!(report.rejected, 2);
    }

    #[test]
    fn filters_table_rows() {
        let table = CountTable::new(
            vec!["ENST00000456328".to_string(), "BADID".to_string()],
            vec!["s1".to_string()],
            vec![vec![Some(1.0)], vec![Some(2.0)]],
        )
        .unwrap();
        let (filtered, rejected) = filter_valid_rows(&table);
        assert_eq!(rejected, 1);
        assert_eq!(filtered.row_ids(), ["ENST00000456328".to_string()]);
    }
}
