use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PrepError;
use crate::metadata::SampleRecord;
use crate::table::CountTable;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRow {
    pub symbol: String,
    pub sample: String,
    pub label: String,
    pub value: Option<f64>,
    pub fields: BTreeMap<String, Option<String>>,
}

/// Count columns are named by GSM accession or by sample title.
pub fn find_record<'a>(records: &'a [SampleRecord], column: &str) -> Option<&'a SampleRecord> {
    records
        .iter()
        .find(|record| record.sample_id == column)
        .or_else(|| records.iter().find(|record| record.title == column))
}

/// Record for every column of `table`, in column order.
pub fn records_for_columns<'a>(
    table: &CountTable,
    records: &'a [SampleRecord],
) -> Result<Vec<&'a SampleRecord>, PrepError> {
    table
        .samples()
        .iter()
        .map(|column| {
            find_record(records, column)
                .ok_or_else(|| PrepError::MetadataMismatch(column.clone()))
        })
        .collect()
}

pub fn to_long_form(
    table: &CountTable,
    records: &[SampleRecord],
) -> Result<Vec<LongRow>, PrepError> {
    let columns = records_for_columns(table, records)?;
    let mut rows = Vec::with_capacity(table.n_rows() * table.n_samples());
    for (symbol, values) in table.rows() {
        for (record, value) in columns.iter().zip(values) {
            rows.push(LongRow {
                symbol: symbol.to_string(),
                sample: record.sample_id.clone(),
                label: record.label.clone(),
                value: *value,
                fields: record.fields.clone(),
            });
        }
    }
    Ok(rows)
}
