use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PrepError;
use crate::join::records_for_columns;
use crate::metadata::{MISSING_LABEL_PART, SampleRecord};
use crate::normalize::{NormalizedTable, quantile};
use crate::table::CountTable;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub sample: String,
    pub label: String,
    pub group: String,
    pub library_size: f64,
    pub norm_factor: f64,
    pub detected_genes: usize,
    pub mean_log_cpm: f64,
    pub median_log_cpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub samples: usize,
    pub mean_log_cpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub genes: usize,
    pub samples: Vec<SampleSummary>,
    pub groups: Vec<GroupSummary>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-sample and per-group statistics; samples are grouped by the value of
/// `group_key` in their metadata.
pub fn summarize(
    aggregated: &CountTable,
    normalized: &NormalizedTable,
    records: &[SampleRecord],
    group_key: &str,
) -> Result<Summary, PrepError> {
    let columns = records_for_columns(aggregated, records)?;
    let group_key = group_key.trim().to_lowercase();

    let mut samples = Vec::with_capacity(columns.len());
    for (idx, record) in columns.iter().enumerate() {
        let counts = aggregated.column(idx);
        let log_cpm = normalized.table.column(idx);
        samples.push(SampleSummary {
            sample: record.sample_id.clone(),
            label: record.label.clone(),
            group: record
                .field(&group_key)
                .unwrap_or(MISSING_LABEL_PART)
                .to_string(),
            library_size: normalized.lib_sizes[idx],
            norm_factor: normalized.norm_factors[idx],
            detected_genes: counts.iter().filter(|&&count| count > 0.0).count(),
            mean_log_cpm: mean(&log_cpm),
            median_log_cpm: quantile(&log_cpm, 0.5),
        });
    }

    let mut grouped: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for sample in &samples {
        grouped
            .entry(sample.group.as_str())
            .or_default()
            .push(sample.mean_log_cpm);
    }
    let groups = grouped
        .into_iter()
        .map(|(group, means)| GroupSummary {
            group: group.to_string(),
            samples: means.len(),
            mean_log_cpm: mean(&means),
        })
        .collect();

    Ok(Summary {
        genes: aggregated.n_rows(),
        samples,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataKeys, parse_characteristics};
    use crate::normalize::{DEFAULT_PRIOR_COUNT, normalize};

    #[test]
    fn summarizes_samples_and_groups() {
        let counts = CountTable::new(
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["GSM1".to_string(), "GSM2".to_string(), "GSM3".to_string()],
            vec![
                vec![Some(10.0), Some(20.0), Some(5.0)],
                vec![Some(0.0), Some(4.0), Some(5.0)],
                vec![Some(30.0), Some(60.0), Some(5.0)],
            ],
        )
        .unwrap();
        let keys = MetadataKeys::default();
        let records = vec![
            parse_characteristics("GSM1", "a", &["disease state: AD".to_string()], &keys),
            parse_characteristics("GSM2", "b", &["disease state: AD".to_string()], &keys),
            parse_characteristics("GSM3", "c", &[], &keys),
        ];
        let normalized = normalize(&counts, DEFAULT_PRIOR_COUNT).unwrap();
        let summary = summarize(&counts, &normalized, &records, &keys.disease).unwrap();

        assert_eq!(summary.genes, 3);
        assert_eq!(summary.samples[0].detected_genes, 2);
        assert_eq!(summary.samples[1].library_size, 84.0);
        assert_eq!(summary.groups.len(), 2);
        assert_eq!(summary.groups[0].group, "AD");
        assert_eq!(summary.groups[0].samples, 2);
        assert_eq!(summary.groups[1].group, "NA");
    }
}
