//! TMM scale factors and log2 counts-per-million.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::PrepError;
use crate::table::CountTable;

pub const DEFAULT_PRIOR_COUNT: f64 = 2.0;
const LOGRATIO_TRIM: f64 = 0.3;
const SUM_TRIM: f64 = 0.05;
const REF_QUANTILE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTable {
    #[serde(skip)]
    pub table: CountTable,
    pub lib_sizes: Vec<f64>,
    pub norm_factors: Vec<f64>,
    pub prior_count: f64,
}

/// Type 7 sample quantile of unsorted values.
pub fn quantile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// 1-based ranks with ties sharing their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order = (0..values.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(Ordering::Equal)
    });
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

fn tmm_factor(obs: &[f64], reference: &[f64], lib_obs: f64, lib_ref: f64) -> f64 {
    let mut log_ratio = Vec::new();
    let mut abs_expr = Vec::new();
    let mut variance = Vec::new();
    for (&o, &r) in obs.iter().zip(reference) {
        let po = o / lib_obs;
        let pr = r / lib_ref;
        let m = (po / pr).log2();
        let a = (po.log2() + pr.log2()) / 2.0;
        if !m.is_finite() || !a.is_finite() {
            continue;
        }
        log_ratio.push(m);
        abs_expr.push(a);
        variance.push((lib_obs - o) / lib_obs / o + (lib_ref - r) / lib_ref / r);
    }

    let max_abs = log_ratio.iter().fold(0.0_f64, |acc, m| acc.max(m.abs()));
    if log_ratio.is_empty() || max_abs < 1e-6 {
        return 1.0;
    }

    let n = log_ratio.len() as f64;
    let lo_l = (n * LOGRATIO_TRIM).floor() + 1.0;
    let hi_l = n + 1.0 - lo_l;
    let lo_s = (n * SUM_TRIM).floor() + 1.0;
    let hi_s = n + 1.0 - lo_s;

    let rank_m = average_ranks(&log_ratio);
    let rank_a = average_ranks(&abs_expr);
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for idx in 0..log_ratio.len() {
        let keep = rank_m[idx] >= lo_l
            && rank_m[idx] <= hi_l
            && rank_a[idx] >= lo_s
            && rank_a[idx] <= hi_s;
        if keep {
            numerator += log_ratio[idx] / variance[idx];
            denominator += 1.0 / variance[idx];
        }
    }
    let mean = numerator / denominator;
    if mean.is_finite() { mean.exp2() } else { 1.0 }
}

/// TMM normalization factors, rescaled to a geometric mean of one.
pub fn tmm_factors(table: &CountTable) -> Result<Vec<f64>, PrepError> {
    let lib_sizes = table.column_sums();
    if let Some(idx) = lib_sizes.iter().position(|&lib| lib <= 0.0) {
        return Err(PrepError::Normalization(format!(
            "sample {} has a library size of zero",
            table.samples()[idx]
        )));
    }
    let columns = (0..table.n_samples())
        .map(|idx| table.column(idx))
        .collect::<Vec<_>>();

    let upper = columns
        .iter()
        .zip(&lib_sizes)
        .map(|(column, lib)| quantile(column, REF_QUANTILE) / lib)
        .collect::<Vec<_>>();
    let mean_upper = upper.iter().sum::<f64>() / upper.len() as f64;
    let reference = upper
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - mean_upper)
                .abs()
                .partial_cmp(&(*b - mean_upper).abs())
                .unwrap_or(Ordering::Equal)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    debug!(reference = %table.samples()[reference], "selected TMM reference sample");

    let raw = columns
        .iter()
        .zip(&lib_sizes)
        .map(|(column, &lib)| {
            tmm_factor(column, &columns[reference], lib, lib_sizes[reference])
        })
        .collect::<Vec<_>>();
    let log_mean = raw.iter().map(|f| f.ln()).sum::<f64>() / raw.len() as f64;
    let scale = log_mean.exp();
    Ok(raw.into_iter().map(|f| f / scale).collect())
}

/// log2 CPM on TMM-adjusted library sizes. The prior count is scaled by each
/// sample's relative library size and keeps zero counts finite.
pub fn normalize(table: &CountTable, prior_count: f64) -> Result<NormalizedTable, PrepError> {
    if table.n_samples() == 0 {
        return Err(PrepError::Normalization("table has no samples".to_string()));
    }
    if !(prior_count > 0.0) {
        return Err(PrepError::Normalization(format!(
            "prior count must be positive, got {prior_count}"
        )));
    }
    let lib_sizes = table.column_sums();
    if table.n_rows() == 0 {
        info!(samples = table.n_samples(), "no genes left to normalize");
        return Ok(NormalizedTable {
            table: table.clone(),
            norm_factors: vec![1.0; lib_sizes.len()],
            lib_sizes,
            prior_count,
        });
    }
    let norm_factors = tmm_factors(table)?;

    let effective = lib_sizes
        .iter()
        .zip(&norm_factors)
        .map(|(lib, factor)| lib * factor)
        .collect::<Vec<_>>();
    let mean_effective = effective.iter().sum::<f64>() / effective.len() as f64;
    let priors = effective
        .iter()
        .map(|lib| prior_count * lib / mean_effective)
        .collect::<Vec<_>>();

    let values = table
        .rows()
        .map(|(_, row)| {
            row.iter()
                .enumerate()
                .map(|(idx, cell)| {
                    let count = cell.unwrap_or(0.0);
                    let denominator = (effective[idx] + 2.0 * priors[idx]) * 1e-6;
                    Some(((count + priors[idx]) / denominator).log2())
                })
                .collect()
        })
        .collect();
    let normalized = CountTable::new(table.row_ids().to_vec(), table.samples().to_vec(), values)?;

    info!(
        rows = normalized.n_rows(),
        samples = normalized.n_samples(),
        "normalized counts to log2 CPM"
    );
    Ok(NormalizedTable {
        table: normalized,
        lib_sizes,
        norm_factors,
        prior_count,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table(columns: &[Vec<f64>]) -> CountTable {
        let n_rows = columns[0].len();
        CountTable::new(
            (0..n_rows).map(|idx| format!("G{idx}")).collect(),
            (0..columns.len()).map(|idx| format!("s{idx}")).collect(),
            (0..n_rows)
                .map(|row| columns.iter().map(|col| Some(col[row])).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn quantile_interpolates() {
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.75), 3.25);
        assert_eq!(quantile(&[5.0], 0.75), 5.0);
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(average_ranks(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn identical_samples_get_unit_factors() {
        let col = vec![10.0, 0.0, 25.0, 3.0, 7.0];
        let factors = tmm_factors(&table(&[col.clone(), col.clone(), col])).unwrap();
        assert!(factors.iter().all(|f| (f - 1.0).abs() < 1e-12));
    }

    #[test]
    fn scaled_sample_normalizes_to_same_values() {
        let col = vec![10.0, 0.0, 25.0, 3.0, 7.0, 100.0];
        let doubled = col.iter().map(|v| v * 2.0).collect::<Vec<_>>();
        let out = normalize(&table(&[col, doubled]), DEFAULT_PRIOR_COUNT).unwrap();
        assert_eq!(out.table.n_rows(), 6);
        assert_eq!(out.table.n_samples(), 2);
        for (_, row) in out.table.rows() {
            let a = row[0].unwrap();
            let b = row[1].unwrap();
            assert!(a.is_finite());
            assert!((a - b).abs() < 1e-9, "{a} != {b}");
        }
    }

    #[test]
    fn composition_outlier_is_trimmed() {
        let base = vec![10.0; 20];
        let mut skewed = base.clone();
        skewed[0] = 1000.0;
        let counts = table(&[base, skewed]);
        let out = normalize(&counts, DEFAULT_PRIOR_COUNT).unwrap();
        let effective = out
            .lib_sizes
            .iter()
            .zip(&out.norm_factors)
            .map(|(lib, f)| lib * f)
            .collect::<Vec<_>>();
        assert!((effective[0] - effective[1]).abs() < 1e-6);
        let product: f64 = out.norm_factors.iter().product();
        assert!((product - 1.0).abs() < 1e-9);
        let row = out.table.row(5);
        assert!((row[0].unwrap() - row[1].unwrap()).abs() < 1e-9);
    }

    #[test]
    fn empty_table_keeps_its_shape() {
        let counts = CountTable::new(
            Vec::new(),
            vec!["GSM1".to_string(), "GSM2".to_string()],
            Vec::new(),
        )
        .unwrap();
        let out = normalize(&counts, DEFAULT_PRIOR_COUNT).unwrap();
        assert_eq!(out.table.n_rows(), 0);
        assert_eq!(out.table.samples(), counts.samples());
        assert_eq!(out.norm_factors, vec![1.0, 1.0]);
        assert_eq!(out.lib_sizes, vec![0.0, 0.0]);
    }

    #[test]
    fn zero_library_is_fatal() {
        let counts = table(&[vec![1.0, 2.0], vec![0.0, 0.0]]);
        assert_matches!(
            normalize(&counts, DEFAULT_PRIOR_COUNT),
            Err(PrepError::Normalization(_))
        );
    }
}
