use crate::error::PrepError;

/// Row-major count matrix. `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTable {
    row_ids: Vec<String>,
    samples: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
}

impl CountTable {
    pub fn new(
        row_ids: Vec<String>,
        samples: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, PrepError> {
        if row_ids.len() != values.len() {
            return Err(PrepError::Table(format!(
                "{} row ids for {} rows",
                row_ids.len(),
                values.len()
            )));
        }
        if let Some((idx, row)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != samples.len())
        {
            return Err(PrepError::Table(format!(
                "row {} ({}) has {} cells, expected {}",
                idx + 1,
                row_ids[idx],
                row.len(),
                samples.len()
            )));
        }
        Ok(Self {
            row_ids,
            samples,
            values,
        })
    }

    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn row(&self, idx: usize) -> &[Option<f64>] {
        &self.values[idx]
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.row_ids
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Column values with missing cells read as zero.
    pub fn column(&self, sample: usize) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| row[sample].unwrap_or(0.0))
            .collect()
    }

    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.samples.len()];
        for row in &self.values {
            for (sum, cell) in sums.iter_mut().zip(row) {
                *sum += cell.unwrap_or(0.0);
            }
        }
        sums
    }

    /// Snapshot keeping the rows for which `keep` returns true.
    pub fn filter_rows<F>(&self, mut keep: F) -> CountTable
    where
        F: FnMut(&str, &[Option<f64>]) -> bool,
    {
        let mut row_ids = Vec::new();
        let mut values = Vec::new();
        for (id, row) in self.rows() {
            if keep(id, row) {
                row_ids.push(id.to_string());
                values.push(row.to_vec());
            }
        }
        CountTable {
            row_ids,
            samples: self.samples.clone(),
            values,
        }
    }

    /// Snapshot with rows relabeled; rows mapped to `None` are dropped.
    pub fn relabel_rows<F>(&self, mut label: F) -> CountTable
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut row_ids = Vec::new();
        let mut values = Vec::new();
        for (id, row) in self.rows() {
            if let Some(new_id) = label(id) {
                row_ids.push(new_id);
                values.push(row.to_vec());
            }
        }
        CountTable {
            row_ids,
            samples: self.samples.clone(),
            values,
        }
    }

    /// Snapshot with sample columns renamed in place.
    pub fn rename_samples(&self, samples: Vec<String>) -> Result<CountTable, PrepError> {
        if samples.len() != self.samples.len() {
            return Err(PrepError::Table(format!(
                "cannot rename {} sample columns with {} names",
                self.samples.len(),
                samples.len()
            )));
        }
        Ok(CountTable {
            row_ids: self.row_ids.clone(),
            samples,
            values: self.values.clone(),
        })
    }
}
