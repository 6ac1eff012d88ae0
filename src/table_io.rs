use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::PrepError;
use crate::join::LongRow;
use crate::metadata::SampleRecord;
use crate::table::CountTable;

pub const MISSING: &str = "NA";

/// `.csv` (optionally gzipped) is comma-separated, everything else is tabbed.
pub fn delimiter_for(path: &Path) -> u8 {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".csv") { b',' } else { b'\t' }
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>, PrepError> {
    let file = File::open(path)
        .map_err(|err| PrepError::Filesystem(format!("open {}: {err}", path.display())))?;
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn parse_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"');
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(MISSING) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| !value.is_nan())
}

/// Reads a count table whose first column holds row ids. A header one field
/// shorter than the data rows (row-name column left unnamed) is accepted.
pub fn read_count_table(
    path: &Path,
    expected_samples: Option<usize>,
) -> Result<CountTable, PrepError> {
    let source = open_maybe_gz(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(false)
        .flexible(true)
        .from_reader(source);

    let mut records = reader.records();
    let header = records
        .next()
        .ok_or_else(|| PrepError::Table(format!("{} is empty", path.display())))??;
    let header = header
        .iter()
        .map(|field| field.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in records {
        rows.push(record?);
    }

    let samples = match rows.first() {
        Some(first) if first.len() == header.len() + 1 => header,
        _ => header.into_iter().skip(1).collect::<Vec<_>>(),
    };

    if let Some(expected) = expected_samples {
        if samples.len() != expected {
            return Err(PrepError::ShapeMismatch {
                path: path.display().to_string(),
                expected,
                found: samples.len(),
            });
        }
    }

    let mut row_ids = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    for (line, record) in rows.iter().enumerate() {
        if record.len() != samples.len() + 1 {
            return Err(PrepError::Table(format!(
                "{} data row {} has {} fields, expected {}",
                path.display(),
                line + 1,
                record.len(),
                samples.len() + 1
            )));
        }
        row_ids.push(record[0].trim().trim_matches('"').to_string());
        values.push(record.iter().skip(1).map(parse_cell).collect());
    }

    info!(
        path = %path.display(),
        rows = row_ids.len(),
        samples = samples.len(),
        "read count table"
    );
    CountTable::new(row_ids, samples, values)
}

fn format_cell(cell: Option<f64>) -> String {
    match cell {
        Some(value) => value.to_string(),
        None => MISSING.to_string(),
    }
}

/// Writes through a temp file in the destination directory, then renames.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), PrepError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), PrepError>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("kira-ep-table")
        .tempfile_in(parent)
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    write(temp.as_file_mut())?;
    persist(temp, path)
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<(), PrepError> {
    temp.persist(path)
        .map_err(|err| PrepError::Filesystem(format!("persist {}: {err}", path.display())))?;
    Ok(())
}

pub fn write_table(path: &Path, table: &CountTable, delimiter: u8) -> Result<(), PrepError> {
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(out);
        let mut header = vec!["gene".to_string()];
        header.extend(table.samples().iter().cloned());
        writer.write_record(&header)?;
        for (id, row) in table.rows() {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(id.to_string());
            record.extend(row.iter().copied().map(format_cell));
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|err| PrepError::Filesystem(err.to_string()))
    })?;
    info!(path = %path.display(), rows = table.n_rows(), "wrote table");
    Ok(())
}

fn metadata_keys<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a SampleRecord>,
{
    let mut keys = records
        .into_iter()
        .flat_map(|record| record.fields.keys().cloned())
        .collect::<Vec<_>>();
    keys.sort();
    keys.dedup();
    keys
}

pub fn write_metadata(path: &Path, records: &[SampleRecord]) -> Result<(), PrepError> {
    let keys = metadata_keys(records);
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(out);
        let mut header = vec![
            "sample_id".to_string(),
            "title".to_string(),
            "label".to_string(),
        ];
        header.extend(keys.iter().cloned());
        writer.write_record(&header)?;
        for record in records {
            let mut row = vec![
                record.sample_id.clone(),
                record.title.clone(),
                record.label.clone(),
            ];
            row.extend(keys.iter().map(|key| {
                record
                    .field(key)
                    .map(str::to_string)
                    .unwrap_or_else(|| MISSING.to_string())
            }));
            writer.write_record(&row)?;
        }
        writer
            .flush()
            .map_err(|err| PrepError::Filesystem(err.to_string()))
    })
}

pub fn write_long_form(path: &Path, rows: &[LongRow]) -> Result<(), PrepError> {
    let keys = {
        let mut keys = rows
            .iter()
            .flat_map(|row| row.fields.keys().cloned())
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        keys
    };
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new().delimiter(b',').from_writer(out);
        let mut header = vec![
            "symbol".to_string(),
            "sample".to_string(),
            "label".to_string(),
            "value".to_string(),
        ];
        header.extend(keys.iter().cloned());
        writer.write_record(&header)?;
        for row in rows {
            let mut record = vec![
                row.symbol.clone(),
                row.sample.clone(),
                row.label.clone(),
                format_cell(row.value),
            ];
            record.extend(keys.iter().map(|key| {
                row.fields
                    .get(key)
                    .and_then(|value| value.clone())
                    .unwrap_or_else(|| MISSING.to_string())
            }));
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|err| PrepError::Filesystem(err.to_string()))
    })?;
    info!(path = %path.display(), rows = rows.len(), "wrote long-form table");
    Ok(())
}
