use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use serde::Serialize;

use crate::aggregate::aggregate_by_symbol;
use crate::clean::{CleanReport, clean_rows};
use crate::config::ResolvedConfig;
use crate::error::PrepError;
use crate::geo::{
    GeoClient, extract_organism, extract_supplementary_urls, file_name_from_url,
    select_counts_url,
};
use crate::join::to_long_form;
use crate::metadata::{SampleRecord, parse_records, parse_soft_samples};
use crate::normalize::normalize;
use crate::resolve::{ResolutionReport, SymbolResolver, resolve_rows};
use crate::store::{CacheAction, Store};
use crate::summary::{Summary, summarize};
use crate::table::CountTable;
use crate::table_io::{read_count_table, write_long_form, write_metadata, write_table};
use crate::validate::filter_valid_rows;

pub const AGGREGATED_FILE: &str = "aggregated_counts.tsv";
pub const NORMALIZED_FILE: &str = "normalized_logcpm.tsv";
pub const LONG_FORM_FILE: &str = "long_form.csv";
pub const METADATA_FILE: &str = "metadata.tsv";
pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreparationReport {
    pub input_rows: usize,
    pub rejected_ids: usize,
    pub resolution: ResolutionReport,
    pub cleaning: CleanReport,
    pub genes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    Local,
    Cached,
    Downloaded,
}

impl From<CacheAction> for InputSource {
    fn from(action: CacheAction) -> Self {
        match action {
            CacheAction::Cached => InputSource::Cached,
            CacheAction::Downloaded => InputSource::Downloaded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifacts {
    pub aggregated: String,
    pub normalized: String,
    pub long_form: String,
    pub metadata: String,
    pub report: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizationReport {
    pub prior_count: f64,
    pub lib_sizes: Vec<f64>,
    pub norm_factors: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub accession: String,
    pub organism: Option<String>,
    pub generated_at: String,
    pub counts_path: String,
    pub counts_source: InputSource,
    pub soft_source: InputSource,
    pub samples: usize,
    pub preparation: PreparationReport,
    pub normalization: NormalizationReport,
    pub summary: Summary,
    pub artifacts: Artifacts,
}

/// Validate, resolve, clean and aggregate a raw transcript count table.
pub fn prepare_counts(
    raw: &CountTable,
    resolver: &dyn SymbolResolver,
) -> Result<(CountTable, PreparationReport), PrepError> {
    let (valid, rejected_ids) = filter_valid_rows(raw);
    let (resolved, resolution) = resolve_rows(&valid, resolver)?;
    let (cleaned, cleaning) = clean_rows(&resolved);
    let aggregated = aggregate_by_symbol(&cleaned)?;
    let report = PreparationReport {
        input_rows: raw.n_rows(),
        rejected_ids,
        resolution,
        cleaning,
        genes: aggregated.n_rows(),
    };
    Ok((aggregated, report))
}

pub struct Pipeline<G: GeoClient, R: SymbolResolver> {
    store: Store,
    geo: G,
    resolver: R,
}

impl<G: GeoClient, R: SymbolResolver> Pipeline<G, R> {
    pub fn new(store: Store, geo: G, resolver: R) -> Self {
        Self {
            store,
            geo,
            resolver,
        }
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        output_dir: Option<Utf8PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineReport, PrepError> {
        let started = Instant::now();
        let phase = |message: String| {
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            })
        };
        let accession = &config.accession;

        phase(format!("phase=Fetch; series metadata for {accession}"));
        let (soft_text, soft_source) = self.load_soft(config)?;

        phase("phase=Fetch; raw counts".to_string());
        let (counts_path, counts_source) = self.locate_counts(config, &soft_text)?;

        phase(format!("phase=Read; {counts_path}"));
        let raw = read_count_table(counts_path.as_std_path(), Some(config.expected_samples))?;

        phase("phase=Prepare; validate, resolve, clean, aggregate".to_string());
        let (aggregated, preparation) = prepare_counts(&raw, &self.resolver)?;

        phase("phase=Metadata; parsing sample characteristics".to_string());
        let records = parse_records(&parse_soft_samples(&soft_text), &config.metadata_keys);
        let long_form = to_long_form(&aggregated, &records)?;

        phase("phase=Normalize; TMM log-CPM".to_string());
        let normalized = normalize(&aggregated, config.prior_count)?;
        let summary = summarize(
            &aggregated,
            &normalized,
            &records,
            &config.metadata_keys.disease,
        )?;

        let output_dir = output_dir.unwrap_or_else(|| self.store.output_dir(accession));
        phase(format!("phase=Store; writing artifacts to {output_dir}"));
        let artifacts = Artifacts {
            aggregated: output_dir.join(AGGREGATED_FILE).to_string(),
            normalized: output_dir.join(NORMALIZED_FILE).to_string(),
            long_form: output_dir.join(LONG_FORM_FILE).to_string(),
            metadata: output_dir.join(METADATA_FILE).to_string(),
            report: output_dir.join(REPORT_FILE).to_string(),
        };
        Store::ensure_dir(&output_dir)?;
        write_table(Path::new(&artifacts.aggregated), &aggregated, b'\t')?;
        write_table(Path::new(&artifacts.normalized), &normalized.table, b'\t')?;
        write_long_form(Path::new(&artifacts.long_form), &long_form)?;
        write_metadata(Path::new(&artifacts.metadata), &ordered_records(&aggregated, &records))?;

        let report = PipelineReport {
            accession: accession.to_string(),
            organism: extract_organism(&soft_text),
            generated_at: now_rfc3339(),
            counts_path: counts_path.to_string(),
            counts_source,
            soft_source,
            samples: raw.n_samples(),
            preparation,
            normalization: NormalizationReport {
                prior_count: normalized.prior_count,
                lib_sizes: normalized.lib_sizes.clone(),
                norm_factors: normalized.norm_factors.clone(),
            },
            summary,
            artifacts,
        };
        Store::write_json(Utf8Path::new(&report.artifacts.report), &report)?;
        phase("phase=Done".to_string());
        Ok(report)
    }

    fn load_soft(&self, config: &ResolvedConfig) -> Result<(String, InputSource), PrepError> {
        if let Some(path) = &config.soft_file {
            return Ok((read_text_maybe_gz(path)?, InputSource::Local));
        }
        let path = self.store.cache_soft_path(&config.accession);
        let action = Store::ensure_file(&path, |dest| {
            let text = self.geo.fetch_soft_text(&config.accession)?;
            Store::write_bytes_atomic(dest, text.as_bytes())
        })?;
        let text = fs::read_to_string(path.as_std_path())
            .map_err(|err| PrepError::Filesystem(format!("read {path}: {err}")))?;
        Ok((text, action.into()))
    }

    fn locate_counts(
        &self,
        config: &ResolvedConfig,
        soft_text: &str,
    ) -> Result<(Utf8PathBuf, InputSource), PrepError> {
        if let Some(path) = &config.counts_file {
            let path = Utf8PathBuf::from_path_buf(path.clone()).map_err(|path| {
                PrepError::Filesystem(format!("non UTF-8 path {}", path.display()))
            })?;
            if !path.as_std_path().is_file() {
                return Err(PrepError::MissingDownload(path.to_string()));
            }
            return Ok((path, InputSource::Local));
        }
        let urls = extract_supplementary_urls(soft_text);
        let url = select_counts_url(&urls, &config.counts_pattern)?;
        let file_name = file_name_from_url(url)
            .ok_or_else(|| PrepError::GeoResolution(format!("no file name in {url}")))?;
        let path = self.store.cache_file_path(&config.accession, file_name);
        let action = Store::ensure_file(&path, |dest| {
            self.geo.download_url(url, dest.as_std_path())
        })?;
        Ok((path, action.into()))
    }
}

/// Metadata records in the column order of `table`; samples without a
/// matching column follow in their original order.
fn ordered_records(table: &CountTable, records: &[SampleRecord]) -> Vec<SampleRecord> {
    let mut ordered = Vec::with_capacity(records.len());
    for column in table.samples() {
        if let Some(record) = crate::join::find_record(records, column) {
            ordered.push(record.clone());
        }
    }
    for record in records {
        if !ordered.iter().any(|kept| kept.sample_id == record.sample_id) {
            ordered.push(record.clone());
        }
    }
    ordered
}

fn read_text_maybe_gz(path: &Path) -> Result<String, PrepError> {
    let bytes = fs::read(path)
        .map_err(|err| PrepError::Filesystem(format!("read {}: {err}", path.display())))?;
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if !is_gz {
        return String::from_utf8(bytes).map_err(|err| PrepError::Filesystem(err.to_string()));
    }
    let mut text = String::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_string(&mut text)
        .map_err(|err| PrepError::Filesystem(format!("gunzip {}: {err}", path.display())))?;
    Ok(text)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
