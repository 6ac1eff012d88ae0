use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_expression_prep::app::{
    AGGREGATED_FILE, InputSource, NORMALIZED_FILE, Pipeline, REPORT_FILE, prepare_counts,
};
use kira_expression_prep::config::{Config, ConfigLoader, ResolvedConfig};
use kira_expression_prep::domain::{GeoSeriesAccession, TranscriptId};
use kira_expression_prep::error::PrepError;
use kira_expression_prep::geo::GeoClient;
use kira_expression_prep::output::JsonOutput;
use kira_expression_prep::resolve::SymbolResolver;
use kira_expression_prep::store::Store;
use kira_expression_prep::table::CountTable;
use kira_expression_prep::table_io::read_count_table;

const SOFT: &str = "\
^SERIES = GSE424242
!Series_sample_organism = Homo sapiens
!Series_supplementary_file = ftp://ftp.ncbi.nlm.nih.gov/geo/series/GSE424nnn/GSE424242/suppl/GSE424242_transcript_counts.tsv
^SAMPLE = GSM1
!Sample_title = patient_1
!Sample_characteristics_ch1 = disease state: AD
!Sample_characteristics_ch1 = sex: female
!Sample_characteristics_ch1 = pmi: 72:15:30
^SAMPLE = GSM2
!Sample_title = control_1
!Sample_characteristics_ch1 = disease state: control
!Sample_characteristics_ch1 = sex: male
!Sample_characteristics_ch1 = pmi: unknown
";

const COUNTS: &str = "transcript_id\tGSM1\tGSM2\nENST00000456328\t10\t20\nBADID\t5\t5\n";

#[derive(Default)]
struct MockGeo {
    downloads: Arc<Mutex<usize>>,
}

impl GeoClient for MockGeo {
    fn fetch_soft_text(&self, _accession: &GeoSeriesAccession) -> Result<String, PrepError> {
        Ok(SOFT.to_string())
    }

    fn download_url(&self, url: &str, destination: &Path) -> Result<(), PrepError> {
        assert!(url.ends_with("GSE424242_transcript_counts.tsv"));
        *self.downloads.lock().unwrap() += 1;
        std::fs::write(destination, COUNTS).map_err(|err| PrepError::Filesystem(err.to_string()))
    }
}

struct MockResolver;

impl SymbolResolver for MockResolver {
    fn resolve(&self, ids: &[TranscriptId]) -> Result<HashMap<String, String>, PrepError> {
        Ok(ids
            .iter()
            .filter(|id| id.unversioned() == "ENST00000456328")
            .map(|id| (id.unversioned().to_string(), "TP53".to_string()))
            .collect())
    }
}

struct FailingResolver;

impl SymbolResolver for FailingResolver {
    fn resolve(&self, _ids: &[TranscriptId]) -> Result<HashMap<String, String>, PrepError> {
        Err(PrepError::ResolverHttp("connection refused".to_string()))
    }
}

fn config(expected_samples: usize) -> ResolvedConfig {
    ConfigLoader::resolve_config(Config {
        accession: Some("GSE424242".to_string()),
        expected_samples: Some(expected_samples),
        ..Config::default()
    })
    .unwrap()
}

fn temp_store(temp: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("project"), root.join("cache"))
}

#[test]
fn prepare_counts_reports_rejected_and_unresolved() {
    let raw = CountTable::new(
        vec!["ENST00000456328".to_string(), "BADID".to_string()],
        vec!["GSM1".to_string(), "GSM2".to_string()],
        vec![vec![Some(10.0), Some(20.0)], vec![Some(5.0), Some(5.0)]],
    )
    .unwrap();

    let (aggregated, report) = prepare_counts(&raw, &MockResolver).unwrap();
    assert_eq!(aggregated.row_ids(), ["TP53".to_string()]);
    assert_eq!(report.rejected_ids, 1);
    assert_eq!(report.resolution.unresolved, 0);
    assert_eq!(report.genes, 1);
}

#[test]
fn pipeline_writes_artifacts_and_reuses_cache() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let geo = MockGeo::default();
    let downloads = Arc::clone(&geo.downloads);
    let pipeline = Pipeline::new(store.clone(), geo, MockResolver);
    let config = config(2);

    let report = pipeline.run(&config, None, &JsonOutput).unwrap();
    assert_eq!(report.counts_source, InputSource::Downloaded);
    assert_eq!(report.soft_source, InputSource::Downloaded);
    assert_eq!(report.organism.as_deref(), Some("Homo sapiens"));
    assert_eq!(report.preparation.rejected_ids, 1);
    assert_eq!(report.preparation.resolution.unresolved, 0);
    assert_eq!(report.summary.samples.len(), 2);
    assert_eq!(report.summary.samples[0].label, "GSM1_AD_female");
    assert_eq!(report.normalization.norm_factors.len(), 2);

    let output_dir = store.output_dir(&config.accession);
    let aggregated =
        read_count_table(output_dir.join(AGGREGATED_FILE).as_std_path(), Some(2)).unwrap();
    assert_eq!(aggregated.row_ids(), ["TP53".to_string()]);
    assert_eq!(aggregated.row(0), [Some(10.0), Some(20.0)]);

    let normalized =
        read_count_table(output_dir.join(NORMALIZED_FILE).as_std_path(), Some(2)).unwrap();
    assert_eq!(normalized.row_ids(), aggregated.row_ids());
    assert!(normalized.row(0).iter().all(|cell| cell.is_some_and(f64::is_finite)));
    assert!(output_dir.join(REPORT_FILE).as_std_path().is_file());

    let again = pipeline.run(&config, None, &JsonOutput).unwrap();
    assert_eq!(again.counts_source, InputSource::Cached);
    assert_eq!(again.soft_source, InputSource::Cached);
    assert_eq!(*downloads.lock().unwrap(), 1);
}

#[test]
fn sample_count_mismatch_aborts() {
    let temp = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(temp_store(&temp), MockGeo::default(), MockResolver);
    let err = pipeline.run(&config(3), None, &JsonOutput).unwrap_err();
    assert_matches!(err, PrepError::ShapeMismatch { expected: 3, found: 2, .. });
}

#[test]
fn resolver_failure_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(temp_store(&temp), MockGeo::default(), FailingResolver);
    let err = pipeline.run(&config(2), None, &JsonOutput).unwrap_err();
    assert_matches!(err, PrepError::ResolverHttp(_));
}

#[test]
fn local_inputs_skip_geo() {
    let temp = tempfile::tempdir().unwrap();
    let counts = temp.path().join("counts.tsv");
    let soft = temp.path().join("family.soft");
    std::fs::write(&counts, COUNTS).unwrap();
    std::fs::write(&soft, SOFT).unwrap();

    let mut config = config(2);
    config.counts_file = Some(counts);
    config.soft_file = Some(soft);
    let geo = MockGeo::default();
    let pipeline = Pipeline::new(temp_store(&temp), geo, MockResolver);
    let output = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();

    let report = pipeline.run(&config, Some(output.clone()), &JsonOutput).unwrap();
    assert_eq!(report.counts_source, InputSource::Local);
    assert_eq!(report.soft_source, InputSource::Local);
    assert!(output.join(AGGREGATED_FILE).as_std_path().is_file());
}

#[test]
fn all_identifiers_rejected_still_writes_artifacts() {
    let temp = tempfile::tempdir().unwrap();
    let counts = temp.path().join("counts.tsv");
    let soft = temp.path().join("family.soft");
    std::fs::write(&counts, "transcript_id\tGSM1\tGSM2\nBADID\t5\t5\n").unwrap();
    std::fs::write(&soft, SOFT).unwrap();

    let mut config = config(2);
    config.counts_file = Some(counts);
    config.soft_file = Some(soft);
    let pipeline = Pipeline::new(temp_store(&temp), MockGeo::default(), MockResolver);
    let output = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();

    let report = pipeline.run(&config, Some(output.clone()), &JsonOutput).unwrap();
    assert_eq!(report.preparation.rejected_ids, 1);
    assert_eq!(report.preparation.genes, 0);
    assert_eq!(report.normalization.norm_factors, vec![1.0, 1.0]);
    assert!(output.join(REPORT_FILE).as_std_path().is_file());

    let normalized =
        read_count_table(output.join(NORMALIZED_FILE).as_std_path(), Some(2)).unwrap();
    assert_eq!(normalized.n_rows(), 0);
}

#[test]
fn missing_local_counts_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(2);
    config.counts_file = Some(temp.path().join("absent.tsv"));
    let pipeline = Pipeline::new(temp_store(&temp), MockGeo::default(), MockResolver);
    assert_matches!(
        pipeline.run(&config, None, &JsonOutput),
        Err(PrepError::MissingDownload(_))
    );
}
