use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::GeoSeriesAccession;
use crate::error::PrepError;
use crate::metadata::MetadataKeys;
use crate::normalize::DEFAULT_PRIOR_COUNT;
use crate::resolve::{BIOMART_DATASET, BIOMART_URL};

pub const CONFIG_FILE: &str = "kira-ep.json";
pub const DEFAULT_ACCESSION: &str = "GSE104704";
pub const DEFAULT_EXPECTED_SAMPLES: usize = 30;
pub const DEFAULT_COUNTS_PATTERN: &str = "counts";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub expected_samples: Option<usize>,
    #[serde(default)]
    pub counts_pattern: Option<String>,
    #[serde(default)]
    pub counts_file: Option<PathBuf>,
    #[serde(default)]
    pub soft_file: Option<PathBuf>,
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
    #[serde(default)]
    pub metadata_keys: Option<MetadataKeysEntry>,
    #[serde(default)]
    pub prior_count: Option<f64>,
    #[serde(default)]
    pub biomart: Option<BiomartEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MetadataKeysEntry {
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BiomartEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub accession: GeoSeriesAccession,
    pub expected_samples: usize,
    pub counts_pattern: String,
    pub counts_file: Option<PathBuf>,
    pub soft_file: Option<PathBuf>,
    pub mapping_file: Option<PathBuf>,
    pub metadata_keys: MetadataKeys,
    pub prior_count: f64,
    pub biomart_url: String,
    pub biomart_dataset: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-ep.json` in the current directory when present.
    /// Without any file the built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PrepError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PrepError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PrepError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let accession: GeoSeriesAccession = config
            .accession
            .as_deref()
            .unwrap_or(DEFAULT_ACCESSION)
            .parse()?;

        let expected_samples = config.expected_samples.unwrap_or(DEFAULT_EXPECTED_SAMPLES);
        if expected_samples == 0 {
            return Err(PrepError::ConfigParse(
                "expected_samples must be at least 1".to_string(),
            ));
        }

        let prior_count = config.prior_count.unwrap_or(DEFAULT_PRIOR_COUNT);
        if !(prior_count > 0.0) {
            return Err(PrepError::ConfigParse(format!(
                "prior_count must be positive, got {prior_count}"
            )));
        }

        let defaults = MetadataKeys::default();
        let keys = config.metadata_keys.unwrap_or_default();
        let metadata_keys = MetadataKeys {
            disease: keys.disease.unwrap_or(defaults.disease),
            sex: keys.sex.unwrap_or(defaults.sex),
            duration: keys.duration.unwrap_or(defaults.duration),
        };

        let biomart = config.biomart.unwrap_or_default();

        Ok(ResolvedConfig {
            schema_version,
            accession,
            expected_samples,
            counts_pattern: config
                .counts_pattern
                .unwrap_or_else(|| DEFAULT_COUNTS_PATTERN.to_string()),
            counts_file: config.counts_file,
            soft_file: config.soft_file,
            mapping_file: config.mapping_file,
            metadata_keys,
            prior_count,
            biomart_url: biomart.url.unwrap_or_else(|| BIOMART_URL.to_string()),
            biomart_dataset: biomart
                .dataset
                .unwrap_or_else(|| BIOMART_DATASET.to_string()),
        })
    }
}
