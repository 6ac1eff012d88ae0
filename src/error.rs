use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    #[error("invalid GEO series accession: {0}")]
    InvalidExpressionAccession(String),

    #[error("invalid transcript id: {0}")]
    InvalidTranscriptId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GEO request failed: {0}")]
    GeoHttp(String),

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("{0}")]
    GeoResolution(String),

    #[error("symbol lookup request failed: {0}")]
    ResolverHttp(String),

    #[error("symbol lookup returned status {status}: {message}")]
    ResolverStatus { status: u16, message: String },

    #[error("expected {expected} samples but {path} has {found} sample columns")]
    #[diagnostic(help("check the expected sample count or the downloaded counts file"))]
    ShapeMismatch {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("file missing after download: {0}")]
    MissingDownload(String),

    #[error("malformed table: {0}")]
    Table(String),

    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("no metadata record for sample column {0}")]
    MetadataMismatch(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<csv::Error> for PrepError {
    fn from(err: csv::Error) -> Self {
        PrepError::Table(err.to_string())
    }
}
