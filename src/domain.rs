use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;

/// Ensembl transcript: `ENST`, an 11-digit run, optional `.version`.
pub const TRANSCRIPT_PATTERN: &str = r"^ENST\d{11}(\.\d+)?$";

static TRANSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TRANSCRIPT_PATTERN).expect("transcript pattern is valid"));

pub fn is_transcript_id(value: &str) -> bool {
    TRANSCRIPT_RE.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoSeriesAccession(String);

impl GeoSeriesAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoSeriesAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSeriesAccession {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix("GSE").unwrap_or("");
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(PrepError::InvalidExpressionAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TranscriptId(String);

impl TranscriptId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id with any `.version` suffix removed, as used by lookup services.
    pub fn unversioned(&self) -> &str {
        match self.0.split_once('.') {
            Some((base, _)) => base,
            None => &self.0,
        }
    }
}

impl fmt::Display for TranscriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TranscriptId {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_transcript_id(trimmed) {
            return Err(PrepError::InvalidTranscriptId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_transcript_id_valid() {
        let id: TranscriptId = "ENST00000456328".parse().unwrap();
        assert_eq!(id.as_str(), "ENST00000456328");
        assert_eq!(id.unversioned(), "ENST00000456328");
    }

    #[test]
    fn parse_transcript_id_versioned() {
        let id: TranscriptId = "ENST00000456328.2".parse().unwrap();
        assert_eq!(id.unversioned(), "ENST00000456328");
    }

    #[test]
    fn parse_transcript_id_invalid() {
        for bad in ["ENSG00000456328", "ENST123", "ENST000004563281", "enst00000456328", ""] {
            let err = bad.parse::<TranscriptId>().unwrap_err();
            assert_matches!(err, PrepError::InvalidTranscriptId(_));
        }
    }

    #[test]
    fn parse_geo_accession() {
        let acc: GeoSeriesAccession = " gse104704 ".parse().unwrap();
        assert_eq!(acc.as_str(), "GSE104704");
        assert_matches!(
            "GSM123".parse::<GeoSeriesAccession>(),
            Err(PrepError::InvalidExpressionAccession(_))
        );
        assert_matches!(
            "GSE".parse::<GeoSeriesAccession>(),
            Err(PrepError::InvalidExpressionAccession(_))
        );
    }
}
