use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{TranscriptId, is_transcript_id};
use crate::error::PrepError;
use crate::table::CountTable;
use crate::table_io::delimiter_for;

pub const BIOMART_URL: &str = "https://www.ensembl.org/biomart/martservice";
pub const BIOMART_DATASET: &str = "hsapiens_gene_ensembl";
const BATCH_SIZE: usize = 500;

/// Maps unversioned transcript ids to gene symbols. Ids missing from the
/// returned map are unresolved.
pub trait SymbolResolver {
    fn resolve(&self, ids: &[TranscriptId]) -> Result<HashMap<String, String>, PrepError>;
}

#[derive(Clone)]
pub struct BiomartResolver {
    client: Client,
    url: String,
    dataset: String,
}

impl BiomartResolver {
    pub fn with_endpoint(url: &str, dataset: &str) -> Result<Self, PrepError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PrepError::ResolverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| PrepError::ResolverHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            dataset: dataset.to_string(),
        })
    }

    fn query_batch(&self, ids: &[&str]) -> Result<String, PrepError> {
        let query = biomart_query(&self.dataset, ids);
        let response = self
            .client
            .post(&self.url)
            .form(&[("query", query.as_str())])
            .send()
            .map_err(|err| PrepError::ResolverHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "BioMart request failed".to_string());
            return Err(PrepError::ResolverStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| PrepError::ResolverHttp(err.to_string()))?;
        // BioMart reports query errors in a 200 body.
        if body.trim_start().starts_with("Query ERROR") {
            return Err(PrepError::ResolverHttp(body.trim().to_string()));
        }
        Ok(body)
    }
}

impl SymbolResolver for BiomartResolver {
    fn resolve(&self, ids: &[TranscriptId]) -> Result<HashMap<String, String>, PrepError> {
        let mut unique = ids.iter().map(|id| id.unversioned()).collect::<Vec<_>>();
        unique.sort_unstable();
        unique.dedup();

        let mut mapping = HashMap::new();
        for (batch_no, batch) in unique.chunks(BATCH_SIZE).enumerate() {
            debug!(batch = batch_no + 1, size = batch.len(), "querying BioMart");
            let body = self.query_batch(batch)?;
            merge_mapping(&mut mapping, parse_biomart_tsv(&body));
        }
        Ok(mapping)
    }
}

pub fn biomart_query(dataset: &str, ids: &[&str]) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?><!DOCTYPE Query>"#,
            r#"<Query virtualSchemaName="default" formatter="TSV" header="0" uniqueRows="1" datasetConfigVersion="0.6">"#,
            r#"<Dataset name="{dataset}" interface="default">"#,
            r#"<Filter name="ensembl_transcript_id" value="{ids}"/>"#,
            r#"<Attribute name="ensembl_transcript_id"/>"#,
            r#"<Attribute name="hgnc_symbol"/>"#,
            r#"</Dataset></Query>"#
        ),
        dataset = dataset,
        ids = ids.join(",")
    )
}

/// Parses `transcript<TAB>symbol` lines. Rows with an empty symbol are
/// skipped; ids with several symbols keep the smallest one.
pub fn parse_biomart_tsv(body: &str) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for line in body.lines() {
        let mut parts = line.split('\t');
        let (Some(id), Some(symbol)) = (parts.next(), parts.next()) else {
            continue;
        };
        insert_symbol(&mut mapping, id.trim(), symbol.trim());
    }
    mapping
}

fn insert_symbol(mapping: &mut HashMap<String, String>, id: &str, symbol: &str) {
    if id.is_empty() || symbol.is_empty() {
        return;
    }
    let key = id.split_once('.').map(|(base, _)| base).unwrap_or(id);
    mapping
        .entry(key.to_string())
        .and_modify(|current: &mut String| {
            if symbol < current.as_str() {
                *current = symbol.to_string();
            }
        })
        .or_insert_with(|| symbol.to_string());
}

fn merge_mapping(into: &mut HashMap<String, String>, from: HashMap<String, String>) {
    for (id, symbol) in from {
        insert_symbol(into, &id, &symbol);
    }
}

/// Offline resolver backed by a two-column mapping file.
#[derive(Debug, Clone, Default)]
pub struct MappingFileResolver {
    mapping: HashMap<String, String>,
}

impl MappingFileResolver {
    pub fn from_path(path: &Path) -> Result<Self, PrepError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_for(path))
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|err| PrepError::Filesystem(format!("open {}: {err}", path.display())))?;
        let mut mapping = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let (Some(id), Some(symbol)) = (record.get(0), record.get(1)) else {
                continue;
            };
            // Header lines and comments do not carry a transcript id.
            if !is_transcript_id(id.trim()) {
                continue;
            }
            insert_symbol(&mut mapping, id.trim(), symbol.trim());
        }
        info!(path = %path.display(), entries = mapping.len(), "loaded symbol mapping");
        Ok(Self { mapping })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut mapping = HashMap::new();
        for (id, symbol) in pairs {
            insert_symbol(&mut mapping, id.as_ref(), symbol.as_ref());
        }
        Self { mapping }
    }
}

impl SymbolResolver for MappingFileResolver {
    fn resolve(&self, ids: &[TranscriptId]) -> Result<HashMap<String, String>, PrepError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.mapping
                    .get(id.unversioned())
                    .map(|symbol| (id.unversioned().to_string(), symbol.clone()))
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub queried: usize,
    pub unresolved: usize,
}

/// Relabels validated transcript rows with gene symbols, dropping rows the
/// resolver could not map.
pub fn resolve_rows(
    table: &CountTable,
    resolver: &dyn SymbolResolver,
) -> Result<(CountTable, ResolutionReport), PrepError> {
    let ids = table
        .row_ids()
        .iter()
        .map(|id| id.parse::<TranscriptId>())
        .collect::<Result<Vec<_>, _>>()?;
    let mapping = resolver.resolve(&ids)?;

    let resolved = table.relabel_rows(|id| {
        let key = id.split_once('.').map(|(base, _)| base).unwrap_or(id);
        mapping.get(key).cloned()
    });
    let report = ResolutionReport {
        queried: table.n_rows(),
        unresolved: table.n_rows() - resolved.n_rows(),
    };
    info!(
        queried = report.queried,
        unresolved = report.unresolved,
        "resolved transcript identifiers to gene symbols"
    );
    Ok((resolved, report))
}
