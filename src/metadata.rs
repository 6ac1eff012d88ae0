use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MISSING_LABEL_PART: &str = "NA";

/// Characteristic keys used to build the composite sample label and the
/// duration field reduced to whole hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataKeys {
    pub disease: String,
    pub sex: String,
    pub duration: String,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            disease: "disease state".to_string(),
            sex: "sex".to_string(),
            duration: "pmi".to_string(),
        }
    }
}

/// One `^SAMPLE` block of a GEO family SOFT file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawSample {
    pub sample_id: String,
    pub title: String,
    pub characteristics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    pub sample_id: String,
    pub title: String,
    pub label: String,
    /// `None` marks a missing or unparseable value.
    pub fields: BTreeMap<String, Option<String>>,
}

impl SampleRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|value| value.as_deref())
    }
}

fn soft_value(line: &str) -> Option<&str> {
    line.split_once('=').map(|(_, value)| value.trim())
}

pub fn parse_soft_samples(soft_text: &str) -> Vec<RawSample> {
    let mut samples = Vec::new();
    let mut current: Option<RawSample> = None;
    for line in soft_text.lines() {
        let line = line.trim_end();
        if line.starts_with('^') {
            if let Some(sample) = current.take() {
                samples.push(sample);
            }
            if line.starts_with("^SAMPLE") {
                current = soft_value(line).map(|id| RawSample {
                    sample_id: id.to_string(),
                    ..RawSample::default()
                });
            }
            continue;
        }
        let Some(sample) = current.as_mut() else {
            continue;
        };
        if line.starts_with("!Sample_title") {
            if let Some(value) = soft_value(line) {
                sample.title = value.to_string();
            }
        } else if line.starts_with("!Sample_characteristics_ch") {
            if let Some(value) = soft_value(line) {
                sample.characteristics.push(value.to_string());
            }
        }
    }
    if let Some(sample) = current {
        samples.push(sample);
    }
    samples
}

/// Keeps the hours of an `hours:minutes:seconds` duration.
pub fn parse_duration_hours(value: &str) -> Option<String> {
    let (hours, _) = value.trim().split_once(':')?;
    let hours = hours.trim();
    if hours.is_empty() || !hours.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(hours.to_string())
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn label_part(value: Option<&str>) -> String {
    match value {
        Some(value) => value.split_whitespace().collect::<Vec<_>>().join("_"),
        None => MISSING_LABEL_PART.to_string(),
    }
}

pub fn parse_characteristics(
    sample_id: &str,
    title: &str,
    entries: &[String],
    keys: &MetadataKeys,
) -> SampleRecord {
    let duration_key = normalize_key(&keys.duration);
    let mut fields = BTreeMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once(':') else {
            warn!(sample = sample_id, entry = %entry, "characteristic without key separator");
            continue;
        };
        let key = normalize_key(key);
        if key.is_empty() {
            warn!(sample = sample_id, entry = %entry, "characteristic with empty key");
            continue;
        }
        let value = value.trim();
        let parsed = if key == duration_key {
            let hours = parse_duration_hours(value);
            if hours.is_none() {
                warn!(sample = sample_id, value, "unparseable duration");
            }
            hours
        } else if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        fields.insert(key, parsed);
    }

    let mut record = SampleRecord {
        sample_id: sample_id.to_string(),
        title: title.to_string(),
        label: String::new(),
        fields,
    };
    record.label = format!(
        "{}_{}_{}",
        sample_id,
        label_part(record.field(&normalize_key(&keys.disease))),
        label_part(record.field(&normalize_key(&keys.sex)))
    );
    record
}

/// Parses every sample and gives all records the same key set; a key absent
/// from a sample is missing there.
pub fn parse_records(samples: &[RawSample], keys: &MetadataKeys) -> Vec<SampleRecord> {
    let mut records = samples
        .iter()
        .map(|sample| {
            parse_characteristics(
                &sample.sample_id,
                &sample.title,
                &sample.characteristics,
                keys,
            )
        })
        .collect::<Vec<_>>();

    let all_keys = records
        .iter()
        .flat_map(|record| record.fields.keys().cloned())
        .collect::<BTreeSet<_>>();
    for record in &mut records {
        for key in &all_keys {
            record.fields.entry(key.clone()).or_insert(None);
        }
    }
    records
}
