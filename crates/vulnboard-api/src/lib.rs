use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vulnboard_core::{
    DerivedStatistics, FilterEngine, FilterState, RecordStore, VulnerabilityRecord,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const DEFAULT_PACKAGE_NAME: &str = "unknown";
const DEFAULT_VERSION: &str = "0.0.0";
const DEFAULT_DESCRIPTION: &str = "No description provided.";
const DEFAULT_KAI_STATUS: &str = "valid";
const FIXED_IN_MARKER: &str = "fixed in ";

/// Parse a feed document into records. Two upstream shapes are accepted: a
/// flat JSON array of records in the wire shape, or a nested scanner export
/// (`groups` -> `repos` -> `images` -> `vulnerabilities`) whose entries are
/// mapped field by field with the documented fallbacks.
///
/// # Errors
/// Returns an error when the document is not valid JSON or matches neither
/// shape.
pub fn parse_feed(body: &str) -> Result<Vec<VulnerabilityRecord>> {
    let value: Value = serde_json::from_str(body).context("feed is not valid JSON")?;

    if value.is_array() {
        return serde_json::from_value(value).context("feed records do not match the record shape");
    }
    if value.get("groups").is_some() {
        return parse_scanner_export(&value);
    }

    Err(anyhow!(
        "unsupported feed shape: expected a record array or a scanner export with `groups`"
    ))
}

fn parse_scanner_export(root: &Value) -> Result<Vec<VulnerabilityRecord>> {
    let ingested_at = now_rfc3339()?;
    let mut records = Vec::new();

    let Some(groups) = root.get("groups").and_then(Value::as_object) else {
        return Err(anyhow!("scanner export `groups` must be an object"));
    };

    for group in groups.values() {
        let Some(repos) = group.get("repos").and_then(Value::as_object) else {
            continue;
        };
        for repo in repos.values() {
            let Some(images) = repo.get("images").and_then(Value::as_object) else {
                continue;
            };
            for (image_key, image) in images {
                let Some(vulnerabilities) =
                    image.get("vulnerabilities").and_then(Value::as_array)
                else {
                    continue;
                };
                for vulnerability in vulnerabilities {
                    records.push(map_export_entry(
                        vulnerability,
                        image_key,
                        image,
                        records.len(),
                        &ingested_at,
                    ));
                }
            }
        }
    }

    Ok(records)
}

fn map_export_entry(
    vulnerability: &Value,
    image_key: &str,
    image: &Value,
    index: usize,
    ingested_at: &str,
) -> VulnerabilityRecord {
    let cve_id = non_empty_str(vulnerability.get("cve"))
        .map_or_else(|| format!("CVE-UNKNOWN-{index}"), ToString::to_string);

    let package_name = non_empty_str(vulnerability.get("package")).map_or_else(
        || {
            image_key
                .split(':')
                .next()
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or(DEFAULT_PACKAGE_NAME)
                .to_string()
        },
        ToString::to_string,
    );

    let current_version = non_empty_str(image.get("version"))
        .unwrap_or(DEFAULT_VERSION)
        .to_string();

    let fixed_version = vulnerability
        .get("status")
        .and_then(Value::as_str)
        .and_then(parse_fixed_version);

    let severity = capitalize_severity(
        vulnerability.get("severity").and_then(Value::as_str).unwrap_or("Low"),
    );

    let cvss = vulnerability.get("cvss").and_then(Value::as_f64).unwrap_or(0.0);

    let published_date = non_empty_str(image.get("createTime"))
        .unwrap_or(ingested_at)
        .to_string();

    let description = non_empty_str(vulnerability.get("description"))
        .unwrap_or(DEFAULT_DESCRIPTION)
        .to_string();

    VulnerabilityRecord {
        cve_id,
        package_name,
        current_version,
        fixed_version,
        severity,
        cvss,
        published_date,
        description,
        risk_factors: Vec::new(),
        kai_status: DEFAULT_KAI_STATUS.to_string(),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|text| !text.is_empty())
}

/// `"fixed in 2.4.1, 3.0.0"` -> `Some("2.4.1")`; statuses without the marker
/// mean no known fix.
fn parse_fixed_version(status: &str) -> Option<String> {
    let start = status.find(FIXED_IN_MARKER)?;
    let versions = &status[start + FIXED_IN_MARKER.len()..];
    versions
        .split(',')
        .next()
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .map(ToString::to_string)
}

/// Scanner exports carry lowercase severities; the record shape expects
/// title case (`critical` -> `Critical`).
fn capitalize_severity(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Read and parse a feed file.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn load_feed(path: &Path) -> Result<Vec<VulnerabilityRecord>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read feed file {}", path.display()))?;
    parse_feed(&body).with_context(|| format!("failed to parse feed file {}", path.display()))
}

/// Load a feed file into a fresh record store, surfacing the core's
/// required-field validation unchanged.
///
/// # Errors
/// Returns an error when the feed cannot be loaded or a record fails the
/// store's required-field contract.
pub fn load_store(path: &Path) -> Result<RecordStore> {
    let records = load_feed(path)?;
    let mut store = RecordStore::new();
    store
        .load(records)
        .with_context(|| format!("feed {} was rejected by the record store", path.display()))?;
    Ok(store)
}

/// Stable identity for one dataset: SHA-256 over the record count and the
/// sorted `cveId|packageName|currentVersion` triples, rendered as
/// `feed_<16 hex>`. Insensitive to record order, sensitive to content.
#[must_use]
pub fn dataset_fingerprint(records: &[VulnerabilityRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(records.len().to_string().as_bytes());

    let mut identities = records
        .iter()
        .map(|record| {
            format!("{}|{}|{}", record.cve_id, record.package_name, record.current_version)
        })
        .collect::<Vec<_>>();
    identities.sort_unstable();

    for identity in identities {
        hasher.update(identity.as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("feed_{}", &digest_hex[..16])
}

/// One view request: an optional base state (e.g. a stored profile applied
/// at startup) with explicit query/filter mutations layered on top, in that
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewRequest {
    pub base_state: Option<FilterState>,
    pub query: Option<String>,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewResult {
    pub dataset_fingerprint: String,
    pub source_records: usize,
    pub search_query: String,
    pub active_filters: Vec<String>,
    pub records: Vec<VulnerabilityRecord>,
    pub stats: DerivedStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedSummary {
    pub dataset_fingerprint: String,
    pub source_records: usize,
    pub stats: DerivedStatistics,
}

/// Facade the presentation layer drives: loads the feed, owns an engine for
/// the duration of one request, and returns the recomputed view. Performs no
/// rendering and persists nothing.
#[derive(Debug, Clone)]
pub struct DashboardApi {
    feed_path: PathBuf,
}

impl DashboardApi {
    #[must_use]
    pub fn new(feed_path: PathBuf) -> Self {
        Self { feed_path }
    }

    /// Load the feed and compute one filtered view.
    ///
    /// # Errors
    /// Returns an error when the feed cannot be loaded or rejected by the
    /// store.
    pub fn view(&self, input: ViewRequest) -> Result<ViewResult> {
        let store = load_store(&self.feed_path)?;
        let fingerprint = dataset_fingerprint(store.all());

        let mut engine = match input.base_state {
            Some(state) => FilterEngine::with_state(state),
            None => FilterEngine::new(),
        };
        if let Some(query) = &input.query {
            engine.set_query(query);
        }
        for id in &input.filters {
            engine.set_filter(id, true);
        }

        let result = engine.current_view(&store);
        Ok(ViewResult {
            dataset_fingerprint: fingerprint,
            source_records: store.len(),
            search_query: engine.search_query().to_string(),
            active_filters: engine.active_filters().iter().cloned().collect(),
            records: result.records,
            stats: result.stats,
        })
    }

    /// Summarize the raw feed without any filtering: record count,
    /// fingerprint, and the statistics of the unfiltered dataset.
    ///
    /// # Errors
    /// Returns an error when the feed cannot be loaded or rejected by the
    /// store.
    pub fn inspect(&self) -> Result<FeedSummary> {
        let store = load_store(&self.feed_path)?;
        let view = FilterEngine::new().current_view(&store);

        Ok(FeedSummary {
            dataset_fingerprint: dataset_fingerprint(store.all()),
            source_records: store.len(),
            stats: view.stats,
        })
    }
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format ingestion timestamp as RFC3339")
}
