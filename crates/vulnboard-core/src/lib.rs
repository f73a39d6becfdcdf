use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Statuses that mark a finding as resolved; everything else still needs
/// analyst attention, including status values this crate has never seen.
pub const TERMINAL_KAI_STATUSES: [&str; 2] = ["invalid - norisk", "ai-invalid-norisk"];

/// How many risk-factor entries `DerivedStatistics` keeps after ranking.
pub const TOP_RISK_FACTORS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Exact-match classification. Feeds may carry severity strings outside
    /// the four known levels; those classify as `None` and are skipped by the
    /// histogram while still flowing through result sets untouched.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Critical" => Some(Self::Critical),
            "High" => Some(Self::High),
            "Medium" => Some(Self::Medium),
            "Low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding as delivered by the ingestion collaborator. Field names on the
/// wire follow the upstream feed (camelCase). Records are immutable once
/// loaded into a [`RecordStore`]; nothing in this crate mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityRecord {
    pub cve_id: String,
    pub package_name: String,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub fixed_version: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub cvss: f64,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub kai_status: String,
}

impl VulnerabilityRecord {
    /// Check the required-field contract for store ingestion.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidInput`] when `cveId`, `packageName`, or
    /// `severity` is empty or whitespace-only. `cvss` is deliberately not
    /// validated: out-of-range scores pass through unchanged.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cve_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("cveId MUST be provided".to_string()));
        }
        if self.package_name.trim().is_empty() {
            return Err(CoreError::InvalidInput("packageName MUST be provided".to_string()));
        }
        if self.severity.trim().is_empty() {
            return Err(CoreError::InvalidInput("severity MUST be provided".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn needs_analysis(&self) -> bool {
        !is_terminal_kai_status(&self.kai_status)
    }
}

/// Whether a `kaiStatus` value counts as resolved. Exact string equality
/// against [`TERMINAL_KAI_STATUSES`]; unknown statuses are not terminal.
#[must_use]
pub fn is_terminal_kai_status(status: &str) -> bool {
    TERMINAL_KAI_STATUSES.contains(&status)
}

/// Session-scoped holder of the raw dataset. Owns the ordered record
/// sequence exclusively; consumers read it through [`RecordStore::all`].
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<VulnerabilityRecord>,
    generation: u64,
}

impl RecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire dataset. All-or-nothing: if any record fails the
    /// required-field contract the previous dataset stays in place.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidInput`] naming the offending record index.
    pub fn load(&mut self, records: Vec<VulnerabilityRecord>) -> Result<(), CoreError> {
        for (index, record) in records.iter().enumerate() {
            if let Err(CoreError::InvalidInput(reason)) = record.validate() {
                return Err(CoreError::InvalidInput(format!("record {index}: {reason}")));
            }
        }

        self.records = records;
        self.generation += 1;
        Ok(())
    }

    /// The full dataset in ingestion order, stable until the next `load`.
    #[must_use]
    pub fn all(&self) -> &[VulnerabilityRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bumped on every successful `load`. Consumers holding a derived view
    /// can compare generations to detect dataset replacement, and a
    /// memoizing host can key caches on `(filters, query, generation)`.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Mutable per-session filter state: a set of predicate ids plus one free
/// text query. Empty query means no text filter. Membership is the only
/// semantics of `active_filters`; insertion order is irrelevant.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub active_filters: BTreeSet<String>,
    pub search_query: String,
}

impl FilterState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_parts(search_query: String, active_filters: impl IntoIterator<Item = String>) -> Self {
        Self {
            active_filters: active_filters.into_iter().collect(),
            search_query,
        }
    }
}

/// Ids with a recognized predicate. Presentation layers may toggle ids
/// beyond this set; the engine ignores them (forward compatibility).
#[must_use]
pub fn known_filter_ids() -> Vec<&'static str> {
    vec!["analysis", "aiAnalysis", "highSeverity"]
}

/// The id -> predicate table. Extending the filter vocabulary means adding a
/// match arm here; the engine loop itself never changes.
#[must_use]
pub fn filter_predicate(id: &str) -> Option<fn(&VulnerabilityRecord) -> bool> {
    match id {
        "analysis" => Some(|record| record.kai_status != "invalid - norisk"),
        "aiAnalysis" => Some(|record| record.kai_status != "ai-invalid-norisk"),
        "highSeverity" => Some(|record| {
            matches!(Severity::parse(&record.severity), Some(Severity::Critical | Severity::High))
        }),
        _ => None,
    }
}

fn matches_query(record: &VulnerabilityRecord, needle_lower: &str) -> bool {
    record.cve_id.to_lowercase().contains(needle_lower)
        || record.package_name.to_lowercase().contains(needle_lower)
        || record.description.to_lowercase().contains(needle_lower)
        || record.severity.to_lowercase().contains(needle_lower)
}

/// Apply the search query and every recognized active predicate,
/// conjunctively, preserving input order. Unrecognized filter ids have no
/// effect.
#[must_use]
pub fn filter_records(
    records: &[VulnerabilityRecord],
    state: &FilterState,
) -> Vec<VulnerabilityRecord> {
    let mut survivors: Vec<&VulnerabilityRecord> = records.iter().collect();

    if !state.search_query.is_empty() {
        let needle = state.search_query.to_lowercase();
        survivors.retain(|record| matches_query(record, &needle));
    }

    for id in &state.active_filters {
        let Some(predicate) = filter_predicate(id) else {
            continue;
        };
        survivors.retain(|record| predicate(record));
    }

    survivors.into_iter().cloned().collect()
}

/// Severity histogram over a result set. All four keys are always present,
/// zero-filled when a level never occurs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    #[must_use]
    pub fn sum(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RiskFactorCount {
    pub name: String,
    pub count: usize,
}

/// Aggregates derived from one result set. Recomputed on demand, never
/// cached across filter-state generations, no identity of its own.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DerivedStatistics {
    pub total: usize,
    pub severity_counts: SeverityCounts,
    pub top_risk_factors: Vec<RiskFactorCount>,
    pub needs_analysis: usize,
}

/// Full occurrence counts for every risk-factor tag in the result set,
/// sorted by count descending. A record carrying the same tag twice
/// contributes two occurrences. Ties keep the order in which the tag was
/// first seen while scanning (stable sort over first-seen accumulation).
#[must_use]
pub fn risk_factor_counts(records: &[VulnerabilityRecord]) -> Vec<RiskFactorCount> {
    let mut counts: Vec<RiskFactorCount> = Vec::new();
    let mut slot_by_name: HashMap<String, usize> = HashMap::new();

    for record in records {
        for factor in &record.risk_factors {
            if let Some(&slot) = slot_by_name.get(factor) {
                counts[slot].count += 1;
            } else {
                slot_by_name.insert(factor.clone(), counts.len());
                counts.push(RiskFactorCount { name: factor.clone(), count: 1 });
            }
        }
    }

    counts.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count));
    counts
}

/// Compute [`DerivedStatistics`] over a result set (never over the raw
/// dataset directly). Records whose severity string is not one of the four
/// known levels appear in `total` but in no histogram bucket.
#[must_use]
pub fn derive_statistics(records: &[VulnerabilityRecord]) -> DerivedStatistics {
    let mut severity_counts = SeverityCounts::default();
    for record in records {
        if let Some(severity) = Severity::parse(&record.severity) {
            severity_counts.bump(severity);
        }
    }

    let mut top_risk_factors = risk_factor_counts(records);
    top_risk_factors.truncate(TOP_RISK_FACTORS);

    DerivedStatistics {
        total: records.len(),
        severity_counts,
        top_risk_factors,
        needs_analysis: records.iter().filter(|record| record.needs_analysis()).count(),
    }
}

/// One recomputed view: the surviving records in store order plus the
/// statistics derived from exactly that result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilteredResult {
    pub records: Vec<VulnerabilityRecord>,
    pub stats: DerivedStatistics,
}

/// Owns the session's [`FilterState`] and recomputes views against a
/// [`RecordStore`]. Constructor-injected state, no ambient globals; hosts
/// embedding this in a multi-threaded runtime must serialize the two
/// mutators and `current_view` themselves.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    state: FilterState,
}

impl FilterEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a pre-built state, e.g. a persisted filter profile applied
    /// at session start.
    #[must_use]
    pub fn with_state(state: FilterState) -> Self {
        Self { state }
    }

    /// Replace the search query. Any string is accepted, including empty.
    pub fn set_query(&mut self, text: &str) {
        self.state.search_query = text.to_string();
    }

    /// Add or remove one predicate id. Idempotent in both directions:
    /// re-activating a present id or deactivating an absent one is a no-op.
    pub fn set_filter(&mut self, id: &str, active: bool) {
        if active {
            self.state.active_filters.insert(id.to_string());
        } else {
            self.state.active_filters.remove(id);
        }
    }

    #[must_use]
    pub fn search_query(&self) -> &str {
        &self.state.search_query
    }

    #[must_use]
    pub fn active_filters(&self) -> &BTreeSet<String> {
        &self.state.active_filters
    }

    #[must_use]
    pub fn state(&self) -> &FilterState {
        &self.state
    }

    /// Recompute the filtered view and its statistics. Pure given the current
    /// state and store contents: calling this twice without an intervening
    /// mutation yields an identical result. An unloaded store yields an empty
    /// result set with zero-filled statistics rather than an error.
    #[must_use]
    pub fn current_view(&self, store: &RecordStore) -> FilteredResult {
        let records = filter_records(store.all(), &self.state);
        let stats = derive_statistics(&records);
        FilteredResult { records, stats }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mk_record(
        cve_id: &str,
        package_name: &str,
        severity: &str,
        kai_status: &str,
        risk_factors: &[&str],
    ) -> VulnerabilityRecord {
        VulnerabilityRecord {
            cve_id: cve_id.to_string(),
            package_name: package_name.to_string(),
            current_version: "1.4.0".to_string(),
            fixed_version: Some("1.5.2".to_string()),
            severity: severity.to_string(),
            cvss: 7.5,
            published_date: "2024-03-18T09:30:00Z".to_string(),
            description: format!("Sample security vulnerability description for {package_name}."),
            risk_factors: risk_factors.iter().map(ToString::to_string).collect(),
            kai_status: kai_status.to_string(),
        }
    }

    /// The three-record fixture from the acceptance scenarios: one valid
    /// Critical, one resolved Low, one under-investigation High.
    fn scenario_records() -> Vec<VulnerabilityRecord> {
        vec![
            mk_record("CVE-2024-0001", "lodash", "Critical", "valid", &["RCE"]),
            mk_record("CVE-2024-0002", "express", "Low", "invalid - norisk", &["DoS", "DoS"]),
            mk_record("CVE-2024-0003", "django", "High", "investigate", &[]),
        ]
    }

    fn loaded_store(records: Vec<VulnerabilityRecord>) -> RecordStore {
        let mut store = RecordStore::new();
        match store.load(records) {
            Ok(()) => store,
            Err(err) => panic!("fixture records should load: {err}"),
        }
    }

    fn to_json<T: serde::Serialize>(value: &T) -> String {
        match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => panic!("serialization should succeed: {err}"),
        }
    }

    fn cve_ids(result: &FilteredResult) -> Vec<&str> {
        result.records.iter().map(|record| record.cve_id.as_str()).collect()
    }

    // Test IDs: TSTO-001
    #[test]
    fn load_rejects_record_missing_required_fields() {
        let mut store = RecordStore::new();

        for (field, record) in [
            ("cveId", mk_record("  ", "lodash", "High", "valid", &[])),
            ("packageName", mk_record("CVE-2024-1000", "", "High", "valid", &[])),
            ("severity", mk_record("CVE-2024-1000", "lodash", " ", "valid", &[])),
        ] {
            let err = match store.load(vec![record]) {
                Ok(()) => panic!("load should reject record missing {field}"),
                Err(err) => err,
            };
            assert!(
                err.to_string().contains(field),
                "error `{err}` should name the missing field `{field}`"
            );
        }
    }

    // Test IDs: TSTO-002
    #[test]
    fn failed_load_keeps_previous_dataset_and_generation() {
        let mut store = loaded_store(scenario_records());
        assert_eq!(store.generation(), 1);

        let bad = vec![mk_record("", "lodash", "High", "valid", &[])];
        assert!(store.load(bad).is_err());

        assert_eq!(store.len(), 3);
        assert_eq!(store.generation(), 1);
        assert_eq!(store.all()[0].cve_id, "CVE-2024-0001");
    }

    // Test IDs: TSTO-003
    #[test]
    fn load_replaces_whole_dataset_and_bumps_generation() {
        let mut store = loaded_store(scenario_records());

        let replacement = vec![mk_record("CVE-2025-9000", "axios", "Medium", "pending", &["XSS"])];
        match store.load(replacement) {
            Ok(()) => {}
            Err(err) => panic!("replacement load should succeed: {err}"),
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.generation(), 2);
        assert_eq!(store.all()[0].cve_id, "CVE-2025-9000");
    }

    // Test IDs: TENG-001
    #[test]
    fn unfiltered_view_matches_acceptance_scenario() {
        let store = loaded_store(scenario_records());
        let engine = FilterEngine::new();

        let view = engine.current_view(&store);

        assert_eq!(cve_ids(&view), ["CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"]);
        assert_eq!(view.stats.total, 3);
        assert_eq!(
            view.stats.severity_counts,
            SeverityCounts { critical: 1, high: 1, medium: 0, low: 1 }
        );
        assert_eq!(
            view.stats.top_risk_factors,
            vec![
                RiskFactorCount { name: "DoS".to_string(), count: 2 },
                RiskFactorCount { name: "RCE".to_string(), count: 1 },
            ]
        );
        assert_eq!(view.stats.needs_analysis, 2);
    }

    // Test IDs: TENG-002
    #[test]
    fn analysis_filter_excludes_terminal_norisk_records() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_filter("analysis", true);

        let view = engine.current_view(&store);

        assert_eq!(cve_ids(&view), ["CVE-2024-0001", "CVE-2024-0003"]);
        assert_eq!(view.stats.total, 2);
        assert_eq!(view.stats.needs_analysis, 2);
        assert_eq!(
            view.stats.top_risk_factors,
            vec![RiskFactorCount { name: "RCE".to_string(), count: 1 }]
        );
    }

    // Test IDs: TENG-003
    #[test]
    fn ai_analysis_filter_excludes_only_its_own_status() {
        let mut records = scenario_records();
        records.push(mk_record("CVE-2024-0004", "moment", "Medium", "ai-invalid-norisk", &[]));
        let store = loaded_store(records);

        let mut engine = FilterEngine::new();
        engine.set_filter("aiAnalysis", true);

        let view = engine.current_view(&store);
        assert_eq!(cve_ids(&view), ["CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"]);
    }

    // Test IDs: TENG-004
    #[test]
    fn high_severity_filter_keeps_critical_and_high_only() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_filter("highSeverity", true);

        let view = engine.current_view(&store);
        assert_eq!(cve_ids(&view), ["CVE-2024-0001", "CVE-2024-0003"]);
    }

    // Test IDs: TENG-005
    #[test]
    fn query_matches_severity_field_case_insensitively() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_query("critical");

        let view = engine.current_view(&store);
        assert_eq!(cve_ids(&view), ["CVE-2024-0001"]);
    }

    // Test IDs: TENG-006
    #[test]
    fn query_matches_each_searchable_field() {
        let store = loaded_store(vec![
            mk_record("CVE-2021-44228", "log4j-core", "Critical", "valid", &[]),
            mk_record("CVE-2024-0002", "express", "Low", "valid", &[]),
        ]);
        let mut engine = FilterEngine::new();

        for query in ["44228", "LOG4J", "description for log4j"] {
            engine.set_query(query);
            let view = engine.current_view(&store);
            assert_eq!(cve_ids(&view), ["CVE-2021-44228"], "query `{query}` should match");
        }
    }

    // Test IDs: TENG-007
    #[test]
    fn query_does_not_match_non_searchable_fields() {
        let store = loaded_store(vec![mk_record(
            "CVE-2024-0001",
            "lodash",
            "Critical",
            "investigate",
            &[],
        )]);
        let mut engine = FilterEngine::new();

        // kaiStatus and currentVersion are outside the searchable field set.
        engine.set_query("investigate");
        assert!(engine.current_view(&store).records.is_empty());

        engine.set_query("1.4.0");
        assert!(engine.current_view(&store).records.is_empty());
    }

    // Test IDs: TENG-008
    #[test]
    fn query_and_filters_compose_conjunctively() {
        let store = loaded_store(vec![
            mk_record("CVE-2024-0001", "lodash", "Critical", "valid", &[]),
            mk_record("CVE-2024-0002", "lodash", "Low", "valid", &[]),
            mk_record("CVE-2024-0003", "express", "Critical", "invalid - norisk", &[]),
        ]);
        let mut engine = FilterEngine::new();
        engine.set_query("lodash");
        engine.set_filter("highSeverity", true);
        engine.set_filter("analysis", true);

        let view = engine.current_view(&store);
        assert_eq!(cve_ids(&view), ["CVE-2024-0001"]);
    }

    // Test IDs: TENG-009
    #[test]
    fn view_ignores_unrecognized_filter_ids() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_filter("slaOverdue", true);

        let view = engine.current_view(&store);
        assert_eq!(view.stats.total, 3);
        assert!(engine.active_filters().contains("slaOverdue"));
    }

    // Test IDs: TENG-010
    #[test]
    fn set_filter_is_idempotent_in_both_directions() {
        let mut engine = FilterEngine::new();

        engine.set_filter("analysis", true);
        engine.set_filter("analysis", true);
        assert_eq!(engine.active_filters().len(), 1);

        engine.set_filter("analysis", false);
        engine.set_filter("analysis", false);
        assert!(engine.active_filters().is_empty());
    }

    // Test IDs: TENG-011
    #[test]
    fn every_known_filter_id_resolves_to_a_predicate() {
        for id in known_filter_ids() {
            assert!(filter_predicate(id).is_some(), "known id `{id}` should resolve");
        }
        assert!(filter_predicate("slaOverdue").is_none());
    }

    // Test IDs: TENG-012
    #[test]
    fn empty_store_yields_empty_view_with_zero_statistics() {
        let store = RecordStore::new();
        let engine = FilterEngine::new();

        let view = engine.current_view(&store);
        assert!(view.records.is_empty());
        assert_eq!(view.stats.total, 0);
        assert_eq!(view.stats.severity_counts, SeverityCounts::default());
        assert!(view.stats.top_risk_factors.is_empty());
        assert_eq!(view.stats.needs_analysis, 0);
    }

    // Test IDs: TSTA-001
    #[test]
    fn unrecognized_severity_stays_in_records_but_not_in_histogram() {
        let store = loaded_store(vec![
            mk_record("CVE-2024-0001", "lodash", "Critical", "valid", &[]),
            mk_record("CVE-2024-0002", "express", "Unknown", "valid", &[]),
            mk_record("CVE-2024-0003", "django", "critical", "valid", &[]),
        ]);
        let engine = FilterEngine::new();

        let view = engine.current_view(&store);
        assert_eq!(view.stats.total, 3);
        // Classification is exact-match: lowercase "critical" is unrecognized.
        assert_eq!(view.stats.severity_counts.sum(), 1);
        assert_eq!(view.stats.severity_counts.critical, 1);
    }

    // Test IDs: TSTA-002
    #[test]
    fn risk_factor_ranking_truncates_to_top_five_with_first_seen_ties() {
        let store = loaded_store(vec![
            mk_record("CVE-1", "a", "Low", "valid", &["XSS", "DoS"]),
            mk_record("CVE-2", "b", "Low", "valid", &["DoS", "RCE", "SQL Injection"]),
            mk_record("CVE-3", "c", "Low", "valid", &["Privilege Escalation", "Info Leak"]),
            mk_record("CVE-4", "d", "Low", "valid", &["Info Leak", "RCE"]),
        ]);
        let engine = FilterEngine::new();

        let view = engine.current_view(&store);
        let names: Vec<&str> =
            view.stats.top_risk_factors.iter().map(|entry| entry.name.as_str()).collect();

        // DoS, RCE, Info Leak all count 2; XSS/SQLi/PrivEsc count 1 and tie in
        // first-seen order, with the sixth tag dropped by the limit.
        assert_eq!(names, ["DoS", "RCE", "Info Leak", "XSS", "SQL Injection"]);
        assert_eq!(view.stats.top_risk_factors[0].count, 2);
        assert_eq!(view.stats.top_risk_factors.len(), TOP_RISK_FACTORS);
    }

    // Test IDs: TSTA-003
    #[test]
    fn duplicate_tags_within_one_record_count_separately() {
        let counts = risk_factor_counts(&[mk_record("CVE-1", "a", "Low", "valid", &["DoS", "DoS"])]);
        assert_eq!(counts, vec![RiskFactorCount { name: "DoS".to_string(), count: 2 }]);
    }

    // Test IDs: TSTA-004
    #[test]
    fn needs_analysis_counts_unknown_statuses_as_open() {
        let store = loaded_store(vec![
            mk_record("CVE-1", "a", "Low", "invalid - norisk", &[]),
            mk_record("CVE-2", "b", "Low", "ai-invalid-norisk", &[]),
            mk_record("CVE-3", "c", "Low", "triaged-by-new-tool", &[]),
            mk_record("CVE-4", "d", "Low", "", &[]),
        ]);
        let engine = FilterEngine::new();

        assert_eq!(engine.current_view(&store).stats.needs_analysis, 2);
    }

    // Test IDs: TDET-001
    #[test]
    fn repeated_views_are_byte_identical() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_query("cve");
        engine.set_filter("analysis", true);

        let first = engine.current_view(&store);
        let second = engine.current_view(&store);
        assert_eq!(to_json(&first), to_json(&second));
    }

    // Test IDs: TDET-002
    #[test]
    fn toggle_inverse_restores_prior_result() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();
        engine.set_query("e");

        for id in ["analysis", "highSeverity", "notARealFilter"] {
            let before = engine.current_view(&store);
            engine.set_filter(id, true);
            engine.set_filter(id, false);
            let after = engine.current_view(&store);
            assert_eq!(to_json(&before), to_json(&after), "toggle of `{id}` should invert");
        }
    }

    // Test IDs: TDET-003
    #[test]
    fn narrowing_the_query_never_grows_the_result_set() {
        let store = loaded_store(scenario_records());
        let mut engine = FilterEngine::new();

        engine.set_query("CVE-2024");
        let broad: BTreeSet<String> =
            engine.current_view(&store).records.into_iter().map(|r| r.cve_id).collect();

        engine.set_query("CVE-2024-0002");
        let narrow: BTreeSet<String> =
            engine.current_view(&store).records.into_iter().map(|r| r.cve_id).collect();

        assert!(narrow.is_subset(&broad));
        assert_eq!(narrow.len(), 1);
    }

    // Test IDs: TSER-001
    #[test]
    fn record_round_trips_through_camel_case_wire_names() {
        let json = r#"{
            "cveId": "CVE-2023-1111",
            "packageName": "spring-boot",
            "currentVersion": "2.7.0",
            "fixedVersion": null,
            "severity": "High",
            "cvss": 8.1,
            "publishedDate": "2023-06-01T00:00:00Z",
            "description": "Sample.",
            "riskFactors": ["RCE"],
            "kaiStatus": "pending",
            "exploitAvailable": true
        }"#;

        let record: VulnerabilityRecord = match serde_json::from_str(json) {
            Ok(record) => record,
            Err(err) => panic!("wire record should deserialize: {err}"),
        };
        assert_eq!(record.cve_id, "CVE-2023-1111");
        assert_eq!(record.fixed_version, None);
        assert_eq!(record.kai_status, "pending");

        let serialized = to_json(&record);
        assert!(serialized.contains("\"cveId\""));
        assert!(serialized.contains("\"riskFactors\""));
    }

    fn fixture_dataset() -> Vec<VulnerabilityRecord> {
        let severities = ["Critical", "High", "Medium", "Low", "Moderate"];
        let statuses = ["valid", "invalid - norisk", "ai-invalid-norisk", "investigate"];
        let factors: [&[&str]; 4] = [&["RCE"], &["DoS", "DoS"], &["XSS", "RCE"], &[]];

        (0..24)
            .map(|index: usize| {
                mk_record(
                    &format!("CVE-2024-{:04}", 1000 + index),
                    ["lodash", "express", "django"][index % 3],
                    severities[index % severities.len()],
                    statuses[index % statuses.len()],
                    factors[index % factors.len()],
                )
            })
            .collect()
    }

    fn filter_subset_strategy() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(
            prop_oneof![
                Just("analysis".to_string()),
                Just("aiAnalysis".to_string()),
                Just("highSeverity".to_string()),
                Just("slaOverdue".to_string()),
                "[a-z]{1,8}",
            ],
            0..4,
        )
    }

    // Test IDs: TDET-004
    proptest! {
        #[test]
        fn property_views_are_idempotent_for_any_state(
            filters in filter_subset_strategy(),
            query in "[a-zA-Z0-9 -]{0,12}",
        ) {
            let store = loaded_store(fixture_dataset());
            let mut engine = FilterEngine::new();
            engine.set_query(&query);
            for id in &filters {
                engine.set_filter(id, true);
            }

            let first = engine.current_view(&store);
            let second = engine.current_view(&store);
            prop_assert_eq!(to_json(&first), to_json(&second));
        }
    }

    // Test IDs: TDET-005
    proptest! {
        #[test]
        fn property_toggle_inverse_holds_for_any_id(
            id in "[a-zA-Z]{1,12}",
            query in "[a-zA-Z0-9]{0,8}",
        ) {
            let store = loaded_store(fixture_dataset());
            let mut engine = FilterEngine::new();
            engine.set_query(&query);

            let before = engine.current_view(&store);
            engine.set_filter(&id, true);
            engine.set_filter(&id, false);
            let after = engine.current_view(&store);
            prop_assert_eq!(to_json(&before), to_json(&after));
        }
    }

    // Test IDs: TDET-006
    proptest! {
        #[test]
        fn property_appending_to_the_query_narrows_the_result(
            base in "[a-zA-Z0-9]{0,6}",
            suffix in "[a-zA-Z0-9]{1,4}",
            filters in filter_subset_strategy(),
        ) {
            let store = loaded_store(fixture_dataset());
            let mut engine = FilterEngine::new();
            for id in &filters {
                engine.set_filter(id, true);
            }

            engine.set_query(&base);
            let broad: BTreeSet<String> = engine
                .current_view(&store)
                .records
                .into_iter()
                .map(|record| record.cve_id)
                .collect();

            engine.set_query(&format!("{base}{suffix}"));
            let narrow: BTreeSet<String> = engine
                .current_view(&store)
                .records
                .into_iter()
                .map(|record| record.cve_id)
                .collect();

            prop_assert!(narrow.is_subset(&broad));
        }
    }

    // Test IDs: TSTA-005
    proptest! {
        #[test]
        fn property_histogram_and_risk_counts_conserve_totals(
            filters in filter_subset_strategy(),
            query in "[a-zA-Z0-9]{0,6}",
        ) {
            let store = loaded_store(fixture_dataset());
            let mut engine = FilterEngine::new();
            engine.set_query(&query);
            for id in &filters {
                engine.set_filter(id, true);
            }

            let view = engine.current_view(&store);

            let unrecognized = view
                .records
                .iter()
                .filter(|record| Severity::parse(&record.severity).is_none())
                .count();
            prop_assert_eq!(view.stats.severity_counts.sum(), view.stats.total - unrecognized);

            let full_counts = risk_factor_counts(&view.records);
            let occurrence_sum: usize = full_counts.iter().map(|entry| entry.count).sum();
            let pair_count: usize =
                view.records.iter().map(|record| record.risk_factors.len()).sum();
            prop_assert_eq!(occurrence_sum, pair_count);

            for entry in &view.stats.top_risk_factors {
                prop_assert!(full_counts.contains(entry));
            }
        }
    }
}
