//! Core domain model for related-paper discovery
//!
//! Provides:
//! - Source paper input and discovered paper output types
//! - Discovery configuration with mode presets and clamping
//! - Per-source and unified result envelopes
//! - Configuration fingerprinting for cache keys

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Format version stamped on every persisted JSON blob
pub const METADATA_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Enumerations
// ============================================================================

/// External systems a related paper can be discovered through
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoverySource {
    Crossref,
    SemanticScholar,
    Perplexity,
    InternalCache,
}

impl DiscoverySource {
    /// All sources that map to an outbound API
    pub fn external() -> [DiscoverySource; 3] {
        [
            DiscoverySource::Crossref,
            DiscoverySource::SemanticScholar,
            DiscoverySource::Perplexity,
        ]
    }

    /// Stable lowercase name used in config keys, cache keys, and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Crossref => "crossref",
            DiscoverySource::SemanticScholar => "semantic_scholar",
            DiscoverySource::Perplexity => "perplexity",
            DiscoverySource::InternalCache => "internal_cache",
        }
    }

    /// Precedence when picking the source of record for a merged candidate.
    /// Higher wins.
    pub fn record_precedence(&self) -> u8 {
        match self {
            DiscoverySource::SemanticScholar => 3,
            DiscoverySource::Crossref => 2,
            DiscoverySource::Perplexity => 1,
            DiscoverySource::InternalCache => 0,
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DiscoverySource {}

/// How a discovered paper relates to the source paper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Cites,
    CitedBy,
    SemanticSimilarity,
    AuthorNetwork,
    Venue,
    Topic,
    Trending,
    OpenAccessVariant,
}

impl RelationshipType {
    /// Importance weight used in score fusion and tie-breaking
    pub fn importance_weight(&self) -> f64 {
        match self {
            RelationshipType::Cites => 0.9,
            RelationshipType::CitedBy => 0.9,
            RelationshipType::SemanticSimilarity => 0.8,
            RelationshipType::AuthorNetwork => 0.6,
            RelationshipType::Venue => 0.4,
            RelationshipType::Topic => 0.5,
            RelationshipType::Trending => 0.5,
            RelationshipType::OpenAccessVariant => 0.3,
        }
    }
}

/// Discovery mode selecting configuration defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryMode {
    Quick,
    Comprehensive,
    Targeted,
    Experimental,
}

/// How aggressively the synthesis engine trades relevance for diversity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiversityLevel {
    Low,
    Medium,
    High,
}

impl DiversityLevel {
    /// Share of the final list reserved for diversity-driven picks
    pub fn diversity_share(&self) -> f64 {
        match self {
            DiversityLevel::Low => 0.3,
            DiversityLevel::Medium => 0.5,
            DiversityLevel::High => 0.7,
        }
    }

    /// Fraction of the relevance-ranked list eligible for diversification
    pub fn pool_fraction(&self) -> f64 {
        match self {
            DiversityLevel::Low => 0.8,
            DiversityLevel::Medium => 0.6,
            DiversityLevel::High => 1.0,
        }
    }
}

// ============================================================================
// Source paper (input)
// ============================================================================

/// The paper a discovery run starts from. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePaper {
    pub id: Uuid,
    pub title: String,
    pub abstract_text: String,
    /// Ordered author names, first author first
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub journal: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub primary_field: Option<String>,
    pub keywords: Vec<String>,
    pub main_concepts: Option<serde_json::Value>,
    pub methodology_details: Option<serde_json::Value>,
    pub key_findings: Option<serde_json::Value>,
}

impl SourcePaper {
    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

// ============================================================================
// Discovery configuration
// ============================================================================

/// Bounds on per-source candidate counts
pub const MAX_PER_SOURCE_CEILING: usize = 200;

/// One discovery run's configuration. Value object; clamp before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfiguration {
    pub mode: DiscoveryMode,
    pub sources_enabled: BTreeSet<DiscoverySource>,
    pub max_per_source: usize,
    pub max_total: usize,
    pub min_relevance: f64,
    pub diversity_level: DiversityLevel,
    pub timeout_secs: u64,
    /// Serial fan-out when false; only used for debug reproducibility
    pub parallel: bool,
    pub enable_ai_synthesis: bool,
}

impl DiscoveryConfiguration {
    /// Preset for the given mode
    pub fn for_mode(mode: DiscoveryMode) -> Self {
        match mode {
            DiscoveryMode::Quick => Self {
                mode,
                sources_enabled: [DiscoverySource::Crossref, DiscoverySource::SemanticScholar]
                    .into_iter()
                    .collect(),
                max_per_source: 10,
                max_total: 10,
                min_relevance: 0.5,
                diversity_level: DiversityLevel::Low,
                timeout_secs: 30,
                parallel: true,
                enable_ai_synthesis: false,
            },
            DiscoveryMode::Comprehensive => Self {
                mode,
                sources_enabled: DiscoverySource::external().into_iter().collect(),
                max_per_source: 50,
                max_total: 50,
                min_relevance: 0.3,
                diversity_level: DiversityLevel::Medium,
                timeout_secs: 120,
                parallel: true,
                enable_ai_synthesis: false,
            },
            DiscoveryMode::Targeted => Self {
                mode,
                sources_enabled: [DiscoverySource::Crossref, DiscoverySource::SemanticScholar]
                    .into_iter()
                    .collect(),
                max_per_source: 30,
                max_total: 25,
                min_relevance: 0.6,
                diversity_level: DiversityLevel::Low,
                timeout_secs: 60,
                parallel: true,
                enable_ai_synthesis: false,
            },
            DiscoveryMode::Experimental => Self {
                mode,
                sources_enabled: DiscoverySource::external().into_iter().collect(),
                max_per_source: 50,
                max_total: 40,
                min_relevance: 0.25,
                diversity_level: DiversityLevel::High,
                timeout_secs: 180,
                parallel: true,
                enable_ai_synthesis: true,
            },
        }
    }

    /// Force every field into its legal range. `max_total` may not exceed
    /// `max_per_source * |sources_enabled|`.
    pub fn validate_and_clamp(mut self) -> Self {
        self.max_per_source = self.max_per_source.clamp(1, MAX_PER_SOURCE_CEILING);
        if !self.min_relevance.is_finite() {
            self.min_relevance = 0.0;
        }
        self.min_relevance = self.min_relevance.clamp(0.0, 1.0);
        let ceiling = self.max_per_source * self.sources_enabled.len();
        self.max_total = self.max_total.min(ceiling);
        self.timeout_secs = self.timeout_secs.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Stable hash over every field that can affect output. Field-complete
    /// and order-independent: `sources_enabled` iterates in BTreeSet order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("mode={:?};", self.mode));
        for source in &self.sources_enabled {
            hasher.update(format!("source={};", source));
        }
        hasher.update(format!("max_per_source={};", self.max_per_source));
        hasher.update(format!("max_total={};", self.max_total));
        hasher.update(format!("min_relevance={:.6};", self.min_relevance));
        hasher.update(format!("diversity={:?};", self.diversity_level));
        hasher.update(format!("timeout_secs={};", self.timeout_secs));
        hasher.update(format!("parallel={};", self.parallel));
        hasher.update(format!("ai_synthesis={};", self.enable_ai_synthesis));
        hex::encode(hasher.finalize())
    }
}

impl Default for DiscoveryConfiguration {
    fn default() -> Self {
        Self::for_mode(DiscoveryMode::Comprehensive)
    }
}

// ============================================================================
// Discovered paper (output unit)
// ============================================================================

/// External identifiers for a discovered paper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub doi: Option<String>,
    pub semantic_scholar: Option<String>,
    pub arxiv: Option<String>,
    pub url: Option<String>,
}

impl ExternalIds {
    /// The strongest identifier present, used as the upsert key.
    /// Precedence: DOI > Semantic Scholar id > arXiv id > URL.
    pub fn strongest(&self) -> Option<(&'static str, &str)> {
        if let Some(doi) = self.doi.as_deref() {
            return Some(("doi", doi));
        }
        if let Some(s2) = self.semantic_scholar.as_deref() {
            return Some(("s2", s2));
        }
        if let Some(arxiv) = self.arxiv.as_deref() {
            return Some(("arxiv", arxiv));
        }
        self.url.as_deref().map(|u| ("url", u))
    }

    pub fn is_empty(&self) -> bool {
        self.strongest().is_none()
    }
}

/// One candidate related paper, as produced by a worker and refined by synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPaper {
    pub id: Uuid,
    pub external_ids: ExternalIds,
    pub title: String,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub venue: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub citation_count: Option<u64>,
    pub influential_citation_count: Option<u64>,
    pub research_topics: Vec<String>,
    /// Seed score from the worker, replaced by the fused score in synthesis
    pub relevance_score: f64,
    pub source_of_record: DiscoverySource,
    pub discovery_sources: BTreeSet<DiscoverySource>,
    pub relationship_type: RelationshipType,
    pub additional_metadata: serde_json::Value,
}

impl DiscoveredPaper {
    /// New candidate attributed to a single source
    pub fn new(source: DiscoverySource, relationship: RelationshipType, title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_ids: ExternalIds::default(),
            title,
            abstract_text: None,
            authors: Vec::new(),
            venue: None,
            published_date: None,
            citation_count: None,
            influential_citation_count: None,
            research_topics: Vec::new(),
            relevance_score: 0.0,
            source_of_record: source,
            discovery_sources: BTreeSet::from([source]),
            relationship_type: relationship,
            additional_metadata: serde_json::json!({
                "format_version": METADATA_FORMAT_VERSION,
            }),
        }
    }

    /// Invariants every emitted candidate must satisfy
    pub fn invariants_hold(&self) -> bool {
        !self.discovery_sources.is_empty()
            && self.discovery_sources.contains(&self.source_of_record)
            && self.relevance_score.is_finite()
            && (0.0..=1.0).contains(&self.relevance_score)
    }
}

/// Ordering of the final ranked list: relevance descending, ties broken by
/// relationship importance weight descending, then citation count descending.
pub fn ranking_order(a: &DiscoveredPaper, b: &DiscoveredPaper) -> Ordering {
    b.relevance_score
        .partial_cmp(&a.relevance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.relationship_type
                .importance_weight()
                .partial_cmp(&a.relationship_type.importance_weight())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.citation_count.unwrap_or(0).cmp(&a.citation_count.unwrap_or(0)))
}

// ============================================================================
// Result envelopes
// ============================================================================

/// What one source worker returned for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDiscoveryResult {
    pub source: DiscoverySource,
    pub papers: Vec<DiscoveredPaper>,
    pub metadata: serde_json::Value,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

impl SourceDiscoveryResult {
    pub fn ok(source: DiscoverySource, papers: Vec<DiscoveredPaper>, duration_ms: u64) -> Self {
        Self {
            source,
            papers,
            metadata: serde_json::json!({ "format_version": METADATA_FORMAT_VERSION }),
            duration_ms,
            success: true,
            error_message: None,
        }
    }

    /// Failed workers carry no papers
    pub fn failure(source: DiscoverySource, duration_ms: u64, error: String) -> Self {
        Self {
            source,
            papers: Vec::new(),
            metadata: serde_json::json!({ "format_version": METADATA_FORMAT_VERSION }),
            duration_ms,
            success: false,
            error_message: Some(error),
        }
    }
}

/// Synthesis bookkeeping attached to every unified result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisMetadata {
    pub raw_count: usize,
    pub processed_count: usize,
    pub successful_sources: Vec<DiscoverySource>,
    pub failed_sources: Vec<DiscoverySource>,
    pub processing_time_ms: u64,
    pub overall_confidence: f64,
    pub partial_result: bool,
    pub cache_hit: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// The ranked, deduplicated outcome of one discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedDiscoveryResult {
    pub source_paper_id: Uuid,
    pub papers: Vec<DiscoveredPaper>,
    pub per_source_results: Vec<SourceDiscoveryResult>,
    pub synthesis_metadata: SynthesisMetadata,
    pub configuration: DiscoveryConfiguration,
}

impl UnifiedDiscoveryResult {
    /// Empty result used when nothing could be discovered
    pub fn minimal(
        source_paper_id: Uuid,
        configuration: DiscoveryConfiguration,
        errors: Vec<String>,
    ) -> Self {
        let partial = !errors.is_empty();
        Self {
            source_paper_id,
            papers: Vec::new(),
            per_source_results: Vec::new(),
            synthesis_metadata: SynthesisMetadata {
                overall_confidence: 0.0,
                partial_result: partial,
                errors,
                ..Default::default()
            },
            configuration,
        }
    }
}

/// A unified result wrapped for the two-tier cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDiscoveryResult {
    pub result: UnifiedDiscoveryResult,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub hit_count: u64,
}

impl CachedDiscoveryResult {
    pub fn new(result: UnifiedDiscoveryResult, ttl: Duration) -> Self {
        Self {
            result,
            stored_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

/// Response returned to the caller of `discover`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub task_id: Uuid,
    pub unified_result: Option<UnifiedDiscoveryResult>,
    pub error: Option<crate::errors::ErrorSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DiscoveryConfiguration {
        DiscoveryConfiguration::for_mode(DiscoveryMode::Comprehensive)
    }

    #[test]
    fn test_mode_presets_are_clamped() {
        for mode in [
            DiscoveryMode::Quick,
            DiscoveryMode::Comprehensive,
            DiscoveryMode::Targeted,
            DiscoveryMode::Experimental,
        ] {
            let preset = DiscoveryConfiguration::for_mode(mode);
            let clamped = preset.clone().validate_and_clamp();
            assert_eq!(preset, clamped, "{mode:?} preset must already be legal");
        }
    }

    #[test]
    fn test_clamp_bounds_max_total() {
        let mut cfg = config();
        cfg.max_per_source = 500;
        cfg.max_total = 10_000;
        let cfg = cfg.validate_and_clamp();
        assert_eq!(cfg.max_per_source, MAX_PER_SOURCE_CEILING);
        assert_eq!(cfg.max_total, MAX_PER_SOURCE_CEILING * 3);
    }

    #[test]
    fn test_clamp_handles_nan_relevance() {
        let mut cfg = config();
        cfg.min_relevance = f64::NAN;
        assert_eq!(cfg.validate_and_clamp().min_relevance, 0.0);
    }

    #[test]
    fn test_fingerprint_is_field_sensitive() {
        let base = config();
        let mut other = config();
        other.min_relevance = 0.31;
        assert_ne!(base.fingerprint(), other.fingerprint());

        let mut timeout = config();
        timeout.timeout_secs += 1;
        assert_ne!(base.fingerprint(), timeout.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        // BTreeSet iteration order does not depend on insertion order
        let mut a = config();
        a.sources_enabled = [DiscoverySource::Perplexity, DiscoverySource::Crossref]
            .into_iter()
            .collect();
        let mut b = config();
        b.sources_enabled = [DiscoverySource::Crossref, DiscoverySource::Perplexity]
            .into_iter()
            .collect();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_strongest_external_id_precedence() {
        let ids = ExternalIds {
            doi: Some("10.1/x".into()),
            semantic_scholar: Some("abc".into()),
            arxiv: None,
            url: Some("https://example.org".into()),
        };
        assert_eq!(ids.strongest(), Some(("doi", "10.1/x")));

        let ids = ExternalIds {
            doi: None,
            semantic_scholar: None,
            arxiv: Some("2101.00001".into()),
            url: Some("https://example.org".into()),
        };
        assert_eq!(ids.strongest(), Some(("arxiv", "2101.00001")));
    }

    #[test]
    fn test_ranking_order_tie_breaks() {
        let mut a = DiscoveredPaper::new(
            DiscoverySource::Crossref,
            RelationshipType::Venue,
            "A".into(),
        );
        a.relevance_score = 0.8;
        let mut b = DiscoveredPaper::new(
            DiscoverySource::Crossref,
            RelationshipType::Cites,
            "B".into(),
        );
        b.relevance_score = 0.8;
        // Equal relevance: CITES (0.9) outranks VENUE (0.4)
        assert_eq!(ranking_order(&b, &a), Ordering::Less);

        let mut c = b.clone();
        c.citation_count = Some(100);
        b.citation_count = Some(10);
        assert_eq!(ranking_order(&c, &b), Ordering::Less);
    }

    #[test]
    fn test_cached_result_expiry() {
        let cached = CachedDiscoveryResult::new(
            UnifiedDiscoveryResult::minimal(Uuid::new_v4(), config(), Vec::new()),
            Duration::from_secs(3600),
        );
        assert!(!cached.is_expired(Utc::now()));
        assert!(cached.is_expired(Utc::now() + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_candidate_invariants() {
        let mut paper = DiscoveredPaper::new(
            DiscoverySource::SemanticScholar,
            RelationshipType::SemanticSimilarity,
            "Q".into(),
        );
        paper.relevance_score = 0.5;
        assert!(paper.invariants_hold());

        paper.relevance_score = f64::NAN;
        assert!(!paper.invariants_hold());

        paper.relevance_score = 0.5;
        paper.discovery_sources.clear();
        assert!(!paper.invariants_hold());
    }
}
