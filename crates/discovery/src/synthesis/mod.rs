//! Synthesis engine: dedup, cross-source score fusion, diversity
//! selection, final ranking
//!
//! Deterministic unless AI reranking is enabled; two runs over the same
//! per-source results produce identical output.

pub mod dedup;
pub mod diversity;
pub mod rerank;

use paperscout_common::models::{
    ranking_order, DiscoveredPaper, DiscoveryConfiguration, DiscoverySource,
    SourceDiscoveryResult, SourcePaper, SynthesisMetadata, UnifiedDiscoveryResult,
};
use rerank::{Reranker, ScoreAdjustment};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// Cross-source fusion weights
const WEIGHT_SEED: f64 = 0.35;
const WEIGHT_AGREEMENT: f64 = 0.20;
const WEIGHT_RELATIONSHIP: f64 = 0.20;
const WEIGHT_CITATIONS: f64 = 0.15;
const WEIGHT_COMPLETENESS: f64 = 0.10;

/// Synthesis engine over per-source worker results
#[derive(Default)]
pub struct SynthesisEngine {
    reranker: Option<Arc<dyn Reranker>>,
}

impl SynthesisEngine {
    pub fn new() -> Self {
        Self { reranker: None }
    }

    pub fn with_reranker(reranker: Arc<dyn Reranker>) -> Self {
        Self {
            reranker: Some(reranker),
        }
    }

    /// Produce the unified, ranked result for one run
    pub async fn synthesize(
        &self,
        source_paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        results: Vec<SourceDiscoveryResult>,
    ) -> UnifiedDiscoveryResult {
        let start = Instant::now();

        let mut successful_sources: Vec<DiscoverySource> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.source)
            .collect();
        successful_sources.sort();
        let mut failed_sources: Vec<DiscoverySource> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.source)
            .collect();
        failed_sources.sort();
        let mut errors: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.source,
                    r.error_message.as_deref().unwrap_or("unknown failure")
                )
            })
            .collect();
        errors.sort();

        let raw: Vec<DiscoveredPaper> = results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.papers.iter().cloned())
            .collect();
        let raw_count = raw.len();
        let scales = seed_scales(&results);

        let mut papers = dedup::dedup(raw);
        for paper in &mut papers {
            paper.relevance_score = fuse_score(paper, &scales);
        }
        let mut papers = select(papers, config);

        let mut warnings = Vec::new();
        if config.enable_ai_synthesis {
            match &self.reranker {
                Some(reranker) => match reranker.rerank(source_paper, &papers).await {
                    Ok(adjustments) => {
                        apply_adjustments(&mut papers, adjustments);
                        debug!(count = papers.len(), "applied AI rerank");
                    }
                    Err(err) => {
                        warn!(error = %err, "AI rerank failed, keeping deterministic ranking");
                        warnings.push(format!("ai rerank skipped: {}", err));
                    }
                },
                None => warnings.push("ai synthesis enabled but no reranker configured".to_string()),
            }
        }

        let enabled = config.sources_enabled.len();
        let mean_relevance = if papers.is_empty() {
            0.0
        } else {
            papers.iter().map(|p| p.relevance_score).sum::<f64>() / papers.len() as f64
        };
        let overall_confidence = if enabled == 0 {
            0.0
        } else {
            mean_relevance * successful_sources.len() as f64 / enabled as f64
        };

        UnifiedDiscoveryResult {
            source_paper_id: source_paper.id,
            synthesis_metadata: SynthesisMetadata {
                raw_count,
                processed_count: papers.len(),
                partial_result: !failed_sources.is_empty(),
                successful_sources,
                failed_sources,
                processing_time_ms: start.elapsed().as_millis() as u64,
                overall_confidence,
                cache_hit: false,
                warnings,
                errors,
            },
            papers,
            per_source_results: results,
            configuration: config.clone(),
        }
    }
}

/// Per-source (min, max) seed ranges used for normalization
fn seed_scales(results: &[SourceDiscoveryResult]) -> HashMap<DiscoverySource, (f64, f64)> {
    let mut scales = HashMap::new();
    for result in results.iter().filter(|r| r.success) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for paper in &result.papers {
            min = min.min(paper.relevance_score);
            max = max.max(paper.relevance_score);
        }
        if min.is_finite() {
            scales.insert(result.source, (min, max));
        }
    }
    scales
}

/// Rescale a candidate's seed so its source's top candidate maps to 1.0
/// and bottom to 0.0 within this run. A merged candidate uses its source
/// of record's scale.
fn normalized_seed(paper: &DiscoveredPaper, scales: &HashMap<DiscoverySource, (f64, f64)>) -> f64 {
    match scales.get(&paper.source_of_record) {
        Some(&(min, max)) if max > min => {
            ((paper.relevance_score - min) / (max - min)).clamp(0.0, 1.0)
        }
        // A source with a single candidate is its own top
        Some(_) => 1.0,
        None => paper.relevance_score.clamp(0.0, 1.0),
    }
}

fn citation_factor(citation_count: Option<u64>) -> f64 {
    let count = citation_count.unwrap_or(0) as f64;
    ((1.0 + count).log10() / 4.0).min(1.0)
}

/// Fraction of {title, abstract, authors, venue, published date} present
fn data_completeness(paper: &DiscoveredPaper) -> f64 {
    let mut present = 0u8;
    if !paper.title.trim().is_empty() {
        present += 1;
    }
    if paper.abstract_text.as_deref().is_some_and(|a| !a.trim().is_empty()) {
        present += 1;
    }
    if !paper.authors.is_empty() {
        present += 1;
    }
    if paper.venue.as_deref().is_some_and(|v| !v.trim().is_empty()) {
        present += 1;
    }
    if paper.published_date.is_some() {
        present += 1;
    }
    present as f64 / 5.0
}

/// Cross-source fusion of one candidate's relevance
fn fuse_score(paper: &DiscoveredPaper, scales: &HashMap<DiscoverySource, (f64, f64)>) -> f64 {
    let agreement = (paper.discovery_sources.len() as f64 / 2.0).min(1.0);
    let score = WEIGHT_SEED * normalized_seed(paper, scales)
        + WEIGHT_AGREEMENT * agreement
        + WEIGHT_RELATIONSHIP * paper.relationship_type.importance_weight()
        + WEIGHT_CITATIONS * citation_factor(paper.citation_count)
        + WEIGHT_COMPLETENESS * data_completeness(paper);
    score.clamp(0.0, 1.0)
}

/// Selection pipeline: relevance filter, diversity selection, final trim,
/// rank order. Idempotent: running it over its own output is a no-op.
fn select(mut papers: Vec<DiscoveredPaper>, config: &DiscoveryConfiguration) -> Vec<DiscoveredPaper> {
    papers.retain(|p| p.relevance_score >= config.min_relevance);
    papers.sort_by(ranking_order);
    let mut papers = diversity::diversify(papers, config.diversity_level, config.max_total);
    papers.truncate(config.max_total);
    papers
}

/// Blend adjusted scores 50/50 with the deterministic ones and re-rank
fn apply_adjustments(papers: &mut Vec<DiscoveredPaper>, adjustments: Vec<ScoreAdjustment>) {
    let by_id: HashMap<uuid::Uuid, f64> = adjustments
        .into_iter()
        .map(|a| (a.paper_id, a.score.clamp(0.0, 1.0)))
        .collect();
    for paper in papers.iter_mut() {
        if let Some(adjusted) = by_id.get(&paper.id) {
            paper.relevance_score = ((paper.relevance_score + adjusted) / 2.0).clamp(0.0, 1.0);
        }
    }
    papers.sort_by(ranking_order);
}
