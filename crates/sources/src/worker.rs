//! Source worker contract and shared scoring helpers

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use paperscout_common::models::{
    DiscoveredPaper, DiscoveryConfiguration, DiscoverySource, SourceDiscoveryResult, SourcePaper,
};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;

/// One worker per external source.
///
/// Workers never propagate errors past this boundary: every internal
/// failure becomes a `SourceDiscoveryResult` with `success=false` and an
/// empty paper list.
#[async_trait]
pub trait SourceWorker: Send + Sync {
    fn source(&self) -> DiscoverySource;

    async fn discover(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> SourceDiscoveryResult;
}

/// Intra-worker ordering: seed score descending, then citation count
/// descending, then more recent publication date, then title.
pub fn worker_ordering(a: &DiscoveredPaper, b: &DiscoveredPaper) -> Ordering {
    b.relevance_score
        .partial_cmp(&a.relevance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.citation_count.unwrap_or(0).cmp(&a.citation_count.unwrap_or(0)))
        .then_with(|| b.published_date.cmp(&a.published_date))
        .then_with(|| a.title.cmp(&b.title))
}

/// Sort by the worker tie-break rules and enforce the per-source cap
pub fn finalize_candidates(mut papers: Vec<DiscoveredPaper>, max_per_source: usize) -> Vec<DiscoveredPaper> {
    papers.sort_by(worker_ordering);
    papers.truncate(max_per_source);
    papers
}

/// Freshness factor in [0,1]: current-year papers score 1.0, decaying 4% a
/// year down to a 0.2 floor. Unknown dates sit in the middle.
pub fn freshness_factor(published: Option<NaiveDate>) -> f64 {
    match published {
        Some(date) => {
            let years = (Utc::now().year() - date.year()).max(0) as f64;
            (1.0 - years * 0.04).clamp(0.2, 1.0)
        }
        None => 0.6,
    }
}

/// Venue quality factor in [0,1] from venue presence and citation volume
pub fn venue_quality_factor(venue: Option<&str>, citation_count: Option<u64>) -> f64 {
    let has_venue = venue.is_some_and(|v| !v.trim().is_empty());
    match (has_venue, citation_count.unwrap_or(0)) {
        (true, c) if c >= 1_000 => 1.0,
        (true, c) if c >= 100 => 0.9,
        (true, _) => 0.8,
        (false, c) if c >= 100 => 0.7,
        (false, _) => 0.5,
    }
}

/// Jaccard overlap of two lowercase topic sets, in [0,1]
pub fn topic_overlap(ours: &[String], theirs: &[String]) -> f64 {
    if ours.is_empty() || theirs.is_empty() {
        return 0.0;
    }
    let ours: std::collections::HashSet<String> =
        ours.iter().map(|t| t.trim().to_lowercase()).collect();
    let theirs: std::collections::HashSet<String> =
        theirs.iter().map(|t| t.trim().to_lowercase()).collect();
    let intersection = ours.intersection(&theirs).count() as f64;
    let union = ours.union(&theirs).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::models::RelationshipType;

    fn candidate(title: &str, seed: f64, citations: Option<u64>) -> DiscoveredPaper {
        let mut paper = DiscoveredPaper::new(
            DiscoverySource::Crossref,
            RelationshipType::Cites,
            title.into(),
        );
        paper.relevance_score = seed;
        paper.citation_count = citations;
        paper
    }

    #[test]
    fn test_worker_ordering() {
        let papers = vec![
            candidate("b", 0.5, Some(10)),
            candidate("a", 0.5, Some(10)),
            candidate("c", 0.5, Some(99)),
            candidate("d", 0.9, None),
        ];
        let sorted = finalize_candidates(papers, 10);
        assert_eq!(sorted[0].title, "d");
        assert_eq!(sorted[1].title, "c");
        assert_eq!(sorted[2].title, "a");
        assert_eq!(sorted[3].title, "b");
    }

    #[test]
    fn test_finalize_enforces_cap() {
        let papers = (0..30)
            .map(|i| candidate(&format!("p{i}"), 0.5, None))
            .collect();
        assert_eq!(finalize_candidates(papers, 20).len(), 20);
    }

    #[test]
    fn test_freshness_bounds() {
        let old = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        assert_eq!(freshness_factor(Some(old)), 0.2);

        let current = Utc::now().date_naive();
        assert_eq!(freshness_factor(Some(current)), 1.0);

        assert_eq!(freshness_factor(None), 0.6);
    }

    #[test]
    fn test_venue_quality_range() {
        assert_eq!(venue_quality_factor(Some("Nature"), Some(5_000)), 1.0);
        assert_eq!(venue_quality_factor(Some("Nature"), None), 0.8);
        assert_eq!(venue_quality_factor(None, None), 0.5);
        assert_eq!(venue_quality_factor(Some("  "), Some(200)), 0.7);
    }

    #[test]
    fn test_topic_overlap() {
        let ours = vec!["Biology".to_string(), "genomics".to_string()];
        let theirs = vec!["biology".to_string(), "ecology".to_string()];
        let overlap = topic_overlap(&ours, &theirs);
        assert!((overlap - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(topic_overlap(&ours, &[]), 0.0);
    }
}
