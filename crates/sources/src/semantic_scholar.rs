//! Semantic Scholar worker - semantic similarity and influence signals
//!
//! Resolves an S2 paper id (from the DOI, else a title + first-author
//! search), then pulls AI-recommended similar papers, highly-influential
//! citations, topic-based siblings, and first-author papers.

use crate::credentials::Credentials;
use crate::http::SourceHttp;
use crate::limiter::RateLimitManager;
use crate::worker::{finalize_candidates, topic_overlap, SourceWorker};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use paperscout_common::config::SemanticScholarSettings;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{
    DiscoveredPaper, DiscoveryConfiguration, DiscoverySource, RelationshipType,
    SourceDiscoveryResult, SourcePaper,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fields requested on every paper payload
const PAPER_FIELDS: &str = "paperId,title,abstract,authors,venue,year,publicationDate,citationCount,influentialCitationCount,fieldsOfStudy,externalIds,url";

// ============================================================================
// Wire schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    venue: Option<String>,
    year: Option<i32>,
    publication_date: Option<String>,
    citation_count: Option<u64>,
    influential_citation_count: Option<u64>,
    fields_of_study: Option<Vec<String>>,
    external_ids: Option<serde_json::Value>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Author {
    author_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationsResponse {
    #[serde(default)]
    recommended_papers: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
struct CitationsResponse {
    #[serde(default)]
    data: Vec<CitationEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CitationEdge {
    #[serde(default)]
    is_influential: bool,
    citing_paper: Option<S2Paper>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
struct AuthorPapersResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

// ============================================================================
// Worker
// ============================================================================

/// Semantic Scholar source worker
pub struct SemanticScholarWorker {
    http: SourceHttp,
    base_url: String,
    credentials: Arc<dyn Credentials>,
}

impl SemanticScholarWorker {
    pub fn new(
        settings: &SemanticScholarSettings,
        credentials: Arc<dyn Credentials>,
        limiter: Arc<RateLimitManager>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(DiscoverySource::SemanticScholar, limiter, request_timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match self
            .credentials
            .credentials_for(DiscoverySource::SemanticScholar, None)
        {
            Some(key) => vec![("x-api-key", key)],
            None => Vec::new(),
        }
    }

    /// Resolve the S2 id and detail record for the source paper
    async fn resolve(
        &self,
        paper: &SourcePaper,
        cancel: &CancellationToken,
    ) -> Result<S2Paper> {
        if let Some(doi) = &paper.doi {
            let url = format!("{}/graph/v1/paper/DOI:{}", self.base_url, doi);
            return self
                .http
                .get_json(
                    &url,
                    &[("fields", PAPER_FIELDS.to_string())],
                    &self.headers(),
                    cancel,
                )
                .await;
        }

        let mut query = paper.title.clone();
        if let Some(author) = paper.first_author() {
            query.push(' ');
            query.push_str(author);
        }
        let url = format!("{}/graph/v1/paper/search", self.base_url);
        let response: SearchResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("query", query),
                    ("limit", "1".to_string()),
                    ("fields", PAPER_FIELDS.to_string()),
                ],
                &self.headers(),
                cancel,
            )
            .await?;
        response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::SourceProtocol {
                source: DiscoverySource::SemanticScholar,
                message: "no Semantic Scholar record matched the source paper".to_string(),
            })
    }

    async fn fetch_recommendations(
        &self,
        paper_id: &str,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<S2Paper>> {
        let url = format!(
            "{}/recommendations/v1/papers/forpaper/{}",
            self.base_url, paper_id
        );
        let response: RecommendationsResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("limit", cap.to_string()),
                    ("fields", PAPER_FIELDS.to_string()),
                ],
                &self.headers(),
                cancel,
            )
            .await?;
        Ok(response.recommended_papers)
    }

    async fn fetch_influential_citations(
        &self,
        paper_id: &str,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<S2Paper>> {
        let url = format!("{}/graph/v1/paper/{}/citations", self.base_url, paper_id);
        let response: CitationsResponse = self
            .http
            .get_json(
                &url,
                &[
                    // Over-fetch so influential edges survive the filter
                    ("limit", (cap * 4).min(100).to_string()),
                    ("fields", format!("isInfluential,{}", PAPER_FIELDS)),
                ],
                &self.headers(),
                cancel,
            )
            .await?;
        let mut edges = response.data;
        edges.sort_by_key(|e| std::cmp::Reverse(e.is_influential));
        Ok(edges
            .into_iter()
            .filter_map(|e| e.citing_paper)
            .take(cap)
            .collect())
    }

    async fn fetch_topic_siblings(
        &self,
        paper: &SourcePaper,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<S2Paper>> {
        let mut terms: Vec<&str> = paper.keywords.iter().map(String::as_str).collect();
        if let Some(field) = paper.primary_field.as_deref() {
            terms.push(field);
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/graph/v1/paper/search", self.base_url);
        let response: SearchResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("query", terms.join(" ")),
                    ("limit", cap.to_string()),
                    ("fields", PAPER_FIELDS.to_string()),
                ],
                &self.headers(),
                cancel,
            )
            .await?;
        Ok(response.data)
    }

    async fn fetch_author_papers(
        &self,
        detail: &S2Paper,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<S2Paper>> {
        let Some(author_id) = detail
            .authors
            .first()
            .and_then(|a| a.author_id.as_deref())
        else {
            return Ok(Vec::new());
        };
        let url = format!("{}/graph/v1/author/{}/papers", self.base_url, author_id);
        let response: AuthorPapersResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("limit", cap.to_string()),
                    ("fields", PAPER_FIELDS.to_string()),
                ],
                &self.headers(),
                cancel,
            )
            .await?;
        Ok(response.data)
    }

    async fn discover_inner(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let cap = config.max_per_source.div_ceil(4);
        let detail = self.resolve(paper, cancel).await?;
        let paper_id = detail
            .paper_id
            .clone()
            .ok_or_else(|| AppError::SourceProtocol {
                source: DiscoverySource::SemanticScholar,
                message: "resolved record has no paperId".to_string(),
            })?;

        let mut source_topics: Vec<String> = paper.keywords.clone();
        if let Some(field) = &paper.primary_field {
            source_topics.push(field.clone());
        }

        let mut candidates: Vec<DiscoveredPaper> = Vec::new();
        let mut errors: Vec<AppError> = Vec::new();
        let mut record = |label: &'static str,
                          relationship: RelationshipType,
                          outcome: Result<Vec<S2Paper>>| match outcome {
            Ok(papers) => {
                debug!(sub_fetch = label, count = papers.len(), "s2 sub-fetch done");
                let total = papers.len();
                candidates.extend(papers.into_iter().enumerate().filter_map(|(rank, p)| {
                    map_paper(p, relationship, rank, total, &source_topics)
                }));
            }
            Err(err) => {
                warn!(sub_fetch = label, error = %err, "s2 sub-fetch failed");
                errors.push(err);
            }
        };

        record(
            "recommendations",
            RelationshipType::SemanticSimilarity,
            self.fetch_recommendations(&paper_id, cap, cancel).await,
        );
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record(
            "influential_citations",
            RelationshipType::Cites,
            self.fetch_influential_citations(&paper_id, cap, cancel).await,
        );
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record(
            "topic_siblings",
            RelationshipType::Topic,
            self.fetch_topic_siblings(paper, cap, cancel).await,
        );
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record(
            "author_papers",
            RelationshipType::SemanticSimilarity,
            self.fetch_author_papers(&detail, cap, cancel).await,
        );

        if candidates.is_empty() {
            if let Some(err) = errors.into_iter().next() {
                return Err(err);
            }
        }

        // Exclude the source paper itself
        candidates.retain(|c| c.external_ids.semantic_scholar.as_deref() != Some(paper_id.as_str()));
        dedup_by_s2_id(&mut candidates);

        Ok(finalize_candidates(candidates, config.max_per_source))
    }
}

#[async_trait]
impl SourceWorker for SemanticScholarWorker {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::SemanticScholar
    }

    async fn discover(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> SourceDiscoveryResult {
        let start = Instant::now();
        match self.discover_inner(paper, config, cancel).await {
            Ok(papers) => SourceDiscoveryResult::ok(
                DiscoverySource::SemanticScholar,
                papers,
                start.elapsed().as_millis() as u64,
            ),
            Err(err) => {
                warn!(source_paper_id = %paper.id, error = %err, "semantic scholar worker failed");
                SourceDiscoveryResult::failure(
                    DiscoverySource::SemanticScholar,
                    start.elapsed().as_millis() as u64,
                    err.to_string(),
                )
            }
        }
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Map one S2 paper payload to a candidate.
///
/// `rank`/`total` position the paper inside its sub-fetch for the
/// recommendation component of the seed.
pub(crate) fn map_paper(
    payload: S2Paper,
    relationship: RelationshipType,
    rank: usize,
    total: usize,
    source_topics: &[String],
) -> Option<DiscoveredPaper> {
    let title = payload.title.clone().filter(|t| !t.trim().is_empty())?;

    let mut paper = DiscoveredPaper::new(DiscoverySource::SemanticScholar, relationship, title);
    paper.external_ids.semantic_scholar = payload.paper_id.clone();
    paper.external_ids.doi = payload
        .external_ids
        .as_ref()
        .and_then(|ids| ids.get("DOI"))
        .and_then(|v| v.as_str())
        .map(|d| crate::crossref::normalize_doi(d));
    paper.external_ids.arxiv = payload
        .external_ids
        .as_ref()
        .and_then(|ids| ids.get("ArXiv"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    paper.external_ids.url = payload.url.clone();
    paper.abstract_text = payload.abstract_text.clone();
    paper.authors = payload
        .authors
        .iter()
        .filter_map(|a| a.name.clone())
        .collect();
    paper.venue = payload.venue.clone().filter(|v| !v.is_empty());
    paper.published_date = parse_publication_date(&payload);
    paper.citation_count = payload.citation_count;
    paper.influential_citation_count = payload.influential_citation_count;
    paper.research_topics = payload.fields_of_study.clone().unwrap_or_default();

    paper.relevance_score = seed_score(&paper, relationship, rank, total, source_topics);
    Some(paper)
}

fn parse_publication_date(payload: &S2Paper) -> Option<NaiveDate> {
    if let Some(date) = payload
        .publication_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    payload.year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
}

/// Seed relevance per the documented component weights:
/// recommendation 0.4, influential-citation ratio 0.25, topic overlap 0.2,
/// citation velocity 0.15. Each component is clipped to [0, weight].
pub(crate) fn seed_score(
    paper: &DiscoveredPaper,
    relationship: RelationshipType,
    rank: usize,
    total: usize,
    source_topics: &[String],
) -> f64 {
    let recommendation = if relationship == RelationshipType::SemanticSimilarity && total > 0 {
        (total - rank) as f64 / total as f64
    } else {
        0.0
    };

    let influential_ratio = match (paper.influential_citation_count, paper.citation_count) {
        (Some(influential), Some(citations)) if citations > 0 => {
            influential as f64 / citations as f64
        }
        _ => 0.0,
    };

    let overlap = topic_overlap(source_topics, &paper.research_topics);

    let velocity = match (paper.citation_count, paper.published_date) {
        (Some(citations), Some(date)) => {
            let years = (Utc::now().year() - date.year()).max(1) as f64;
            (citations as f64 / years / 50.0).min(1.0)
        }
        _ => 0.0,
    };

    let score = (recommendation * 0.4).clamp(0.0, 0.4)
        + (influential_ratio * 0.25).clamp(0.0, 0.25)
        + (overlap * 0.2).clamp(0.0, 0.2)
        + (velocity * 0.15).clamp(0.0, 0.15);
    score.clamp(0.0, 1.0)
}

fn dedup_by_s2_id(papers: &mut Vec<DiscoveredPaper>) {
    let mut seen = std::collections::HashSet::new();
    papers.retain(|p| match &p.external_ids.semantic_scholar {
        Some(id) => seen.insert(id.clone()),
        None => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> S2Paper {
        serde_json::from_value(serde_json::json!({
            "paperId": "s2-123",
            "title": "Graph Neural Retrieval",
            "abstract": "We retrieve with graphs.",
            "authors": [{"authorId": "a1", "name": "Grace Hopper"}],
            "venue": "NeurIPS",
            "year": 2022,
            "publicationDate": "2022-12-01",
            "citationCount": 400,
            "influentialCitationCount": 100,
            "fieldsOfStudy": ["Computer Science"],
            "externalIds": {"DOI": "10.5/GNR", "ArXiv": "2212.00001"},
            "url": "https://www.semanticscholar.org/paper/s2-123"
        }))
        .unwrap()
    }

    #[test]
    fn test_map_paper_fields() {
        let topics = vec!["Computer Science".to_string()];
        let paper = map_paper(
            sample_payload(),
            RelationshipType::SemanticSimilarity,
            0,
            10,
            &topics,
        )
        .unwrap();

        assert_eq!(paper.external_ids.semantic_scholar.as_deref(), Some("s2-123"));
        assert_eq!(paper.external_ids.doi.as_deref(), Some("10.5/gnr"));
        assert_eq!(paper.external_ids.arxiv.as_deref(), Some("2212.00001"));
        assert_eq!(paper.authors, vec!["Grace Hopper"]);
        assert_eq!(
            paper.published_date,
            NaiveDate::from_ymd_opt(2022, 12, 1)
        );
        assert_eq!(paper.influential_citation_count, Some(100));
        assert!(paper.invariants_hold());
    }

    #[test]
    fn test_seed_component_weights() {
        let topics = vec!["Computer Science".to_string()];
        let top = map_paper(
            sample_payload(),
            RelationshipType::SemanticSimilarity,
            0,
            10,
            &topics,
        )
        .unwrap();
        let bottom = map_paper(
            sample_payload(),
            RelationshipType::SemanticSimilarity,
            9,
            10,
            &topics,
        )
        .unwrap();
        // Same paper, better recommendation rank scores higher
        assert!(top.relevance_score > bottom.relevance_score);
        assert!(top.relevance_score <= 1.0);

        // Recommendation component alone is capped at 0.4
        let no_signal = DiscoveredPaper::new(
            DiscoverySource::SemanticScholar,
            RelationshipType::SemanticSimilarity,
            "X".into(),
        );
        let score = seed_score(
            &no_signal,
            RelationshipType::SemanticSimilarity,
            0,
            10,
            &[],
        );
        assert!(score <= 0.4);
    }

    #[test]
    fn test_citation_edge_relationship_has_no_recommendation_component() {
        let topics = Vec::new();
        let cites = map_paper(sample_payload(), RelationshipType::Cites, 0, 10, &topics).unwrap();
        // influential ratio 0.25 of 0.25 weight + velocity; no recommendation part
        assert!(cites.relevance_score < 0.4);
        assert!(cites.relevance_score > 0.0);
    }

    #[test]
    fn test_map_paper_without_title_dropped() {
        let payload = S2Paper::default();
        assert!(map_paper(payload, RelationshipType::Topic, 0, 1, &[]).is_none());
    }

    #[test]
    fn test_dedup_by_s2_id() {
        let topics = Vec::new();
        let a = map_paper(sample_payload(), RelationshipType::Cites, 0, 1, &topics).unwrap();
        let b = map_paper(
            sample_payload(),
            RelationshipType::SemanticSimilarity,
            0,
            1,
            &topics,
        )
        .unwrap();
        let mut papers = vec![a, b];
        dedup_by_s2_id(&mut papers);
        assert_eq!(papers.len(), 1);
    }
}
