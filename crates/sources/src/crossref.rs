//! Crossref worker - bibliographic citation network
//!
//! Resolves the source paper's DOI (from input or by title probe), then
//! fans out to five capped sub-fetches: forward citations, backward
//! references, same-author recent works, same-venue recent works, and
//! same-subject works. Each sub-fetch holds its own permits.

use crate::http::SourceHttp;
use crate::limiter::RateLimitManager;
use crate::worker::{finalize_candidates, freshness_factor, venue_quality_factor, SourceWorker};
use async_trait::async_trait;
use chrono::NaiveDate;
use paperscout_common::config::CrossrefSettings;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{
    DiscoveredPaper, DiscoveryConfiguration, DiscoverySource, RelationshipType,
    SourceDiscoveryResult, SourcePaper,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ============================================================================
// Wire schema
// ============================================================================

#[derive(Debug, Deserialize)]
struct WorksListResponse {
    message: WorksList,
}

#[derive(Debug, Deserialize)]
struct WorksList {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: CrossrefWork,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    issued: Option<CrossrefDate>,
    #[serde(rename = "is-referenced-by-count")]
    cited_by_count: Option<u64>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    reference: Vec<CrossrefReference>,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefReference {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "article-title")]
    article_title: Option<String>,
    #[serde(rename = "journal-title")]
    journal_title: Option<String>,
    author: Option<String>,
    year: Option<String>,
}

// ============================================================================
// Worker
// ============================================================================

/// Crossref source worker
pub struct CrossrefWorker {
    http: SourceHttp,
    base_url: String,
    mailto: Option<String>,
}

impl CrossrefWorker {
    pub fn new(
        settings: &CrossrefSettings,
        limiter: std::sync::Arc<RateLimitManager>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(DiscoverySource::Crossref, limiter, request_timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            mailto: settings.mailto.clone(),
        })
    }

    fn query<'a>(&self, mut params: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }

    /// Resolve a DOI from the input or via a bibliographic title probe
    async fn resolve_doi(
        &self,
        paper: &SourcePaper,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if let Some(doi) = &paper.doi {
            return Ok(Some(normalize_doi(doi)));
        }

        let url = format!("{}/works", self.base_url);
        let query = self.query(vec![
            ("query.bibliographic", paper.title.clone()),
            ("rows", "1".to_string()),
        ]);
        let response: WorksListResponse = self.http.get_json(&url, &query, &[], cancel).await?;
        Ok(response
            .message
            .items
            .into_iter()
            .next()
            .and_then(|work| work.doi)
            .map(|doi| normalize_doi(&doi)))
    }

    async fn fetch_list(
        &self,
        params: Vec<(&str, String)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrossrefWork>> {
        let url = format!("{}/works", self.base_url);
        let query = self.query(params);
        let response: WorksListResponse = self.http.get_json(&url, &query, &[], cancel).await?;
        Ok(response.message.items)
    }

    /// Papers that cite the source paper
    async fn fetch_forward_citations(
        &self,
        doi: &str,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let works = self
            .fetch_list(
                vec![
                    ("filter", format!("reference:{}", doi)),
                    ("rows", cap.to_string()),
                    ("sort", "issued".to_string()),
                    ("order", "desc".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(map_works(works, RelationshipType::Cites, cap))
    }

    /// Papers the source paper references, taken from its reference list
    async fn fetch_backward_references(
        &self,
        doi: &str,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let url = format!("{}/works/{}", self.base_url, doi);
        let query = self.query(Vec::new());
        let response: WorkResponse = self.http.get_json(&url, &query, &[], cancel).await?;
        let papers = response
            .message
            .reference
            .iter()
            .filter_map(map_reference)
            .take(cap)
            .collect();
        Ok(papers)
    }

    async fn fetch_author_works(
        &self,
        paper: &SourcePaper,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let Some(first_author) = paper.first_author() else {
            return Ok(Vec::new());
        };
        let works = self
            .fetch_list(
                vec![
                    ("query.author", first_author.to_string()),
                    ("rows", cap.to_string()),
                    ("sort", "issued".to_string()),
                    ("order", "desc".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(map_works(works, RelationshipType::AuthorNetwork, cap))
    }

    async fn fetch_venue_works(
        &self,
        paper: &SourcePaper,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let Some(journal) = paper.journal.as_deref().filter(|j| !j.is_empty()) else {
            return Ok(Vec::new());
        };
        let works = self
            .fetch_list(
                vec![
                    ("query.container-title", journal.to_string()),
                    ("rows", cap.to_string()),
                    ("sort", "issued".to_string()),
                    ("order", "desc".to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(map_works(works, RelationshipType::Venue, cap))
    }

    async fn fetch_subject_works(
        &self,
        paper: &SourcePaper,
        cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let mut terms: Vec<&str> = paper.keywords.iter().map(String::as_str).collect();
        if let Some(field) = paper.primary_field.as_deref() {
            terms.push(field);
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let works = self
            .fetch_list(
                vec![
                    ("query.bibliographic", terms.join(" ")),
                    ("rows", cap.to_string()),
                ],
                cancel,
            )
            .await?;
        Ok(map_works(works, RelationshipType::Topic, cap))
    }

    async fn discover_inner(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let cap = config.max_per_source.div_ceil(5);
        let doi = self.resolve_doi(paper, cancel).await?;

        let mut candidates: Vec<DiscoveredPaper> = Vec::new();
        let mut errors: Vec<AppError> = Vec::new();

        // Citation sub-fetches need a DOI; the rest work from metadata
        let mut record = |label: &'static str, outcome: Result<Vec<DiscoveredPaper>>| match outcome
        {
            Ok(papers) => {
                debug!(sub_fetch = label, count = papers.len(), "crossref sub-fetch done");
                candidates.extend(papers);
            }
            Err(err) => {
                warn!(sub_fetch = label, error = %err, "crossref sub-fetch failed");
                errors.push(err);
            }
        };

        if let Some(doi) = &doi {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            record(
                "forward_citations",
                self.fetch_forward_citations(doi, cap, cancel).await,
            );
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            record(
                "backward_references",
                self.fetch_backward_references(doi, cap, cancel).await,
            );
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record("author_works", self.fetch_author_works(paper, cap, cancel).await);
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record("venue_works", self.fetch_venue_works(paper, cap, cancel).await);
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        record("subject_works", self.fetch_subject_works(paper, cap, cancel).await);

        if candidates.is_empty() {
            if let Some(err) = errors.into_iter().next() {
                return Err(err);
            }
        }

        // Exclude the source paper itself
        if let Some(doi) = &doi {
            candidates.retain(|c| c.external_ids.doi.as_deref() != Some(doi.as_str()));
        }
        dedup_by_doi(&mut candidates);

        Ok(finalize_candidates(candidates, config.max_per_source))
    }
}

#[async_trait]
impl SourceWorker for CrossrefWorker {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Crossref
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
                DiscoverySource::Crossref,
                papers,
                start.elapsed().as_millis() as u64,
            ),
            Err(err) => {
                warn!(source_paper_id = %paper.id, error = %err, "crossref worker failed");
                SourceDiscoveryResult::failure(
                    DiscoverySource::Crossref,
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

pub(crate) fn normalize_doi(doi: &str) -> String {
    doi.trim()
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .trim_start_matches("doi:")
        .to_lowercase()
}

fn parse_date_parts(date: &CrossrefDate) -> Option<NaiveDate> {
    let parts = date.date_parts.first()?;
    let year = (*parts.first()?)?;
    let month = parts.get(1).copied().flatten().unwrap_or(1);
    let day = parts.get(2).copied().flatten().unwrap_or(1);
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

fn map_works(
    works: Vec<CrossrefWork>,
    relationship: RelationshipType,
    cap: usize,
) -> Vec<DiscoveredPaper> {
    works
        .into_iter()
        .filter_map(|work| map_work(work, relationship))
        .take(cap)
        .collect()
}

/// Map one Crossref work to a candidate. Works without a title are dropped.
pub(crate) fn map_work(
    work: CrossrefWork,
    relationship: RelationshipType,
) -> Option<DiscoveredPaper> {
    let title = work.title.first().filter(|t| !t.trim().is_empty())?.clone();

    let mut paper = DiscoveredPaper::new(DiscoverySource::Crossref, relationship, title);
    paper.external_ids.doi = work.doi.as_deref().map(normalize_doi);
    paper.external_ids.url = work.url;
    paper.abstract_text = work.abstract_text.map(strip_jats_markup);
    paper.authors = work
        .author
        .iter()
        .map(|a| match (&a.given, &a.family) {
            (Some(given), Some(family)) => format!("{} {}", given, family),
            (None, Some(family)) => family.clone(),
            (Some(given), None) => given.clone(),
            (None, None) => String::new(),
        })
        .filter(|name| !name.is_empty())
        .collect();
    paper.venue = work.container_title.into_iter().next();
    paper.published_date = work.issued.as_ref().and_then(parse_date_parts);
    paper.citation_count = work.cited_by_count;
    paper.research_topics = work.subject;

    paper.relevance_score = seed_score(&paper, relationship);
    Some(paper)
}

/// Map a sparse reference-list entry; entries without both a DOI and a
/// title carry too little signal to keep.
fn map_reference(reference: &CrossrefReference) -> Option<DiscoveredPaper> {
    let title = reference
        .article_title
        .as_deref()
        .filter(|t| !t.trim().is_empty())?;

    let mut paper = DiscoveredPaper::new(
        DiscoverySource::Crossref,
        RelationshipType::CitedBy,
        title.to_string(),
    );
    paper.external_ids.doi = reference.doi.as_deref().map(normalize_doi);
    paper.external_ids.doi.as_ref()?;
    if let Some(author) = &reference.author {
        paper.authors = vec![author.clone()];
    }
    paper.venue = reference.journal_title.clone();
    paper.published_date = reference
        .year
        .as_deref()
        .and_then(|y| y.parse::<i32>().ok())
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));

    paper.relevance_score = seed_score(&paper, RelationshipType::CitedBy);
    Some(paper)
}

/// Seed relevance: relationship base weight scaled by freshness and venue
/// quality, all factors in [0,1].
fn seed_score(paper: &DiscoveredPaper, relationship: RelationshipType) -> f64 {
    let base = relationship.importance_weight();
    let freshness = freshness_factor(paper.published_date);
    let venue = venue_quality_factor(paper.venue.as_deref(), paper.citation_count);
    (base * freshness * venue).clamp(0.0, 1.0)
}

/// Crossref abstracts arrive as JATS XML fragments
fn strip_jats_markup(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn dedup_by_doi(papers: &mut Vec<DiscoveredPaper>) {
    let mut seen = std::collections::HashSet::new();
    papers.retain(|p| match &p.external_ids.doi {
        Some(doi) => seen.insert(doi.clone()),
        None => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_work() -> CrossrefWork {
        serde_json::from_value(serde_json::json!({
            "DOI": "10.1000/XYZ123",
            "title": ["Deep Citation Graphs"],
            "abstract": "<jats:p>We study citation graphs.</jats:p>",
            "author": [
                {"given": "Ada", "family": "Lovelace"},
                {"family": "Turing"}
            ],
            "container-title": ["Journal of Graphs"],
            "issued": {"date-parts": [[2021, 3]]},
            "is-referenced-by-count": 250,
            "subject": ["Computer Science"],
            "URL": "https://doi.org/10.1000/xyz123"
        }))
        .unwrap()
    }

    #[test]
    fn test_map_work_fields() {
        let paper = map_work(sample_work(), RelationshipType::Cites).unwrap();
        assert_eq!(paper.external_ids.doi.as_deref(), Some("10.1000/xyz123"));
        assert_eq!(paper.title, "Deep Citation Graphs");
        assert_eq!(paper.abstract_text.as_deref(), Some("We study citation graphs."));
        assert_eq!(paper.authors, vec!["Ada Lovelace", "Turing"]);
        assert_eq!(paper.venue.as_deref(), Some("Journal of Graphs"));
        assert_eq!(
            paper.published_date,
            NaiveDate::from_ymd_opt(2021, 3, 1)
        );
        assert_eq!(paper.citation_count, Some(250));
        assert_eq!(paper.relationship_type, RelationshipType::Cites);
        assert!(paper.invariants_hold());
        assert!(paper.relevance_score > 0.0);
    }

    #[test]
    fn test_map_work_without_title_dropped() {
        let work = CrossrefWork::default();
        assert!(map_work(work, RelationshipType::Topic).is_none());
    }

    #[test]
    fn test_map_reference_requires_doi_and_title() {
        let full = CrossrefReference {
            doi: Some("10.2/ABC".into()),
            article_title: Some("Old Classic".into()),
            journal_title: Some("Annals".into()),
            author: Some("Hopper".into()),
            year: Some("1986".into()),
        };
        let paper = map_reference(&full).unwrap();
        assert_eq!(paper.external_ids.doi.as_deref(), Some("10.2/abc"));
        assert_eq!(paper.relationship_type, RelationshipType::CitedBy);
        assert_eq!(
            paper.published_date,
            NaiveDate::from_ymd_opt(1986, 1, 1)
        );

        let missing_doi = CrossrefReference {
            article_title: Some("No DOI".into()),
            ..Default::default()
        };
        assert!(map_reference(&missing_doi).is_none());
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("https://doi.org/10.1/X"), "10.1/x");
        assert_eq!(normalize_doi("doi:10.1/Y "), "10.1/y");
        assert_eq!(normalize_doi(" 10.1/Z"), "10.1/z");
    }

    #[test]
    fn test_strip_jats_markup() {
        assert_eq!(
            strip_jats_markup("<jats:p>Hello <jats:i>world</jats:i></jats:p>".into()),
            "Hello world"
        );
    }

    #[test]
    fn test_seed_uses_relationship_base() {
        let cites = map_work(sample_work(), RelationshipType::Cites).unwrap();
        let venue = map_work(sample_work(), RelationshipType::Venue).unwrap();
        assert!(cites.relevance_score > venue.relevance_score);
    }

    #[test]
    fn test_dedup_by_doi() {
        let a = map_work(sample_work(), RelationshipType::Cites).unwrap();
        let b = map_work(sample_work(), RelationshipType::Venue).unwrap();
        let mut papers = vec![a, b];
        dedup_by_doi(&mut papers);
        assert_eq!(papers.len(), 1);
    }
}
