//! Perplexity worker - real-time trend signals
//!
//! Issues natural-language prompts derived from the source paper's title,
//! field, keywords, and abstract to an OpenAI-compatible chat-completions
//! endpoint, then parses structured citation lines out of the reply.
//! Responses are noisy: every candidate carries a confidence score, and
//! candidates below 0.3 or without an external identifier are dropped.

use crate::credentials::Credentials;
use crate::http::SourceHttp;
use crate::limiter::RateLimitManager;
use crate::worker::{finalize_candidates, SourceWorker};
use async_trait::async_trait;
use chrono::NaiveDate;
use paperscout_common::config::PerplexitySettings;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{
    DiscoveredPaper, DiscoveryConfiguration, DiscoverySource, RelationshipType,
    SourceDiscoveryResult, SourcePaper,
};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Candidates below this confidence are noise
const MIN_CONFIDENCE: f64 = 0.3;

// ============================================================================
// Wire schema (OpenAI-compatible chat completions)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

// ============================================================================
// Worker
// ============================================================================

/// Perplexity source worker
pub struct PerplexityWorker {
    http: SourceHttp,
    base_url: String,
    model: String,
    credentials: Arc<dyn Credentials>,
}

impl PerplexityWorker {
    pub fn new(
        settings: &PerplexitySettings,
        credentials: Arc<dyn Credentials>,
        limiter: Arc<RateLimitManager>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: SourceHttp::new(DiscoverySource::Perplexity, limiter, request_timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            credentials,
        })
    }

    fn bearer(&self) -> Result<String> {
        self.credentials
            .credentials_for(DiscoverySource::Perplexity, None)
            .ok_or_else(|| AppError::Configuration {
                message: "Perplexity API key is not configured".to_string(),
            })
    }

    async fn ask(
        &self,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let token = self.bearer()?;
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 2048,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let response: ChatResponse = self
            .http
            .post_json(
                &url,
                &request,
                &[("authorization", format!("Bearer {}", token))],
                cancel,
            )
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::SourceProtocol {
                source: DiscoverySource::Perplexity,
                message: "empty chat completion".to_string(),
            })
    }

    async fn discover_inner(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredPaper>> {
        let mut candidates = Vec::new();
        let mut errors: Vec<AppError> = Vec::new();

        let prompts = [
            (
                trending_prompt(paper),
                RelationshipType::Trending,
            ),
            (
                variants_prompt(paper),
                RelationshipType::Topic,
            ),
        ];

        for (prompt, default_relationship) in prompts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            match self.ask(prompt, cancel).await {
                Ok(reply) => {
                    candidates.extend(parse_citation_lines(&reply, default_relationship));
                }
                Err(err) => {
                    warn!(source_paper_id = %paper.id, error = %err, "perplexity prompt failed");
                    errors.push(err);
                }
            }
        }

        if candidates.is_empty() {
            if let Some(err) = errors.into_iter().next() {
                return Err(err);
            }
        }

        Ok(finalize_candidates(candidates, config.max_per_source))
    }
}

#[async_trait]
impl SourceWorker for PerplexityWorker {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Perplexity
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
                DiscoverySource::Perplexity,
                papers,
                start.elapsed().as_millis() as u64,
            ),
            Err(err) => {
                warn!(source_paper_id = %paper.id, error = %err, "perplexity worker failed");
                SourceDiscoveryResult::failure(
                    DiscoverySource::Perplexity,
                    start.elapsed().as_millis() as u64,
                    err.to_string(),
                )
            }
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

const SYSTEM_PROMPT: &str = "You are a bibliographic research assistant. \
Answer ONLY with a bullet list, one paper per line, in the exact format:\n\
- <title> | <year> | <DOI, arXiv id, or URL> | <relation: trending, open_access, or topic> | <confidence between 0 and 1>\n\
Do not add commentary.";

fn paper_context(paper: &SourcePaper) -> String {
    let mut context = format!("Title: {}\n", paper.title);
    if let Some(field) = &paper.primary_field {
        context.push_str(&format!("Field: {}\n", field));
    }
    if !paper.keywords.is_empty() {
        context.push_str(&format!("Keywords: {}\n", paper.keywords.join(", ")));
    }
    let abstract_excerpt: String = paper.abstract_text.chars().take(800).collect();
    context.push_str(&format!("Abstract: {}\n", abstract_excerpt));
    context
}

fn trending_prompt(paper: &SourcePaper) -> String {
    format!(
        "{}\nList up to 10 papers from the last two years that are currently \
trending and closely related to this paper.",
        paper_context(paper)
    )
}

fn variants_prompt(paper: &SourcePaper) -> String {
    format!(
        "{}\nList up to 10 papers that are either open-access versions of this \
work or foundational papers on the same topic.",
        paper_context(paper)
    )
}

// ============================================================================
// Parsing
// ============================================================================

fn doi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"10\.\d{4,9}/[^\s|]+").expect("valid regex"))
}

fn arxiv_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}\.\d{4,5}").expect("valid regex"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s|]+").expect("valid regex"))
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19|20)\d{2}").expect("valid regex"))
}

/// Parse one chat reply into candidates, dropping low-confidence lines and
/// lines without any external identifier.
pub(crate) fn parse_citation_lines(
    reply: &str,
    default_relationship: RelationshipType,
) -> Vec<DiscoveredPaper> {
    reply
        .lines()
        .filter_map(|line| parse_citation_line(line, default_relationship))
        .collect()
}

fn parse_citation_line(
    line: &str,
    default_relationship: RelationshipType,
) -> Option<DiscoveredPaper> {
    let line = line.trim();
    let body = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))?;

    let fields: Vec<&str> = body.split('|').map(str::trim).collect();
    let title = fields.first().filter(|t| !t.is_empty())?.to_string();

    let relationship = fields
        .iter()
        .find_map(|f| parse_relationship(f))
        .unwrap_or(default_relationship);

    let confidence = fields
        .iter()
        .rev()
        .find_map(|f| f.parse::<f64>().ok())
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(0.0);
    if confidence < MIN_CONFIDENCE {
        return None;
    }

    let mut paper = DiscoveredPaper::new(DiscoverySource::Perplexity, relationship, title);

    if let Some(doi) = doi_regex().find(body) {
        paper.external_ids.doi = Some(crate::crossref::normalize_doi(doi.as_str()));
    }
    if paper.external_ids.doi.is_none() {
        if let Some(arxiv) = body
            .to_lowercase()
            .contains("arxiv")
            .then(|| arxiv_regex().find(body))
            .flatten()
        {
            paper.external_ids.arxiv = Some(arxiv.as_str().to_string());
        }
    }
    if let Some(url) = url_regex().find(body) {
        paper.external_ids.url = Some(url.as_str().trim_end_matches(['.', ')']).to_string());
    }
    // Without at least one external identifier the candidate is unusable
    if paper.external_ids.is_empty() {
        return None;
    }

    paper.published_date = fields
        .get(1)
        .and_then(|f| year_regex().find(f))
        .and_then(|y| y.as_str().parse::<i32>().ok())
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));

    paper.relevance_score =
        (relationship.importance_weight() * confidence).clamp(0.0, 1.0);
    paper.additional_metadata = serde_json::json!({
        "format_version": paperscout_common::models::METADATA_FORMAT_VERSION,
        "confidence": confidence,
    });
    Some(paper)
}

fn parse_relationship(field: &str) -> Option<RelationshipType> {
    let field = field.to_lowercase();
    if field.contains("open_access") || field.contains("open access") {
        Some(RelationshipType::OpenAccessVariant)
    } else if field.contains("trending") {
        Some(RelationshipType::Trending)
    } else if field.contains("topic") {
        Some(RelationshipType::Topic)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_line() {
        let reply = "- Attention Is All You Need | 2017 | 10.48550/arXiv.1706.03762 | topic | 0.9";
        let papers = parse_citation_lines(reply, RelationshipType::Trending);
        assert_eq!(papers.len(), 1);
        let paper = &papers[0];
        assert_eq!(paper.title, "Attention Is All You Need");
        assert_eq!(paper.relationship_type, RelationshipType::Topic);
        assert_eq!(
            paper.external_ids.doi.as_deref(),
            Some("10.48550/arxiv.1706.03762")
        );
        assert_eq!(
            paper.published_date,
            NaiveDate::from_ymd_opt(2017, 1, 1)
        );
        assert!((paper.relevance_score - 0.5 * 0.9).abs() < 1e-9);
        assert!(paper.invariants_hold());
    }

    #[test]
    fn test_low_confidence_dropped() {
        let reply = "- Noise Paper | 2024 | 10.1/noise | trending | 0.2";
        assert!(parse_citation_lines(reply, RelationshipType::Trending).is_empty());
    }

    #[test]
    fn test_missing_identifier_dropped() {
        let reply = "- Vague Paper | 2024 | no identifier | trending | 0.8";
        assert!(parse_citation_lines(reply, RelationshipType::Trending).is_empty());
    }

    #[test]
    fn test_missing_confidence_dropped() {
        let reply = "- Unsure Paper | 2024 | 10.1/x | trending |";
        assert!(parse_citation_lines(reply, RelationshipType::Trending).is_empty());
    }

    #[test]
    fn test_arxiv_and_url_identifiers() {
        let reply = "\
- Preprint Alpha | 2023 | arXiv:2301.01234 | open_access | 0.7
- Web Paper | 2022 | https://example.org/paper.pdf | topic | 0.6
commentary line that is ignored";
        let papers = parse_citation_lines(reply, RelationshipType::Trending);
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].external_ids.arxiv.as_deref(), Some("2301.01234"));
        assert_eq!(
            papers[0].relationship_type,
            RelationshipType::OpenAccessVariant
        );
        assert_eq!(
            papers[1].external_ids.url.as_deref(),
            Some("https://example.org/paper.pdf")
        );
    }

    #[test]
    fn test_default_relationship_applied() {
        let reply = "- Plain Paper | 2024 | 10.9/plain | related | 0.8";
        let papers = parse_citation_lines(reply, RelationshipType::Trending);
        assert_eq!(papers[0].relationship_type, RelationshipType::Trending);
    }
}
