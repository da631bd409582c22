//! Optional LLM-based reranking
//!
//! When `enable_ai_synthesis` is set, the trimmed candidate list is sent
//! to an OpenAI-compatible chat endpoint together with the source
//! abstract. The model returns adjusted scores which are clamped to [0,1]
//! and blended 50/50 with the deterministic scores. Rerank failures are
//! silent: the deterministic ranking stands and a warning lands in the
//! synthesis metadata.

use async_trait::async_trait;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{DiscoveredPaper, SourcePaper};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One adjusted score from the reranker
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreAdjustment {
    pub paper_id: Uuid,
    /// Adjusted relevance in [0,1]
    pub score: f64,
}

/// Reranking collaborator
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        source: &SourcePaper,
        papers: &[DiscoveredPaper],
    ) -> Result<Vec<ScoreAdjustment>>;
}

// ============================================================================
// Chat-based implementation
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

/// Reranker backed by an OpenAI-compatible chat-completions endpoint
pub struct LlmReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmReranker {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("failed to build reranker client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn prompt(source: &SourcePaper, papers: &[DiscoveredPaper]) -> String {
        let mut prompt = format!(
            "Source paper abstract:\n{}\n\nCandidates:\n",
            source.abstract_text
        );
        for (index, paper) in papers.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {} (current score {:.2})\n",
                index + 1,
                paper.title,
                paper.relevance_score
            ));
        }
        prompt.push_str(
            "\nRate how related each candidate is to the source paper. \
Reply with one line per candidate in the exact format `<number>: <score>` \
where score is between 0 and 1. No other text.",
        );
        prompt
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(
        &self,
        source: &SourcePaper,
        papers: &[DiscoveredPaper],
    ) -> Result<Vec<ScoreAdjustment>> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: Self::prompt(source, papers),
            }],
            temperature: 0.0,
            max_tokens: 1024,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal {
                message: format!("rerank request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Internal {
                message: format!("rerank endpoint returned {}", response.status()),
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| AppError::Internal {
            message: format!("rerank response undecodable: {}", e),
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(parse_adjustments(&content, papers))
    }
}

/// Parse `<number>: <score>` lines back onto paper ids. Out-of-range
/// indexes and scores outside [0,1] are ignored.
pub(crate) fn parse_adjustments(
    content: &str,
    papers: &[DiscoveredPaper],
) -> Vec<ScoreAdjustment> {
    content
        .lines()
        .filter_map(|line| {
            let (index, score) = line.trim().split_once(':')?;
            let index: usize = index.trim().trim_start_matches('#').parse().ok()?;
            let score: f64 = score.trim().parse().ok()?;
            if !(0.0..=1.0).contains(&score) {
                return None;
            }
            let paper = papers.get(index.checked_sub(1)?)?;
            Some(ScoreAdjustment {
                paper_id: paper.id,
                score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::models::{DiscoverySource, RelationshipType};

    fn papers() -> Vec<DiscoveredPaper> {
        (0..3)
            .map(|i| {
                DiscoveredPaper::new(
                    DiscoverySource::Crossref,
                    RelationshipType::Topic,
                    format!("p{i}"),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_adjustments() {
        let papers = papers();
        let adjustments = parse_adjustments("1: 0.9\n2: 0.1\n3: 0.5", &papers);
        assert_eq!(adjustments.len(), 3);
        assert_eq!(adjustments[0].paper_id, papers[0].id);
        assert_eq!(adjustments[0].score, 0.9);
    }

    #[test]
    fn test_parse_ignores_bad_lines() {
        let papers = papers();
        let adjustments = parse_adjustments(
            "1: 0.9\nnot a line\n7: 0.5\n2: 1.4\n3: -0.1\n0: 0.2",
            &papers,
        );
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].paper_id, papers[0].id);
    }

    #[test]
    fn test_prompt_mentions_candidates() {
        let source = SourcePaper {
            id: Uuid::new_v4(),
            title: "Source".into(),
            abstract_text: "An abstract.".into(),
            authors: vec![],
            doi: None,
            journal: None,
            published_date: None,
            primary_field: None,
            keywords: vec![],
            main_concepts: None,
            methodology_details: None,
            key_findings: None,
        };
        let prompt = LlmReranker::prompt(&source, &papers());
        assert!(prompt.contains("An abstract."));
        assert!(prompt.contains("1. p0"));
        assert!(prompt.contains("3. p2"));
    }
}
