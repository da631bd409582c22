//! Persistence of discovery outcomes over the durable KV
//!
//! Logical layout:
//! - `discovered_paper:{id}` holds the paper record
//! - `discovered_paper_by:{kind}:{value}` is the unique secondary index by
//!   strongest external id (DOI, S2 id, arXiv, URL), powering upserts
//! - `paper_relationship:{source}:{discovered}:{type}` is the relationship
//!   edge; the key itself enforces the composite unique constraint
//! - `discovery_result:{task_id}` is the per-run summary row

use chrono::{DateTime, Utc};
use paperscout_common::errors::{AppError, Result};
use paperscout_common::kv::KvStore;
use paperscout_common::models::{
    DiscoveredPaper, DiscoverySource, RelationshipType, UnifiedDiscoveryResult,
    METADATA_FORMAT_VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One edge between the source paper and a discovered paper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRelationship {
    pub source_paper_id: Uuid,
    pub discovered_paper_id: Uuid,
    pub relationship_type: RelationshipType,
    pub discovery_source: DiscoverySource,
    pub relevance_score: f64,
}

/// One row per completed discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRunRecord {
    pub format_version: u32,
    pub task_id: Uuid,
    pub source_paper_id: Uuid,
    pub config_fingerprint: String,
    pub raw_count: usize,
    pub paper_count: usize,
    pub duration_ms: u64,
    pub synthesis_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Repository for discovered papers, relationship edges, and run records
#[derive(Clone)]
pub struct DiscoveryRepository {
    kv: Arc<dyn KvStore>,
}

impl DiscoveryRepository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn paper_key(id: Uuid) -> String {
        format!("discovered_paper:{}", id)
    }

    fn external_index_key(kind: &str, value: &str) -> String {
        format!("discovered_paper_by:{}:{}", kind, value)
    }

    fn relationship_key(
        source_paper_id: Uuid,
        discovered_paper_id: Uuid,
        relationship: RelationshipType,
    ) -> String {
        format!(
            "paper_relationship:{}:{}:{:?}",
            source_paper_id, discovered_paper_id, relationship
        )
    }

    fn run_key(task_id: Uuid) -> String {
        format!("discovery_result:{}", task_id)
    }

    /// Upsert one discovered paper by its strongest external identifier.
    /// Returns the durable id (the existing row's id on a match).
    pub async fn upsert_paper(&self, paper: &DiscoveredPaper) -> Result<Uuid> {
        let stored_id = match paper.external_ids.strongest() {
            Some((kind, value)) => {
                let index_key = Self::external_index_key(kind, value);
                match self.kv.get_json::<Uuid>(&index_key).await? {
                    Some(existing_id) => existing_id,
                    None => {
                        self.kv.put_json(&index_key, &paper.id, None).await?;
                        paper.id
                    }
                }
            }
            None => paper.id,
        };

        let mut record = paper.clone();
        record.id = stored_id;
        self.kv
            .put_json(&Self::paper_key(stored_id), &record, None)
            .await?;
        Ok(stored_id)
    }

    /// Store one relationship edge. The composite key keeps
    /// `(source, discovered, type)` unique; a rediscovery overwrites the
    /// same edge with its fresh score.
    pub async fn upsert_relationship(&self, edge: &PaperRelationship) -> Result<()> {
        let key = Self::relationship_key(
            edge.source_paper_id,
            edge.discovered_paper_id,
            edge.relationship_type,
        );
        self.kv.put_json(&key, edge, None).await
    }

    /// Persist everything a completed run produced. Returns the number of
    /// papers written.
    pub async fn persist_result(
        &self,
        task_id: Uuid,
        result: &UnifiedDiscoveryResult,
    ) -> Result<usize> {
        for paper in &result.papers {
            let stored_id = self.upsert_paper(paper).await.map_err(persistence_fault)?;
            self.upsert_relationship(&PaperRelationship {
                source_paper_id: result.source_paper_id,
                discovered_paper_id: stored_id,
                relationship_type: paper.relationship_type,
                discovery_source: paper.source_of_record,
                relevance_score: paper.relevance_score,
            })
            .await
            .map_err(persistence_fault)?;
        }

        let record = DiscoveryRunRecord {
            format_version: METADATA_FORMAT_VERSION,
            task_id,
            source_paper_id: result.source_paper_id,
            config_fingerprint: result.configuration.fingerprint(),
            raw_count: result.synthesis_metadata.raw_count,
            paper_count: result.papers.len(),
            duration_ms: result.synthesis_metadata.processing_time_ms,
            synthesis_metadata: serde_json::to_value(&result.synthesis_metadata)?,
            created_at: Utc::now(),
        };
        self.kv
            .put_json(&Self::run_key(task_id), &record, None)
            .await
            .map_err(persistence_fault)?;

        debug!(task_id = %task_id, papers = result.papers.len(), "persisted discovery result");
        Ok(result.papers.len())
    }

    pub async fn find_paper(&self, id: Uuid) -> Result<Option<DiscoveredPaper>> {
        self.kv.get_json(&Self::paper_key(id)).await
    }

    pub async fn find_paper_by_external_id(
        &self,
        kind: &str,
        value: &str,
    ) -> Result<Option<DiscoveredPaper>> {
        match self
            .kv
            .get_json::<Uuid>(&Self::external_index_key(kind, value))
            .await?
        {
            Some(id) => self.find_paper(id).await,
            None => Ok(None),
        }
    }

    pub async fn relationships_for(&self, source_paper_id: Uuid) -> Result<Vec<PaperRelationship>> {
        let prefix = format!("paper_relationship:{}:", source_paper_id);
        let mut edges = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(&prefix).await? {
            edges.push(serde_json::from_slice(&bytes)?);
        }
        Ok(edges)
    }

    pub async fn find_run(&self, task_id: Uuid) -> Result<Option<DiscoveryRunRecord>> {
        self.kv.get_json(&Self::run_key(task_id)).await
    }
}

fn persistence_fault(err: AppError) -> AppError {
    match err {
        err @ AppError::PersistenceFault { .. } => err,
        other => AppError::PersistenceFault {
            message: other.to_string(),
        },
    }
}
