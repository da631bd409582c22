//! Read-only source paper lookup
//!
//! The primary paper store is owned by the surrounding platform; the
//! discovery core only reads the fields enumerated in `SourcePaper`.

use crate::errors::Result;
use crate::models::SourcePaper;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// External paper store collaborator
#[async_trait]
pub trait PaperStore: Send + Sync {
    async fn find_source_paper(&self, id: Uuid) -> Result<Option<SourcePaper>>;
}

/// In-memory paper store for tests and local runs
#[derive(Default)]
pub struct InMemoryPaperStore {
    papers: RwLock<HashMap<Uuid, SourcePaper>>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, paper: SourcePaper) {
        self.papers.write().await.insert(paper.id, paper);
    }
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn find_source_paper(&self, id: Uuid) -> Result<Option<SourcePaper>> {
        Ok(self.papers.read().await.get(&id).cloned())
    }
}
