//! Discovery agent entry point
//!
//! Validates the request, resolves the configuration, wraps the run in a
//! durable task, and persists the outcome. The task body is a closure
//! handed to the task substrate; the substrate never sees the coordinator.

use crate::coordinator::DiscoveryCoordinator;
use crate::repository::DiscoveryRepository;
use paperscout_common::config::{DiscoverySettings, TaskSettings};
use paperscout_common::errors::{AppError, ErrorCode, ErrorSummary, Result};
use paperscout_common::models::{
    DiscoveryConfiguration, DiscoveryMode, DiscoveryResponse, SourcePaper,
    UnifiedDiscoveryResult,
};
use paperscout_common::papers::PaperStore;
use paperscout_common::DISCOVERY_AGENT_ID;
use paperscout_sources::limiter::{RateLimiterSnapshot, RateLimitManager};
use paperscout_tasks::{AgentTask, TaskRunner, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Cost units charged per discovery run
pub const DISCOVERY_COST_UNITS: u32 = 1;

/// Headroom the task timeout keeps above the coordinator's run deadline
const TASK_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Single entry point for related-paper discovery
pub struct DiscoveryAgent {
    papers: Arc<dyn PaperStore>,
    coordinator: Arc<DiscoveryCoordinator>,
    tasks: Arc<TaskRunner>,
    repository: DiscoveryRepository,
    limiter: Arc<RateLimitManager>,
    settings: DiscoverySettings,
    task_settings: TaskSettings,
}

impl DiscoveryAgent {
    pub fn new(
        papers: Arc<dyn PaperStore>,
        coordinator: Arc<DiscoveryCoordinator>,
        tasks: Arc<TaskRunner>,
        repository: DiscoveryRepository,
        limiter: Arc<RateLimitManager>,
        settings: DiscoverySettings,
        task_settings: TaskSettings,
    ) -> Self {
        Self {
            papers,
            coordinator,
            tasks,
            repository,
            limiter,
            settings,
            task_settings,
        }
    }

    /// Discover related papers for `paper_id` on behalf of `user_id`.
    ///
    /// A full configuration is validated and clamped; otherwise the mode
    /// preset applies, adjusted by the deployment's discovery settings.
    pub async fn discover(
        &self,
        paper_id: Uuid,
        user_id: Uuid,
        config: Option<DiscoveryConfiguration>,
    ) -> Result<DiscoveryResponse> {
        if !self.settings.enabled {
            return Err(AppError::Configuration {
                message: "discovery is disabled".to_string(),
            });
        }
        if paper_id.is_nil() {
            return Err(AppError::InvalidInput {
                message: "paper id must not be nil".to_string(),
            });
        }

        let paper = self
            .papers
            .find_source_paper(paper_id)
            .await?
            .ok_or_else(|| AppError::PaperNotFound {
                id: paper_id.to_string(),
            })?;

        let config = match config {
            Some(config) => config.validate_and_clamp(),
            None => self.default_configuration(),
        };

        let task_id = self
            .tasks
            .create(
                DISCOVERY_AGENT_ID,
                user_id,
                serde_json::json!({
                    "paper_id": paper_id,
                    "config": config,
                }),
            )
            .await?;
        info!(task_id = %task_id, source_paper_id = %paper_id, "discovery task created");

        let task = self
            .tasks
            .run(
                task_id,
                DISCOVERY_AGENT_ID,
                DISCOVERY_COST_UNITS,
                config.timeout() + TASK_TIMEOUT_MARGIN,
                |cancel| {
                    let coordinator = self.coordinator.clone();
                    let repository = self.repository.clone();
                    let paper = paper.clone();
                    let config = config.clone();
                    async move {
                        run_discovery(coordinator, repository, task_id, paper, config, cancel).await
                    }
                },
            )
            .await?;

        self.spawn_purge();
        Ok(build_response(task))
    }

    /// Operational read: one task's status
    pub async fn task_status(&self, task_id: Uuid) -> Result<TaskStatus> {
        self.tasks.status(task_id).await
    }

    /// Signal cancellation of a running discovery
    pub async fn cancel(&self, task_id: Uuid) -> Result<TaskStatus> {
        self.tasks.cancel(task_id).await
    }

    /// Operational read: cache counters
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.coordinator.cache_stats()
    }

    /// Operational read: per-source limiter snapshots
    pub fn rate_limit_stats(&self) -> Vec<RateLimiterSnapshot> {
        self.limiter.all_stats()
    }

    /// Operational read: task substrate counters
    pub fn task_metrics(&self) -> paperscout_tasks::TaskMetricsSnapshot {
        self.tasks.metrics()
    }

    fn default_configuration(&self) -> DiscoveryConfiguration {
        let mut config = DiscoveryConfiguration::for_mode(DiscoveryMode::Comprehensive);
        config.max_per_source = self.settings.max_papers_per_source;
        config.max_total = self.settings.max_total_papers;
        config.min_relevance = self.settings.min_relevance;
        config.timeout_secs = self.settings.run_timeout_secs;
        config.validate_and_clamp()
    }

    /// Cleanup is opportunistic: it runs off the request path and its
    /// failures only warn.
    fn spawn_purge(&self) {
        let tasks = self.tasks.clone();
        let retention = self.task_settings.purge_after();
        tokio::spawn(async move {
            if let Err(err) = tasks.purge_older_than(retention).await {
                warn!(error = %err, "task purge failed");
            }
        });
    }
}

async fn run_discovery(
    coordinator: Arc<DiscoveryCoordinator>,
    repository: DiscoveryRepository,
    task_id: Uuid,
    paper: SourcePaper,
    config: DiscoveryConfiguration,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<serde_json::Value> {
    let mut result = coordinator.run(&paper, &config, cancel.clone()).await;

    // Partial results are not persisted for cancelled runs
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    if let Err(err) = repository.persist_result(task_id, &result).await {
        warn!(task_id = %task_id, source_paper_id = %paper.id, error = %err, "persistence failed");
        result
            .synthesis_metadata
            .warnings
            .push(format!("persistence failed: {}", err));
    }

    Ok(serde_json::to_value(&result)?)
}

fn build_response(task: AgentTask) -> DiscoveryResponse {
    let task_id = task.task_id;
    match task.status {
        TaskStatus::Completed => {
            let unified_result = task
                .result
                .and_then(|value| serde_json::from_value::<UnifiedDiscoveryResult>(value).ok());
            DiscoveryResponse {
                task_id,
                unified_result,
                error: None,
            }
        }
        TaskStatus::Cancelled => DiscoveryResponse {
            task_id,
            unified_result: None,
            error: Some(ErrorSummary {
                kind: ErrorCode::Cancelled,
                message: "task cancelled".to_string(),
            }),
        },
        _ => DiscoveryResponse {
            task_id,
            unified_result: None,
            error: Some(task.error.map_or_else(
                || ErrorSummary {
                    kind: ErrorCode::InternalError,
                    message: format!("task settled as {}", task.status.as_str()),
                },
                |e| ErrorSummary {
                    kind: e.kind,
                    message: e.message,
                },
            )),
        },
    }
}
