//! Discovery coordinator: cache check, parallel fan-out, partial-failure
//! handling, synthesis hand-off
//!
//! Never throws past its boundary: unrecoverable failures degrade to a
//! minimal result with the error recorded in the synthesis metadata.

use crate::cache::DiscoveryCache;
use crate::synthesis::SynthesisEngine;
use paperscout_common::metrics::DiscoveryRunTimer;
use paperscout_common::models::{
    DiscoveryConfiguration, DiscoverySource, SourceDiscoveryResult, SourcePaper,
    UnifiedDiscoveryResult,
};
use paperscout_sources::SourceWorker;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long finished-but-undrained workers get after a deadline or
/// cancellation before being aborted
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Coordinates one discovery run across the enabled source workers
pub struct DiscoveryCoordinator {
    workers: HashMap<DiscoverySource, Arc<dyn SourceWorker>>,
    cache: Arc<DiscoveryCache>,
    engine: SynthesisEngine,
    /// Ceiling for the per-worker soft deadline
    worker_deadline_ceiling: Duration,
}

impl DiscoveryCoordinator {
    pub fn new(
        workers: Vec<Arc<dyn SourceWorker>>,
        cache: Arc<DiscoveryCache>,
        engine: SynthesisEngine,
        worker_deadline_ceiling: Duration,
    ) -> Self {
        let workers = workers
            .into_iter()
            .map(|worker| (worker.source(), worker))
            .collect();
        Self {
            workers,
            cache,
            engine,
            worker_deadline_ceiling,
        }
    }

    /// Run one discovery. Worker completion order is not observable in the
    /// output; the final ordering is determined solely by synthesis.
    pub async fn run(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: CancellationToken,
    ) -> UnifiedDiscoveryResult {
        let timer = DiscoveryRunTimer::start();

        if config.sources_enabled.is_empty() {
            debug!(source_paper_id = %paper.id, "no sources enabled");
            timer.finish("no_sources");
            return UnifiedDiscoveryResult::minimal(paper.id, config.clone(), Vec::new());
        }

        let key = DiscoveryCache::cache_key(paper.id, config);
        if let Some(hit) = self.cache.get(&key).await {
            info!(source_paper_id = %paper.id, "discovery cache hit");
            let mut result = hit.result;
            result.synthesis_metadata.cache_hit = true;
            timer.finish("cache_hit");
            return result;
        }

        let results = if config.parallel {
            self.fan_out(paper, config, &cancel).await
        } else {
            self.run_serial(paper, config, &cancel).await
        };

        if cancel.is_cancelled() {
            timer.finish("cancelled");
            return UnifiedDiscoveryResult::minimal(
                paper.id,
                config.clone(),
                vec!["run cancelled".to_string()],
            );
        }

        let result = self.engine.synthesize(paper, config, results).await;

        // An all-failed run is never cached; the next call probes again
        if !result.synthesis_metadata.successful_sources.is_empty() {
            self.cache.put(&key, result.clone()).await;
        }

        info!(
            source_paper_id = %paper.id,
            papers = result.papers.len(),
            partial = result.synthesis_metadata.partial_result,
            "discovery run finished"
        );
        timer.finish(if result.synthesis_metadata.partial_result {
            "partial"
        } else {
            "success"
        });
        result
    }

    /// Operational read used by the agent
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    fn worker_deadline(&self, config: &DiscoveryConfiguration) -> Duration {
        let share = config.timeout() / config.sources_enabled.len().max(1) as u32;
        share.min(self.worker_deadline_ceiling)
    }

    async fn fan_out(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> Vec<SourceDiscoveryResult> {
        let per_worker = self.worker_deadline(config);
        let child = cancel.child_token();
        let started = Instant::now();

        let mut results: Vec<SourceDiscoveryResult> = Vec::new();
        let mut pending: BTreeSet<DiscoverySource> = BTreeSet::new();
        let mut join_set: JoinSet<SourceDiscoveryResult> = JoinSet::new();

        for &source in &config.sources_enabled {
            match self.workers.get(&source) {
                Some(worker) => {
                    pending.insert(source);
                    let worker = worker.clone();
                    let paper = paper.clone();
                    let config = config.clone();
                    let token = child.clone();
                    join_set
                        .spawn(async move { run_worker(worker, paper, config, token, per_worker).await });
                }
                None => {
                    results.push(SourceDiscoveryResult::failure(
                        source,
                        0,
                        "no worker registered for source".to_string(),
                    ));
                }
            }
        }

        let overall = tokio::time::sleep(config.timeout());
        tokio::pin!(overall);
        let mut interrupted: Option<&'static str> = None;

        while !pending.is_empty() {
            tokio::select! {
                _ = &mut overall => {
                    warn!(source_paper_id = %paper.id, "run deadline reached, cancelling workers");
                    interrupted = Some("run deadline exceeded");
                    child.cancel();
                    break;
                }
                _ = cancel.cancelled() => {
                    info!(source_paper_id = %paper.id, "run cancelled, stopping workers");
                    interrupted = Some("run cancelled");
                    child.cancel();
                    break;
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok(result)) => {
                            pending.remove(&result.source);
                            results.push(result);
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "worker task aborted");
                        }
                        None => break,
                    }
                }
            }
        }

        // Cancelled workers stop after their in-flight request; give them a
        // short grace to report, then abort stragglers.
        if let Some(reason) = interrupted {
            let drain = tokio::time::timeout(DRAIN_GRACE, async {
                while let Some(joined) = join_set.join_next().await {
                    if let Ok(result) = joined {
                        pending.remove(&result.source);
                        results.push(result);
                    }
                }
            })
            .await;
            if drain.is_err() {
                join_set.abort_all();
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;
            for source in pending {
                results.push(SourceDiscoveryResult::failure(
                    source,
                    elapsed_ms,
                    reason.to_string(),
                ));
            }
        } else {
            // Workers that panicked leave pending entries behind
            let elapsed_ms = started.elapsed().as_millis() as u64;
            for source in pending {
                results.push(SourceDiscoveryResult::failure(
                    source,
                    elapsed_ms,
                    "worker aborted".to_string(),
                ));
            }
        }

        results.sort_by_key(|r| r.source);
        results
    }

    /// Serial fan-out used for debug reproducibility
    async fn run_serial(
        &self,
        paper: &SourcePaper,
        config: &DiscoveryConfiguration,
        cancel: &CancellationToken,
    ) -> Vec<SourceDiscoveryResult> {
        let per_worker = self.worker_deadline(config);
        let deadline = Instant::now() + config.timeout();
        let mut results = Vec::new();

        for &source in &config.sources_enabled {
            if cancel.is_cancelled() {
                results.push(SourceDiscoveryResult::failure(
                    source,
                    0,
                    "run cancelled".to_string(),
                ));
                continue;
            }
            let Some(worker) = self.workers.get(&source) else {
                results.push(SourceDiscoveryResult::failure(
                    source,
                    0,
                    "no worker registered for source".to_string(),
                ));
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                results.push(SourceDiscoveryResult::failure(
                    source,
                    0,
                    "run deadline exceeded".to_string(),
                ));
                continue;
            }
            results.push(
                run_worker(
                    worker.clone(),
                    paper.clone(),
                    config.clone(),
                    cancel.clone(),
                    per_worker.min(remaining),
                )
                .await,
            );
        }

        results.sort_by_key(|r| r.source);
        results
    }
}

async fn run_worker(
    worker: Arc<dyn SourceWorker>,
    paper: SourcePaper,
    config: DiscoveryConfiguration,
    cancel: CancellationToken,
    deadline: Duration,
) -> SourceDiscoveryResult {
    let source = worker.source();
    match tokio::time::timeout(deadline, worker.discover(&paper, &config, &cancel)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(source = %source, deadline_ms = deadline.as_millis() as u64, "worker deadline exceeded");
            SourceDiscoveryResult::failure(
                source,
                deadline.as_millis() as u64,
                "worker deadline exceeded".to_string(),
            )
        }
    }
}
