//! PaperScout discovery core
//!
//! Given a source paper, produces a ranked, deduplicated, diverse list of
//! related papers by fanning out to external bibliographic APIs,
//! synthesizing and scoring their results, persisting outcomes, and
//! exposing progress and cancellation to callers.
//!
//! Modules:
//! - [`cache`] - two-tier discovery result cache
//! - [`synthesis`] - dedup, score fusion, diversity selection, ranking
//! - [`coordinator`] - parallel fan-out with deadlines and partial failure
//! - [`repository`] - persistence of papers, edges, and run records
//! - [`agent`] - the `discover` entry point on the task substrate

pub mod agent;
pub mod cache;
pub mod coordinator;
pub mod repository;
pub mod synthesis;

pub use agent::DiscoveryAgent;
pub use cache::{CacheStats, DiscoveryCache};
pub use coordinator::DiscoveryCoordinator;
pub use repository::{DiscoveryRepository, DiscoveryRunRecord, PaperRelationship};
pub use synthesis::SynthesisEngine;

use paperscout_common::config::AppConfig;
use paperscout_common::credits::CreditService;
use paperscout_common::errors::Result;
use paperscout_common::kv::KvStore;
use paperscout_common::papers::PaperStore;
use paperscout_sources::limiter::RateLimitManager;
use paperscout_sources::{
    Credentials, CrossrefWorker, PerplexityWorker, SemanticScholarWorker, SourceWorker,
    StaticCredentials,
};
use paperscout_tasks::{RetryPolicy, TaskRunner};
use std::sync::Arc;
use synthesis::rerank::LlmReranker;

/// Composition root: wire a fully configured [`DiscoveryAgent`] from the
/// application configuration and its external collaborators.
pub fn build_agent(
    config: &AppConfig,
    papers: Arc<dyn PaperStore>,
    credits: Arc<dyn CreditService>,
    kv: Arc<dyn KvStore>,
) -> Result<DiscoveryAgent> {
    let limiter = Arc::new(RateLimitManager::from_settings(&config.rate_limit));
    let credentials: Arc<dyn Credentials> =
        Arc::new(StaticCredentials::from_settings(&config.sources));
    let request_timeout = config.request_timeout();

    let mut workers: Vec<Arc<dyn SourceWorker>> = vec![
        Arc::new(CrossrefWorker::new(
            &config.sources.crossref,
            limiter.clone(),
            request_timeout,
        )?),
        Arc::new(SemanticScholarWorker::new(
            &config.sources.semantic_scholar,
            credentials.clone(),
            limiter.clone(),
            request_timeout,
        )?),
    ];
    // The Perplexity worker needs a bearer token to be of any use
    if config.sources.perplexity.api_key.is_some() {
        workers.push(Arc::new(PerplexityWorker::new(
            &config.sources.perplexity,
            credentials.clone(),
            limiter.clone(),
            request_timeout,
        )?));
    }

    let cache = Arc::new(DiscoveryCache::new(
        config.cache.memory_capacity,
        config.cache_ttl(),
        Some(kv.clone()),
    ));

    let engine = match &config.sources.perplexity.api_key {
        Some(key) => SynthesisEngine::with_reranker(Arc::new(LlmReranker::new(
            &config.sources.perplexity.base_url,
            key.clone(),
            config.sources.perplexity.model.clone(),
            request_timeout,
        )?)),
        None => SynthesisEngine::new(),
    };

    let coordinator = Arc::new(DiscoveryCoordinator::new(
        workers,
        cache,
        engine,
        config.worker_timeout(),
    ));
    let tasks = Arc::new(TaskRunner::new(
        kv.clone(),
        credits,
        RetryPolicy::from_settings(&config.tasks),
    ));
    let repository = DiscoveryRepository::new(kv);

    Ok(DiscoveryAgent::new(
        papers,
        coordinator,
        tasks,
        repository,
        limiter,
        config.discovery.clone(),
        config.tasks.clone(),
    ))
}
