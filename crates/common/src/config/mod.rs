//! Configuration management for PaperScout services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Discovery pipeline configuration
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Per-source rate limiting and circuit breaking
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Two-tier cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// External source API endpoints and credentials
    #[serde(default)]
    pub sources: SourceSettings,

    /// Agent task substrate configuration
    #[serde(default)]
    pub tasks: TaskSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySettings {
    /// Master switch for the discovery subsystem
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Upper bound of candidates each worker may return
    #[serde(default = "default_max_papers_per_source")]
    pub max_papers_per_source: usize,

    /// Upper bound after synthesis
    #[serde(default = "default_max_total_papers")]
    pub max_total_papers: usize,

    /// Minimum post-fusion score to keep
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    /// Per-request transport timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Per-worker soft deadline ceiling in seconds
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,

    /// Overall run deadline in seconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    /// Crossref ceiling in requests per second
    #[serde(default = "default_crossref_per_second")]
    pub crossref_requests_per_second: f64,

    /// Semantic Scholar ceiling in requests per minute
    #[serde(default = "default_s2_per_minute")]
    pub semantic_scholar_requests_per_minute: f64,

    /// Perplexity ceiling in requests per minute
    #[serde(default = "default_perplexity_per_minute")]
    pub perplexity_requests_per_minute: f64,

    /// Consecutive failures within the window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Sliding failure window in seconds
    #[serde(default = "default_failure_window")]
    pub failure_window_secs: u64,

    /// Cooldown before an open circuit probes again, in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Redis URL for the durable tier; None degrades to memory-only
    pub redis_url: Option<String>,

    /// Tier-1 entry cap
    #[serde(default = "default_cache_capacity")]
    pub memory_capacity: usize,

    /// Write TTL for both tiers, in hours
    #[serde(default = "default_cache_duration_hours")]
    pub duration_hours: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub crossref: CrossrefSettings,

    #[serde(default)]
    pub semantic_scholar: SemanticScholarSettings,

    #[serde(default)]
    pub perplexity: PerplexitySettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrossrefSettings {
    #[serde(default = "default_crossref_base_url")]
    pub base_url: String,

    /// Polite-pool contact address appended to requests
    pub mailto: Option<String>,
}

impl Default for CrossrefSettings {
    fn default() -> Self {
        Self {
            base_url: default_crossref_base_url(),
            mailto: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SemanticScholarSettings {
    #[serde(default = "default_s2_base_url")]
    pub base_url: String,

    /// Optional API key sent as x-api-key
    pub api_key: Option<String>,
}

impl Default for SemanticScholarSettings {
    fn default() -> Self {
        Self {
            base_url: default_s2_base_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerplexitySettings {
    #[serde(default = "default_perplexity_base_url")]
    pub base_url: String,

    /// Bearer token; the Perplexity worker is disabled without one
    pub api_key: Option<String>,

    #[serde(default = "default_perplexity_model")]
    pub model: String,
}

impl Default for PerplexitySettings {
    fn default() -> Self {
        Self {
            base_url: default_perplexity_base_url(),
            api_key: None,
            model: default_perplexity_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskSettings {
    /// Retry budget per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Terminal tasks older than this many days may be purged
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
}

impl TaskSettings {
    /// Purge retention as a Duration
    pub fn purge_after(&self) -> Duration {
        Duration::from_secs(self.purge_after_days as u64 * 86_400)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilitySettings {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_enabled() -> bool {
    true
}
fn default_max_papers_per_source() -> usize {
    50
}
fn default_max_total_papers() -> usize {
    50
}
fn default_min_relevance() -> f64 {
    0.3
}
fn default_request_timeout() -> u64 {
    30
}
fn default_worker_timeout() -> u64 {
    60
}
fn default_run_timeout() -> u64 {
    120
}
fn default_crossref_per_second() -> f64 {
    45.0
}
fn default_s2_per_minute() -> f64 {
    100.0
}
fn default_perplexity_per_minute() -> f64 {
    10.0
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window() -> u64 {
    60
}
fn default_cooldown() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_cache_duration_hours() -> u64 {
    24
}
fn default_crossref_base_url() -> String {
    "https://api.crossref.org".to_string()
}
fn default_s2_base_url() -> String {
    "https://api.semanticscholar.org".to_string()
}
fn default_perplexity_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}
fn default_perplexity_model() -> String {
    "sonar".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_purge_after_days() -> u32 {
    7
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_service_name() -> String {
    "paperscout".to_string()
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_papers_per_source: default_max_papers_per_source(),
            max_total_papers: default_max_total_papers(),
            min_relevance: default_min_relevance(),
            request_timeout_secs: default_request_timeout(),
            worker_timeout_secs: default_worker_timeout(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            crossref_requests_per_second: default_crossref_per_second(),
            semantic_scholar_requests_per_minute: default_s2_per_minute(),
            perplexity_requests_per_minute: default_perplexity_per_minute(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window(),
            cooldown_secs: default_cooldown(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            memory_capacity: default_cache_capacity(),
            duration_hours: default_cache_duration_hours(),
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoverySettings::default(),
            rate_limit: RateLimitSettings::default(),
            cache: CacheSettings::default(),
            sources: SourceSettings::default(),
            tasks: TaskSettings::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RATE_LIMIT__CROSSREF_REQUESTS_PER_SECOND=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Per-request transport timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.request_timeout_secs)
    }

    /// Per-worker deadline ceiling
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.worker_timeout_secs)
    }

    /// Overall run deadline
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.run_timeout_secs)
    }

    /// Cache TTL for both tiers
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.duration_hours * 3600)
    }
}
