//! PaperScout Common Library
//!
//! Shared code for the related-paper discovery core including:
//! - Domain models (papers, configurations, results)
//! - Error types and handling
//! - Configuration management
//! - Durable key-value store abstraction
//! - Collaborator traits (paper store, credit service)
//! - Metrics and observability

pub mod config;
pub mod credits;
pub mod errors;
pub mod kv;
pub mod metrics;
pub mod models;
pub mod papers;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, ErrorCode, ErrorSummary, Result};
pub use kv::KvStore;
pub use models::{
    DiscoveredPaper, DiscoveryConfiguration, DiscoveryMode, DiscoverySource, RelationshipType,
    SourceDiscoveryResult, SourcePaper, SynthesisMetadata, UnifiedDiscoveryResult,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent identifier used for the discovery task type
pub const DISCOVERY_AGENT_ID: &str = "related-paper-discovery";
