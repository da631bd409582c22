//! PaperScout source layer
//!
//! External bibliographic API access for the discovery core:
//! - Per-source rate limiting and circuit breaking
//! - Permit-gated HTTP plumbing with bounded transient retry
//! - One worker per source (Crossref, Semantic Scholar, Perplexity)
//! - Credential lookup kept out of the rate limiter

pub mod credentials;
pub mod crossref;
pub mod http;
pub mod limiter;
pub mod perplexity;
pub mod semantic_scholar;
pub mod worker;

pub use credentials::{Credentials, StaticCredentials};
pub use crossref::CrossrefWorker;
pub use limiter::{CircuitState, LimiterConfig, Permit, RateLimitManager, RateLimiterSnapshot};
pub use perplexity::PerplexityWorker;
pub use semantic_scholar::SemanticScholarWorker;
pub use worker::SourceWorker;
