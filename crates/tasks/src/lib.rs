//! PaperScout agent task substrate
//!
//! Durable single-table model for asynchronous units of work:
//! - Create / run / cancel lifecycle with exactly-once transitions
//! - Retry of transient failures with exponential backoff
//! - Cost hook (charge before first attempt, record on success)
//! - Metrics and opportunistic purge of old terminal tasks

pub mod metrics;
pub mod model;
pub mod retry;
pub mod runner;
pub mod store;

pub use metrics::{TaskMetrics, TaskMetricsSnapshot};
pub use model::{AgentTask, TaskError, TaskStatus};
pub use retry::RetryPolicy;
pub use runner::TaskRunner;
pub use store::TaskStore;
