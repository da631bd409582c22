//! In-process task metrics with a read-only snapshot

use crate::model::TaskStatus;
use paperscout_common::errors::ErrorCode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters and timers for the task substrate
#[derive(Default)]
pub struct TaskMetrics {
    created: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    total_queued_ms: AtomicU64,
    total_run_ms: AtomicU64,
    failures_by_kind: Mutex<HashMap<ErrorCode, u64>>,
}

/// Read-only metrics view
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetricsSnapshot {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub total_queued_ms: u64,
    pub total_run_ms: u64,
    pub failures_by_kind: HashMap<ErrorCode, u64>,
}

impl TaskMetrics {
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminal(
        &self,
        status: TaskStatus,
        failure_kind: Option<ErrorCode>,
        queued_ms: u64,
        run_ms: u64,
    ) {
        match status {
            TaskStatus::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            TaskStatus::TimedOut => self.timed_out.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Pending | TaskStatus::Processing => 0,
        };
        self.total_queued_ms.fetch_add(queued_ms, Ordering::Relaxed);
        self.total_run_ms.fetch_add(run_ms, Ordering::Relaxed);
        if let Some(kind) = failure_kind {
            let mut by_kind = self.failures_by_kind.lock().expect("metrics lock poisoned");
            *by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> TaskMetricsSnapshot {
        TaskMetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_queued_ms: self.total_queued_ms.load(Ordering::Relaxed),
            total_run_ms: self.total_run_ms.load(Ordering::Relaxed),
            failures_by_kind: self
                .failures_by_kind
                .lock()
                .expect("metrics lock poisoned")
                .clone(),
        }
    }
}
