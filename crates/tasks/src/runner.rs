//! Task runner: claim, charge, execute, retry, finish
//!
//! The runner owns the only PENDING -> PROCESSING path. Concurrent `run`
//! calls on one task serialize on the claim lock so exactly one caller
//! observes the transition; later callers get the existing record back.
//! The task body is a closure passed in by the caller - the substrate
//! never imports the components it executes.

use crate::metrics::{TaskMetrics, TaskMetricsSnapshot};
use crate::model::{AgentTask, TaskError, TaskStatus};
use crate::retry::RetryPolicy;
use crate::store::TaskStore;
use chrono::Utc;
use paperscout_common::credits::{ChargeOutcome, CreditService};
use paperscout_common::errors::{AppError, ErrorCode, Result};
use paperscout_common::kv::KvStore;
use paperscout_common::metrics::{record_task, record_task_retry};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Durable task substrate
pub struct TaskRunner {
    store: TaskStore,
    credits: Arc<dyn CreditService>,
    default_policy: RetryPolicy,
    agent_policies: HashMap<String, RetryPolicy>,
    claim_lock: tokio::sync::Mutex<()>,
    cancel_tokens: Mutex<HashMap<uuid::Uuid, CancellationToken>>,
    metrics: TaskMetrics,
}

impl TaskRunner {
    pub fn new(kv: Arc<dyn KvStore>, credits: Arc<dyn CreditService>, policy: RetryPolicy) -> Self {
        Self {
            store: TaskStore::new(kv),
            credits,
            default_policy: policy,
            agent_policies: HashMap::new(),
            claim_lock: tokio::sync::Mutex::new(()),
            cancel_tokens: Mutex::new(HashMap::new()),
            metrics: TaskMetrics::default(),
        }
    }

    /// Override the retry policy for one agent id
    pub fn with_agent_policy(mut self, agent_id: &str, policy: RetryPolicy) -> Self {
        self.agent_policies.insert(agent_id.to_string(), policy);
        self
    }

    fn policy_for(&self, agent_id: &str) -> &RetryPolicy {
        self.agent_policies
            .get(agent_id)
            .unwrap_or(&self.default_policy)
    }

    /// Create a new PENDING task and return its id
    pub async fn create(
        &self,
        agent_id: &str,
        user_id: uuid::Uuid,
        input: serde_json::Value,
    ) -> Result<uuid::Uuid> {
        let task = AgentTask::new(agent_id, user_id, input);
        self.store.insert(&task).await?;
        self.metrics.record_created();
        info!(task_id = %task.task_id, agent_id, "task created");
        Ok(task.task_id)
    }

    /// Execute a PENDING task.
    ///
    /// Charges the cost hook before the first attempt, runs `body` under a
    /// per-task timeout, retries transient failures with exponential
    /// backoff, and settles the task in exactly one terminal state.
    /// Idempotent by task id: an already-started task is returned as-is.
    pub async fn run<F, Fut>(
        &self,
        task_id: uuid::Uuid,
        operation: &str,
        cost_units: u32,
        timeout: Duration,
        body: F,
    ) -> Result<AgentTask>
    where
        F: Fn(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<serde_json::Value>> + Send,
    {
        // Claim: the single PENDING -> PROCESSING path
        let (mut task, cancel) = {
            let _guard = self.claim_lock.lock().await;
            let mut task = self
                .store
                .load(task_id)
                .await?
                .ok_or_else(|| AppError::TaskNotFound {
                    id: task_id.to_string(),
                })?;
            if task.status != TaskStatus::Pending {
                return Ok(task);
            }
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now());
            self.store.save(&task, TaskStatus::Pending).await?;

            let cancel = CancellationToken::new();
            self.cancel_tokens
                .lock()
                .expect("cancel map lock poisoned")
                .insert(task_id, cancel.clone());
            (task, cancel)
        };

        // Cost hook gates the first attempt
        match self.credits.charge(operation, task.user_id).await {
            Ok(ChargeOutcome::Ok) => {}
            Ok(ChargeOutcome::Insufficient) => {
                warn!(task_id = %task_id, operation, "charge refused");
                return self
                    .finish(
                        task,
                        TaskStatus::Failed,
                        None,
                        Some(TaskError {
                            kind: ErrorCode::InsufficientCredits,
                            message: format!("insufficient credits for '{}'", operation),
                        }),
                    )
                    .await;
            }
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "charge hook failed");
                return self
                    .finish(
                        task,
                        TaskStatus::Failed,
                        None,
                        Some(TaskError {
                            kind: err.code(),
                            message: err.to_string(),
                        }),
                    )
                    .await;
            }
        }

        loop {
            if cancel.is_cancelled() {
                return self.finish(task, TaskStatus::Cancelled, None, None).await;
            }

            task.attempts += 1;
            let attempt_result = tokio::time::timeout(timeout, body(cancel.clone())).await;

            match attempt_result {
                Ok(Ok(value)) => {
                    if let Err(err) = self
                        .credits
                        .record(operation, task.user_id, cost_units, task_id)
                        .await
                    {
                        warn!(task_id = %task_id, error = %err, "cost record failed");
                    }
                    return self
                        .finish(task, TaskStatus::Completed, Some(value), None)
                        .await;
                }
                Ok(Err(AppError::Cancelled)) => {
                    return self.finish(task, TaskStatus::Cancelled, None, None).await;
                }
                Ok(Err(err)) => {
                    let policy = self.policy_for(&task.agent_id);
                    let retry = err.is_transient() && task.attempts < policy.max_attempts;
                    if !retry {
                        warn!(task_id = %task_id, attempts = task.attempts, error = %err, "task failed");
                        return self
                            .finish(
                                task,
                                TaskStatus::Failed,
                                None,
                                Some(TaskError {
                                    kind: err.code(),
                                    message: err.to_string(),
                                }),
                            )
                            .await;
                    }

                    let delay = policy.delay(task.attempts);
                    warn!(
                        task_id = %task_id,
                        attempt = task.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    self.metrics.record_retry();
                    record_task_retry(&task.agent_id);

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.finish(task, TaskStatus::Cancelled, None, None).await;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(_elapsed) => {
                    warn!(task_id = %task_id, timeout_ms = timeout.as_millis() as u64, "task timed out");
                    cancel.cancel();
                    return self
                        .finish(
                            task,
                            TaskStatus::TimedOut,
                            None,
                            Some(TaskError {
                                kind: ErrorCode::Timeout,
                                message: format!("task exceeded {:?}", timeout),
                            }),
                        )
                        .await;
                }
            }
        }
    }

    /// Cancel a task. PENDING tasks settle immediately; PROCESSING tasks
    /// are signalled and settle when the runner observes the signal.
    pub async fn cancel(&self, task_id: uuid::Uuid) -> Result<TaskStatus> {
        let _guard = self.claim_lock.lock().await;
        let task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        match task.status {
            TaskStatus::Pending => {
                let task = self
                    .finish_inner(task, TaskStatus::Cancelled, None, None)
                    .await?;
                Ok(task.status)
            }
            TaskStatus::Processing => {
                if let Some(token) = self
                    .cancel_tokens
                    .lock()
                    .expect("cancel map lock poisoned")
                    .get(&task_id)
                {
                    token.cancel();
                }
                Ok(TaskStatus::Processing)
            }
            terminal => Ok(terminal),
        }
    }

    pub async fn status(&self, task_id: uuid::Uuid) -> Result<TaskStatus> {
        Ok(self.get(task_id).await?.status)
    }

    pub async fn get(&self, task_id: uuid::Uuid) -> Result<AgentTask> {
        self.store
            .load(task_id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    /// Block until the task settles, polling the durable record
    pub async fn await_terminal(&self, task_id: uuid::Uuid) -> Result<AgentTask> {
        loop {
            let task = self.get(task_id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Recovery scan by `(agent_id, status)`
    pub async fn scan_by_status(
        &self,
        agent_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<AgentTask>> {
        self.store.scan_by_status(agent_id, status).await
    }

    /// Opportunistic cleanup of terminal tasks older than `age`
    pub async fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(7));
        let old = self.store.scan_terminal_older_than(cutoff).await?;
        let mut purged = 0;
        for task in &old {
            self.store.remove(task).await?;
            purged += 1;
        }
        if purged > 0 {
            info!(purged, "purged terminal tasks");
        }
        Ok(purged)
    }

    pub fn metrics(&self) -> TaskMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn finish(
        &self,
        task: AgentTask,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<TaskError>,
    ) -> Result<AgentTask> {
        self.cancel_tokens
            .lock()
            .expect("cancel map lock poisoned")
            .remove(&task.task_id);
        self.finish_inner(task, status, result, error).await
    }

    async fn finish_inner(
        &self,
        mut task: AgentTask,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<TaskError>,
    ) -> Result<AgentTask> {
        let previous = task.status;
        task.status = status;
        task.result = result;
        task.finished_at = Some(Utc::now());
        let failure_kind = error.as_ref().map(|e| e.kind);
        task.error = error;
        self.store.save(&task, previous).await?;

        let queued_ms = task.queued_ms().unwrap_or(0);
        let run_ms = task.run_ms().unwrap_or(0);
        self.metrics
            .record_terminal(status, failure_kind, queued_ms, run_ms);
        record_task(status.as_str(), run_ms as f64 / 1_000.0);
        info!(task_id = %task.task_id, status = status.as_str(), attempts = task.attempts, "task settled");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::kv::MemoryKv;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockCredits {
        outcome: ChargeOutcome,
        charges: AtomicU32,
        records: AtomicU32,
    }

    impl MockCredits {
        fn ok() -> Self {
            Self {
                outcome: ChargeOutcome::Ok,
                charges: AtomicU32::new(0),
                records: AtomicU32::new(0),
            }
        }

        fn insufficient() -> Self {
            Self {
                outcome: ChargeOutcome::Insufficient,
                ..Self::ok()
            }
        }
    }

    #[async_trait::async_trait]
    impl CreditService for MockCredits {
        async fn charge(&self, _operation: &str, _user_id: uuid::Uuid) -> Result<ChargeOutcome> {
            self.charges.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome)
        }

        async fn record(
            &self,
            _operation: &str,
            _user_id: uuid::Uuid,
            _cost_units: u32,
            _task_id: uuid::Uuid,
        ) -> Result<()> {
            self.records.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runner_with(credits: Arc<MockCredits>) -> TaskRunner {
        TaskRunner::new(
            Arc::new(MemoryKv::new()),
            credits,
            RetryPolicy {
                jitter: 0.0,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits.clone());

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(runner.status(task_id).await.unwrap(), TaskStatus::Pending);

        let task = runner
            .run(task_id, "op", 2, Duration::from_secs(5), |_cancel| async {
                Ok(serde_json::json!({"answer": 42}))
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"answer": 42})));
        assert_eq!(task.attempts, 1);
        assert_eq!(credits.charges.load(Ordering::SeqCst), 1);
        assert_eq!(credits.records.load(Ordering::SeqCst), 1);

        let snapshot = runner.metrics();
        assert_eq!(snapshot.completed, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits.clone());
        let invocations = Arc::new(AtomicU32::new(0));

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let body_calls = invocations.clone();
        runner
            .run(task_id, "op", 1, Duration::from_secs(5), move |_| {
                let calls = body_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!(null))
                }
            })
            .await
            .unwrap();

        let again = runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                panic!("body must not run twice")
            })
            .await
            .unwrap();

        assert_eq!(again.status, TaskStatus::Completed);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        // Only the first run charges
        assert_eq!(credits.charges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insufficient_credits_fails_without_invoking_body() {
        let credits = Arc::new(MockCredits::insufficient());
        let runner = runner_with(credits.clone());

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let task = runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                panic!("body must not run")
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_ref().unwrap().kind,
            ErrorCode::InsufficientCredits
        );
        assert_eq!(credits.charges.load(Ordering::SeqCst), 1);
        assert_eq!(credits.records.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits.clone());
        let attempts = Arc::new(AtomicU32::new(0));

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let counter = attempts.clone();
        let task = runner
            .run(task_id, "op", 1, Duration::from_secs(60), move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AppError::SourceTransport {
                            source: paperscout_common::models::DiscoverySource::Crossref,
                            message: "flaky".into(),
                        })
                    } else {
                        Ok(serde_json::json!("done"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 3);
        assert_eq!(runner.metrics().retries, 2);
    }

    #[tokio::test]
    async fn test_agent_specific_policy_limits_attempts() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits).with_agent_policy(
            "one-shot",
            RetryPolicy {
                max_attempts: 1,
                ..Default::default()
            },
        );

        let task_id = runner
            .create("one-shot", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let task = runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                Err(AppError::SourceTransport {
                    source: paperscout_common::models::DiscoverySource::Crossref,
                    message: "flaky".into(),
                })
            })
            .await
            .unwrap();

        // Transient, but this agent gets no retry budget
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 1);
        assert_eq!(runner.metrics().retries, 0);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_immediately() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits);

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let task = runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                Err(AppError::InvalidInput {
                    message: "bad".into(),
                })
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.error.as_ref().unwrap().kind, ErrorCode::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_timed_out() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits);

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let task = runner
            .run(task_id, "op", 1, Duration::from_millis(100), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(serde_json::json!(null))
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::TimedOut);
        assert_eq!(task.error.as_ref().unwrap().kind, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits.clone());

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(
            runner.cancel(task_id).await.unwrap(),
            TaskStatus::Cancelled
        );

        // A later run is a no-op on the terminal record
        let task = runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                panic!("cancelled task must not run")
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(credits.charges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_processing_task_cooperatively() {
        let credits = Arc::new(MockCredits::ok());
        let runner = Arc::new(runner_with(credits));

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();

        let run_handle = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .run(task_id, "op", 1, Duration::from_secs(30), |cancel| async move {
                        cancel.cancelled().await;
                        Err(AppError::Cancelled)
                    })
                    .await
            })
        };

        // Let the run claim the task, then signal cancellation
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            runner.cancel(task_id).await.unwrap(),
            TaskStatus::Processing
        );

        let task = run_handle.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(runner.metrics().cancelled, 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_terminal_tasks() {
        let credits = Arc::new(MockCredits::ok());
        let runner = runner_with(credits);

        let task_id = runner
            .create("agent-a", uuid::Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();
        runner
            .run(task_id, "op", 1, Duration::from_secs(5), |_| async {
                Ok(serde_json::json!(null))
            })
            .await
            .unwrap();

        // Fresh terminal task survives the purge
        assert_eq!(
            runner.purge_older_than(Duration::from_secs(7 * 86_400)).await.unwrap(),
            0
        );
        assert!(runner.get(task_id).await.is_ok());

        // Anything older than "now" is eligible
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            runner.purge_older_than(Duration::from_millis(1)).await.unwrap(),
            1
        );
        assert!(matches!(
            runner.get(task_id).await,
            Err(AppError::TaskNotFound { .. })
        ));
    }
}
