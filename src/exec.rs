//! Executor dispatch: interchangeable integrations selected by record
//! kind, behind a common trait. The registry consumes approved records,
//! runs the matching executor under the retry wrapper, and moves the
//! record to `Done` with a result summary — or leaves it in place with an
//! error annotation for a human.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::audit::{AuditEntry, AuditLogger};
use crate::error::{OpError, Result, TandemError};
use crate::record::{TaskKind, TaskRecord};
use crate::retry::{with_retry, RetryConfig};
use crate::schedule::Clock;
use crate::stage::{Stage, TaskStore};

/// One external integration (message sender, poster, payment runner).
/// Returns a result summary on success; failures are classified by the
/// retry wrapper.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, record: &TaskRecord) -> std::result::Result<String, OpError>;
}

pub struct ExecutorRegistry {
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    actor: String,
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new(
        store: Arc<TaskStore>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            retry,
            actor: actor.into(),
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: TaskKind, executor: Arc<dyn Executor>) {
        self.executors.insert(kind, executor);
    }

    pub fn has_executor(&self, kind: TaskKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Consume every record in `Approved`. Returns the number of records
    /// moved to `Done`. Records whose executor fails permanently (or
    /// exhausts retries) stay in `Approved` with an error annotation.
    pub async fn run_approved(&self) -> Result<usize> {
        let mut completed = 0;

        for record in self.store.scan(Stage::Approved)? {
            let Some(executor) = self.executors.get(&record.kind) else {
                warn!(id = %record.id, kind = %record.kind, "No executor registered, skipping");
                continue;
            };

            let operation = format!("execute:{}", record.kind);
            let attempts = AtomicU32::new(0);
            let result = with_retry(&self.retry, &operation, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                executor.execute(&record)
            })
            .await;
            let attempts = attempts.load(Ordering::SeqCst);

            match result {
                Ok(summary) => {
                    self.complete(&record, &summary, attempts)?;
                    completed += 1;
                }
                Err(e) => {
                    self.annotate_failure(&record, &e, attempts)?;
                }
            }
        }

        Ok(completed)
    }

    fn complete(&self, record: &TaskRecord, summary: &str, attempts: u32) -> Result<()> {
        let now = self.clock.now();
        let done = Stage::Done(record.domain);

        self.store.update(&record.id, |r| {
            r.result_summary = Some(summary.to_string());
            r.error_annotation = None;
            r.trace(&self.actor, "executed", now);
        })?;
        self.audit.append(&AuditEntry::new(
            &record.id,
            Stage::Approved.to_string(),
            done.to_string(),
            &self.actor,
            now,
            format!("executed after {} attempt(s): {}", attempts, summary),
        ))?;
        self.store.transition(&record.id, Stage::Approved, done)?;

        info!(id = %record.id, kind = %record.kind, "Record executed");
        Ok(())
    }

    /// Permanent failure: the record stays where it is, annotated with
    /// full context. Never silently dropped.
    fn annotate_failure(&self, record: &TaskRecord, failure: &TandemError, attempts: u32) -> Result<()> {
        let now = self.clock.now();
        let message = failure.to_string();

        self.store.update(&record.id, |r| {
            r.error_annotation = Some(message.clone());
            r.trace(&self.actor, format!("execution failed: {}", message), now);
        })?;
        self.audit.append(&AuditEntry::new(
            &record.id,
            Stage::Approved.to_string(),
            Stage::Approved.to_string(),
            &self.actor,
            now,
            format!("execution failed after {} attempt(s): {}", attempts, message),
        ))?;

        error!(id = %record.id, error = %message, "Execution failed, awaiting human intervention");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AgentId, Domain};
    use crate::schedule::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct FlakySender {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl Executor for FlakySender {
        async fn execute(&self, _record: &TaskRecord) -> std::result::Result<String, OpError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_times {
                return Err(OpError::NetworkError("connection reset".to_string()));
            }
            Ok("message sent".to_string())
        }
    }

    struct RejectingSender;

    #[async_trait]
    impl Executor for RejectingSender {
        async fn execute(&self, _record: &TaskRecord) -> std::result::Result<String, OpError> {
            Err(OpError::AuthFailure("401 Unauthorized".to_string()))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_secs: 0,
            max_delay_secs: 0,
            jitter: false,
        }
    }

    fn approved_record(store: &TaskStore) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        let record = TaskRecord::new(TaskKind::Message, Domain::Business, "alice", at);
        store.create(&record).unwrap();
        let d = Domain::Business;
        store
            .transition(&record.id, Stage::NeedsAction(d), Stage::InProgress(AgentId::Local, d))
            .unwrap();
        store
            .transition(&record.id, Stage::InProgress(AgentId::Local, d), Stage::PendingApproval)
            .unwrap();
        store
            .transition(&record.id, Stage::PendingApproval, Stage::Approved)
            .unwrap();
        record
    }

    fn registry(dir: &TempDir) -> (Arc<TaskStore>, ExecutorRegistry) {
        let store = Arc::new(TaskStore::init(dir.path()).unwrap());
        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap(),
        ));
        let registry = ExecutorRegistry::new(store.clone(), audit, clock, fast_retry(), "local");
        (store, registry)
    }

    #[tokio::test]
    async fn test_transient_failures_retried_to_done() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = registry(&dir);
        let record = approved_record(&store);

        let sender = Arc::new(FlakySender {
            calls: AtomicU32::new(0),
            fail_times: 2,
        });
        registry.register(TaskKind::Message, sender.clone());

        assert_eq!(registry.run_approved().await.unwrap(), 1);
        assert_eq!(store.stage_of(&record.id), Some(Stage::Done(Domain::Business)));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);

        let done = store.load(&record.id).unwrap();
        assert_eq!(done.result_summary.as_deref(), Some("message sent"));
    }

    #[tokio::test]
    async fn test_permanent_failure_annotates_and_stays() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = registry(&dir);
        let record = approved_record(&store);
        registry.register(TaskKind::Message, Arc::new(RejectingSender));

        assert_eq!(registry.run_approved().await.unwrap(), 0);
        assert_eq!(store.stage_of(&record.id), Some(Stage::Approved));

        let loaded = store.load(&record.id).unwrap();
        let annotation = loaded.error_annotation.unwrap();
        assert!(annotation.contains("401"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (store, registry) = registry(&dir);
        let record = approved_record(&store);

        assert_eq!(registry.run_approved().await.unwrap(), 0);
        assert_eq!(store.stage_of(&record.id), Some(Stage::Approved));
        assert!(store.load(&record.id).unwrap().error_annotation.is_none());
    }

    #[tokio::test]
    async fn test_audit_shows_every_attempt_outcome() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = registry(&dir);
        let record = approved_record(&store);
        registry.register(
            TaskKind::Message,
            Arc::new(FlakySender {
                calls: AtomicU32::new(0),
                fail_times: 2,
            }),
        );
        registry.run_approved().await.unwrap();

        let audit = AuditLogger::new(dir.path());
        let entries = audit.read_day("2025-06-02").unwrap();
        assert!(entries
            .iter()
            .any(|e| e.record_id == record.id && e.reason.starts_with("executed")));
    }
}
