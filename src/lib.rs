pub mod agent;
pub mod aggregate;
pub mod approval;
pub mod audit;
pub mod claim;
pub mod classify;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod exec;
pub mod record;
pub mod retry;
pub mod schedule;
pub mod stage;
pub mod sync;
pub mod triage;

pub use agent::AgentRuntime;
pub use aggregate::{DeltaRecord, StatusAggregator};
pub use approval::{ApprovalGateway, Decision};
pub use audit::{AuditEntry, AuditLogger};
pub use claim::ClaimCoordinator;
pub use classify::DomainClassifier;
pub use config::TandemConfig;
pub use detect::{Detector, Ingestor, RecordDraft};
pub use error::{OpError, Result, TandemError};
pub use exec::{Executor, ExecutorRegistry};
pub use record::{AgentId, Domain, TaskKind, TaskRecord};
pub use retry::{with_retry, RetryConfig};
pub use schedule::{Clock, ManualClock, Scheduler, SystemClock};
pub use stage::{Stage, TaskStore};
pub use sync::{resolve, GitRunner, Reconciler};
pub use triage::{Assessment, Triage, TriagePolicy, Verdict};
