//! Replication scenarios: two workspaces sharing one bare remote, each
//! agent on its own branch, converging through record-level resolution.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use tandem::aggregate::{StatusAggregator, STATUS_DOC, UPDATES_DIR};
use tandem::approval::ApprovalGateway;
use tandem::audit::AuditLogger;
use tandem::claim::ClaimCoordinator;
use tandem::record::{AgentId, Domain, TaskKind, TaskRecord};
use tandem::schedule::ManualClock;
use tandem::stage::{Stage, TaskStore};
use tandem::sync::{write_ignore_rules, GitRunner, Reconciler};

struct Workspace {
    _dir: TempDir,
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<ManualClock>,
    agent: AgentId,
    reconciler: Reconciler,
}

impl Workspace {
    async fn new(agent: AgentId, remote: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::init(dir.path()).unwrap());
        write_ignore_rules(dir.path()).unwrap();

        let git = GitRunner::new(dir.path());
        git.init_repo().await.unwrap();
        git.run_checked(&["config", "user.email", "agent@test"])
            .await
            .unwrap();
        git.run_checked(&["config", "user.name", agent.as_str()])
            .await
            .unwrap();
        git.run_checked(&["remote", "add", "origin", remote])
            .await
            .unwrap();

        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            agent,
            "origin",
        );
        Self {
            _dir: dir,
            store,
            audit,
            clock,
            agent,
            reconciler,
        }
    }

    fn coordinator(&self) -> ClaimCoordinator {
        ClaimCoordinator::new(
            self.store.clone(),
            self.audit.clone(),
            self.clock.clone(),
            self.agent,
        )
    }

    fn gateway(&self) -> ApprovalGateway {
        ApprovalGateway::new(self.store.clone(), self.audit.clone(), self.clock.clone())
    }

    fn seed(&self, source: &str) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        let record = TaskRecord::new(TaskKind::Message, Domain::Business, source, at);
        assert!(self.store.create(&record).unwrap());
        record
    }
}

async fn bare_remote() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let git = GitRunner::new(dir.path());
    git.run_checked(&["init", "--bare", "--quiet"]).await.unwrap();
    let path = dir.path().to_string_lossy().to_string();
    (dir, path)
}

/// A record created on one side shows up on the other after each side
/// runs one reconciliation pass.
#[tokio::test]
async fn record_is_adopted_by_the_counterpart() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;
    let local = Workspace::new(AgentId::Local, &remote).await;

    let record = cloud.seed("alice");
    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    assert_eq!(
        local.store.stage_of(&record.id),
        Some(Stage::NeedsAction(Domain::Business))
    );
    let adopted = local.store.load(&record.id).unwrap();
    assert_eq!(adopted.source, "alice");
}

/// Scenario 3: the agents diverge on one record (one side already
/// escalated it, the other still holds a stale claim). The more terminal
/// stage wins on both sides.
#[tokio::test]
async fn more_terminal_stage_wins_divergence() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;
    let local = Workspace::new(AgentId::Local, &remote).await;

    let record = cloud.seed("bob");
    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    // Partition: both sides act independently on their own copies.
    local.coordinator().claim(&record.id, Domain::Business).unwrap();
    local
        .gateway()
        .submit(&record.id, Duration::hours(4), "needs a human")
        .unwrap();
    cloud.coordinator().claim(&record.id, Domain::Business).unwrap();

    // Partition heals.
    local.reconciler.reconcile().await.unwrap();
    cloud.reconciler.reconcile().await.unwrap();

    assert_eq!(cloud.store.stage_of(&record.id), Some(Stage::PendingApproval));

    local.reconciler.reconcile().await.unwrap();
    assert_eq!(local.store.stage_of(&record.id), Some(Stage::PendingApproval));

    // The losing side records the divergence resolution.
    let entries = cloud.audit.read_day("2025-06-01").unwrap();
    assert!(entries
        .iter()
        .any(|e| e.record_id == record.id && e.reason == "sync divergence resolved"));
}

/// Both agents claimed the same record during a partition. The tiebreak is
/// deterministic: the cloud copy survives on both sides.
#[tokio::test]
async fn double_claim_resolves_to_cloud() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;
    let local = Workspace::new(AgentId::Local, &remote).await;

    let record = cloud.seed("carol");
    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    cloud.coordinator().claim(&record.id, Domain::Business).unwrap();
    local.coordinator().claim(&record.id, Domain::Business).unwrap();

    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    assert_eq!(
        local.store.stage_of(&record.id),
        Some(Stage::InProgress(AgentId::Cloud, Domain::Business))
    );

    cloud.reconciler.reconcile().await.unwrap();
    assert_eq!(
        cloud.store.stage_of(&record.id),
        Some(Stage::InProgress(AgentId::Cloud, Domain::Business))
    );
}

/// A failed fetch (no counterpart branch yet) is a delayed sync, not an
/// error: the pass still publishes our own snapshot.
#[tokio::test]
async fn missing_counterpart_branch_is_not_an_error() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;

    cloud.seed("dave");
    cloud.reconciler.reconcile().await.unwrap();

    // The snapshot made it to the remote even though there was nothing to
    // fold back.
    let git = GitRunner::new(cloud.store.root());
    assert!(git.rev_exists("origin/agent/cloud").await);
}

/// Audit history written on one side becomes readable on the other after
/// a round trip, and repeated passes do not duplicate entries.
#[tokio::test]
async fn counterpart_audit_history_is_merged() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;
    let local = Workspace::new(AgentId::Local, &remote).await;

    let record = cloud.seed("erin");
    cloud.coordinator().claim(&record.id, Domain::Business).unwrap();

    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    // The claim the cloud agent logged is now part of the local history.
    let entries = local.audit.read_day("2025-06-01").unwrap();
    assert!(entries
        .iter()
        .any(|e| e.record_id == record.id && e.actor == "cloud" && e.reason == "claimed"));

    // Further passes merge nothing new.
    let before = entries.len();
    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();
    assert_eq!(local.audit.read_day("2025-06-01").unwrap().len(), before);
}

/// Deltas travel to the executive agent, get folded exactly once, and do
/// not resurrect after further reconciliation passes.
#[tokio::test]
async fn folded_delta_is_not_resurrected() {
    let (_remote_dir, remote) = bare_remote().await;
    let cloud = Workspace::new(AgentId::Cloud, &remote).await;
    let local = Workspace::new(AgentId::Local, &remote).await;

    let cloud_agg = StatusAggregator::new(cloud.store.root(), AgentId::Cloud);
    let delta = cloud_agg
        .write_delta(cloud.clock.as_ref(), "inbox: 2 new messages")
        .unwrap();

    cloud.reconciler.reconcile().await.unwrap();
    local.reconciler.reconcile().await.unwrap();

    // The delta arrived and the executive agent folds it.
    let local_agg = StatusAggregator::new(local.store.root(), AgentId::Local);
    assert_eq!(local_agg.fold(local.clock.as_ref()).unwrap(), 1);
    assert!(local_agg.is_consumed(&delta.id));

    // Cloud still carries the inbox copy; after it sees the folded status
    // document, the copy is pruned instead of round-tripping forever.
    local.reconciler.reconcile().await.unwrap();
    cloud.reconciler.reconcile().await.unwrap();

    let status = std::fs::read_to_string(cloud.store.root().join(STATUS_DOC)).unwrap();
    assert!(status.contains(&delta.id));
    let inbox = cloud.store.root().join(UPDATES_DIR);
    let leftover = std::fs::read_dir(&inbox)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);

    // Another full round does not fold it twice.
    local.reconciler.reconcile().await.unwrap();
    assert_eq!(local_agg.fold(local.clock.as_ref()).unwrap(), 0);
    let status = std::fs::read_to_string(local.store.root().join(STATUS_DOC)).unwrap();
    assert_eq!(status.matches(&delta.id).count(), 1);
}
