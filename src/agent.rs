//! Agent runtime: wires the coordination pieces together for one agent
//! identity and drives them on independent schedules. There is no shared
//! in-memory state across agents; the replicated stage hierarchy is the
//! only shared resource.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{info, warn};

use crate::aggregate::StatusAggregator;
use crate::approval::{ApprovalGateway, Decision};
use crate::audit::AuditLogger;
use crate::claim::ClaimCoordinator;
use crate::config::TandemConfig;
use crate::detect::Ingestor;
use crate::error::Result;
use crate::exec::ExecutorRegistry;
use crate::record::{AgentId, Domain};
use crate::schedule::{Clock, Scheduler};
use crate::stage::{Stage, TaskStore};
use crate::sync::Reconciler;
use crate::triage::{Triage, Verdict};

pub struct AgentRuntime {
    agent: AgentId,
    config: TandemConfig,
    store: Arc<TaskStore>,
    clock: Arc<dyn Clock>,
    claim: Arc<ClaimCoordinator>,
    gateway: Arc<ApprovalGateway>,
    triage: Arc<Triage>,
    ingestor: Arc<Ingestor>,
    executors: Arc<ExecutorRegistry>,
    reconciler: Arc<Reconciler>,
    aggregator: Arc<StatusAggregator>,
}

impl AgentRuntime {
    pub fn new(
        config: TandemConfig,
        store: Arc<TaskStore>,
        clock: Arc<dyn Clock>,
        triage: Triage,
        ingestor: Ingestor,
        executors: ExecutorRegistry,
    ) -> Self {
        let agent = config.agent;
        let audit = Arc::new(AuditLogger::new(store.root()));
        let claim = Arc::new(ClaimCoordinator::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            agent,
        ));
        let gateway = Arc::new(ApprovalGateway::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            audit,
            clock.clone(),
            agent,
            config.sync.remote.clone(),
        ));
        let aggregator = Arc::new(StatusAggregator::new(store.root(), agent));

        Self {
            agent,
            config,
            store,
            clock,
            claim,
            gateway,
            triage: Arc::new(triage),
            ingestor: Arc::new(ingestor),
            executors: Arc::new(executors),
            reconciler,
            aggregator,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<ApprovalGateway> {
        &self.gateway
    }

    /// Startup: rescan the hierarchy and requeue anything a previous run
    /// of this agent left parked in its `In_Progress` partition.
    pub fn startup(&self) -> Result<()> {
        self.store.rescan()?;
        let requeued = self.claim.recover()?;
        info!(agent = %self.agent, requeued, "Agent runtime started");
        Ok(())
    }

    /// One claim-and-evaluate pass over every domain: poll detectors,
    /// claim whatever is actionable, run triage, and route each record to
    /// the gateway or straight to a terminal stage.
    pub async fn poll_cycle(&self) -> Result<usize> {
        self.ingestor.poll_all().await?;

        let mut handled = 0;
        for domain in Domain::ALL {
            for record in self.store.scan(Stage::NeedsAction(domain))? {
                if !self.claim.claim(&record.id, domain)? {
                    // Someone else owns it; not an error.
                    continue;
                }
                self.evaluate_claimed(&record.id, domain).await?;
                handled += 1;
            }
        }
        Ok(handled)
    }

    async fn evaluate_claimed(&self, id: &str, domain: Domain) -> Result<()> {
        let record = self.store.load(id)?;
        let assessment = self.triage.evaluate(&record).await;

        match assessment.verdict {
            Verdict::NeedsHuman => {
                self.gateway.submit(
                    id,
                    Duration::hours(self.config.approval.expiry_hours),
                    &assessment.rationale,
                )?;
            }
            Verdict::AutoApprove => {
                let now = self.clock.now();
                self.store.update(id, |r| {
                    r.trace("triage", format!("auto-approved: {}", assessment.rationale), now);
                })?;
                self.claim.release(id, domain, Stage::Approved)?;
            }
            Verdict::AutoReject => {
                let now = self.clock.now();
                self.store.update(id, |r| {
                    r.trace("triage", format!("decided:auto-rejected: {}", assessment.rationale), now);
                })?;
                self.claim.release(id, domain, Stage::Rejected)?;
            }
        }
        Ok(())
    }

    /// Human decision entry point; idempotent across replicated copies.
    pub fn decide(&self, id: &str, outcome: Decision) -> Result<bool> {
        self.gateway.decide(id, outcome, "human")
    }

    /// Run all periodic loops until the scheduler is dropped. Sweeps,
    /// execution, reconciliation, and (for the executive agent) status
    /// folding each run on their own interval.
    pub fn spawn_loops(self: &Arc<Self>) -> Scheduler {
        let mut scheduler = Scheduler::new();
        let intervals = &self.config.intervals;

        let runtime = self.clone();
        scheduler.every("poll", StdDuration::from_secs(intervals.poll_secs), move || {
            let runtime = runtime.clone();
            async move { runtime.poll_cycle().await.map(|_| ()) }
        });

        let runtime = self.clone();
        scheduler.every("sweep", StdDuration::from_secs(intervals.sweep_secs), move || {
            let runtime = runtime.clone();
            async move { runtime.gateway.sweep().map(|_| ()) }
        });

        let runtime = self.clone();
        scheduler.every(
            "execute",
            StdDuration::from_secs(intervals.execute_secs),
            move || {
                let runtime = runtime.clone();
                async move { runtime.executors.run_approved().await.map(|_| ()) }
            },
        );

        if self.config.sync.enabled {
            let runtime = self.clone();
            scheduler.every(
                "reconcile",
                StdDuration::from_secs(intervals.reconcile_secs),
                move || {
                    let runtime = runtime.clone();
                    async move { runtime.reconciler.reconcile().await }
                },
            );
        }

        if self.agent == AgentId::Local {
            let runtime = self.clone();
            scheduler.every("fold", StdDuration::from_secs(intervals.fold_secs), move || {
                let runtime = runtime.clone();
                async move {
                    match runtime.aggregator.fold(runtime.clock.as_ref()) {
                        Ok(_) => Ok(()),
                        Err(e) => {
                            warn!(error = %e, "Status fold failed");
                            Ok(())
                        }
                    }
                }
            });
        }

        scheduler
    }

    pub async fn reconcile_once(&self) -> Result<()> {
        self.reconciler.reconcile().await
    }

    pub fn sweep_once(&self) -> Result<usize> {
        self.gateway.sweep()
    }
}
