//! Claim coordination: an agent takes exclusive responsibility for a
//! record by relocating it into its own `In_Progress` partition. The claim
//! *is* the move; a missing source means another actor owns the record.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLogger};
use crate::error::{Result, TandemError};
use crate::record::{AgentId, Domain};
use crate::schedule::Clock;
use crate::stage::{Stage, TaskStore};

pub struct ClaimCoordinator {
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    agent: AgentId,
}

impl ClaimCoordinator {
    pub fn new(
        store: Arc<TaskStore>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        agent: AgentId,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            agent,
        }
    }

    /// Attempt to claim a record out of `Needs_Action/<domain>`. Returns
    /// `true` only when the atomic move succeeded. A conflict (source
    /// already gone) is the normal "someone else owns this" signal and
    /// returns `false`; the caller skips the record.
    pub fn claim(&self, id: &str, domain: Domain) -> Result<bool> {
        let from = Stage::NeedsAction(domain);
        let to = Stage::InProgress(self.agent, domain);

        match self.store.transition(id, from, to) {
            Ok(()) => {
                let now = self.clock.now();
                self.store
                    .update(id, |record| record.trace(self.agent.as_str(), "claimed", now))?;
                self.audit.append(&AuditEntry::new(
                    id,
                    from.to_string(),
                    to.to_string(),
                    self.agent.as_str(),
                    now,
                    "claimed",
                ))?;
                Ok(true)
            }
            Err(TandemError::StageConflict { .. }) => {
                debug!(id, agent = %self.agent, "Claim lost, record already owned");
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Move a claimed record out of this agent's `In_Progress` partition.
    pub fn release(&self, id: &str, domain: Domain, destination: Stage) -> Result<()> {
        let from = Stage::InProgress(self.agent, domain);
        self.store.transition(id, from, destination)?;

        let now = self.clock.now();
        let action = format!("released to {}", destination);
        self.store
            .update(id, |record| record.trace(self.agent.as_str(), &action, now))?;
        self.audit.append(&AuditEntry::new(
            id,
            from.to_string(),
            destination.to_string(),
            self.agent.as_str(),
            now,
            "released",
        ))?;
        Ok(())
    }

    /// Liveness sweep on restart: requeue every record parked in this
    /// agent's own `In_Progress` partition so a crash mid-claim cannot
    /// strand work. Requeued records are picked up again on the next poll.
    pub fn recover(&self) -> Result<usize> {
        let mut requeued = 0;
        for domain in Domain::ALL {
            let parked = Stage::InProgress(self.agent, domain);
            for record in self.store.scan(parked)? {
                match self.store.transition(&record.id, parked, Stage::NeedsAction(domain)) {
                    Ok(()) => {
                        let now = self.clock.now();
                        self.store.update(&record.id, |r| {
                            r.trace(self.agent.as_str(), "requeued after restart", now)
                        })?;
                        self.audit.append(&AuditEntry::new(
                            &record.id,
                            parked.to_string(),
                            Stage::NeedsAction(domain).to_string(),
                            self.agent.as_str(),
                            now,
                            "liveness recovery",
                        ))?;
                        requeued += 1;
                    }
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "Liveness requeue failed");
                    }
                }
            }
        }
        if requeued > 0 {
            info!(agent = %self.agent, requeued, "Recovered parked records");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{TaskKind, TaskRecord};
    use crate::schedule::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn setup(agent: AgentId) -> (TempDir, Arc<TaskStore>, ClaimCoordinator) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::init(dir.path()).unwrap());
        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let coordinator = ClaimCoordinator::new(store.clone(), audit, clock, agent);
        (dir, store, coordinator)
    }

    fn seed(store: &TaskStore, domain: Domain) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        let record = TaskRecord::new(TaskKind::Message, domain, "alice", at);
        store.create(&record).unwrap();
        record
    }

    #[test]
    fn test_claim_succeeds_once() {
        let (_dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Business);

        assert!(cloud.claim(&record.id, Domain::Business).unwrap());
        assert_eq!(
            store.stage_of(&record.id),
            Some(Stage::InProgress(AgentId::Cloud, Domain::Business))
        );
    }

    #[test]
    fn test_second_claim_returns_false() {
        let (dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Business);
        assert!(cloud.claim(&record.id, Domain::Business).unwrap());

        // Second agent over the same hierarchy.
        let store_b = Arc::new(TaskStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let local = ClaimCoordinator::new(store_b, audit, clock, AgentId::Local);

        assert!(!local.claim(&record.id, Domain::Business).unwrap());
    }

    #[test]
    fn test_claim_appends_trace() {
        let (_dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Personal);
        cloud.claim(&record.id, Domain::Personal).unwrap();

        let loaded = store.load(&record.id).unwrap();
        assert_eq!(loaded.decision_trace.len(), 1);
        assert_eq!(loaded.decision_trace[0].actor, "cloud");
        assert_eq!(loaded.decision_trace[0].action, "claimed");
    }

    #[test]
    fn test_release_moves_to_destination() {
        let (_dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Personal);
        cloud.claim(&record.id, Domain::Personal).unwrap();

        cloud
            .release(&record.id, Domain::Personal, Stage::PendingApproval)
            .unwrap();
        assert_eq!(store.stage_of(&record.id), Some(Stage::PendingApproval));
    }

    #[test]
    fn test_recover_requeues_parked_records() {
        let (dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Shared);
        cloud.claim(&record.id, Domain::Shared).unwrap();

        // Simulate a crash and restart: a fresh coordinator over the same
        // tree finds its own parked record and requeues it.
        let store_b = Arc::new(TaskStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let restarted = ClaimCoordinator::new(store_b.clone(), audit, clock, AgentId::Cloud);

        assert_eq!(restarted.recover().unwrap(), 1);
        assert_eq!(
            store_b.stage_of(&record.id),
            Some(Stage::NeedsAction(Domain::Shared))
        );
    }

    #[test]
    fn test_recover_ignores_other_agents_partition() {
        let (dir, store, cloud) = setup(AgentId::Cloud);
        let record = seed(&store, Domain::Business);
        cloud.claim(&record.id, Domain::Business).unwrap();

        let store_b = Arc::new(TaskStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditLogger::new(dir.path()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let local = ClaimCoordinator::new(store_b.clone(), audit, clock, AgentId::Local);

        assert_eq!(local.recover().unwrap(), 0);
        assert_eq!(
            store_b.stage_of(&record.id),
            Some(Stage::InProgress(AgentId::Cloud, Domain::Business))
        );
    }
}
