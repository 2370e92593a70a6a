use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{AuditEntry, AuditLogger};
use crate::error::{Result, TandemError};
use crate::record::TaskRecord;
use crate::schedule::Clock;
use crate::stage::{Stage, TaskStore};

use super::EXPIRED_REASON;

/// Outcome of a human (or automated-triage) decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    fn target_stage(&self) -> Stage {
        match self {
            Self::Approved => Stage::Approved,
            Self::Rejected => Stage::Rejected,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct ApprovalGateway {
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
}

impl ApprovalGateway {
    pub fn new(store: Arc<TaskStore>, audit: Arc<AuditLogger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Place a claimed record into `Pending_Approval` with a computed
    /// expiry. The record must currently sit in an `In_Progress`
    /// partition; the caller holds the claim.
    pub fn submit(&self, id: &str, expiry: Duration, rationale: &str) -> Result<()> {
        let from = self
            .store
            .stage_of(id)
            .ok_or_else(|| TandemError::RecordNotFound(id.to_string()))?;
        let Stage::InProgress(agent, _) = from else {
            return Err(TandemError::InvalidTransition {
                from: from.to_string(),
                to: Stage::PendingApproval.to_string(),
            });
        };

        let now = self.clock.now();
        let expires_at = now + expiry;
        self.store.update(id, |record| {
            record.expires_at = Some(expires_at);
            record.trace(
                agent.as_str(),
                format!("submitted for approval: {}", rationale),
                now,
            );
        })?;
        self.audit.append(&AuditEntry::new(
            id,
            from.to_string(),
            Stage::PendingApproval.to_string(),
            agent.as_str(),
            now,
            rationale,
        ))?;
        self.store.transition(id, from, Stage::PendingApproval)?;
        Ok(())
    }

    /// Record a decision. Idempotent: deciding a record that has already
    /// been decided (including a replicated copy decided by the other
    /// agent) is a no-op and returns `false`.
    ///
    /// Ordering: the decision is appended to the record's trace and the
    /// audit log before the physical move, so a crash between the two
    /// cannot lose it; a later call finds the trace and completes the
    /// move without logging twice.
    pub fn decide(&self, id: &str, outcome: Decision, actor: &str) -> Result<bool> {
        let stage = self
            .store
            .stage_of(id)
            .ok_or_else(|| TandemError::RecordNotFound(id.to_string()))?;
        if stage != Stage::PendingApproval {
            debug!(id, stage = %stage, "Decision skipped, record not pending");
            return Ok(false);
        }

        let record = self.store.load_from(Stage::PendingApproval, id)?;
        if let Some(logged) = logged_outcome(&record) {
            // Crash recovery: a decision was logged but the move did not
            // complete. Finish the move to the LOGGED outcome; the caller's
            // argument is ignored so a duplicate trigger carrying the
            // opposite outcome cannot flip the decision.
            self.store
                .transition(id, Stage::PendingApproval, logged.target_stage())?;
            return Ok(false);
        }

        let now = self.clock.now();
        self.store.update(id, |record| {
            record.trace(actor, format!("decided:{}", outcome), now);
        })?;
        self.audit.append(&AuditEntry::new(
            id,
            Stage::PendingApproval.to_string(),
            outcome.target_stage().to_string(),
            actor,
            now,
            format!("decided: {}", outcome),
        ))?;
        self.store
            .transition(id, Stage::PendingApproval, outcome.target_stage())?;

        info!(id, outcome = %outcome, actor, "Decision recorded");
        Ok(true)
    }

    /// Lazy expiration: move every pending record whose `expires_at` has
    /// passed to `Rejected` with reason `expired`. Invoked on a fixed
    /// interval, not by a background timer per record.
    pub fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = 0;

        for record in self.store.scan(Stage::PendingApproval)? {
            let Some(expires_at) = record.expires_at else {
                continue;
            };
            if expires_at > now {
                continue;
            }

            self.store.update(&record.id, |r| {
                r.trace("gateway", format!("expired at {}", expires_at), now);
            })?;
            self.audit.append(&AuditEntry::new(
                &record.id,
                Stage::PendingApproval.to_string(),
                Stage::Rejected.to_string(),
                "gateway",
                now,
                EXPIRED_REASON,
            ))?;
            self.store
                .transition(&record.id, Stage::PendingApproval, Stage::Rejected)?;
            expired += 1;
        }

        if expired > 0 {
            info!(expired, "Approval sweep expired records");
        }
        Ok(expired)
    }

    /// Everything awaiting a decision, with rationale visible to the
    /// reviewing human.
    pub fn pending(&self) -> Result<Vec<TaskRecord>> {
        self.store.scan(Stage::PendingApproval)
    }
}

/// The outcome already recorded in the trace, if any. An expiry counts as
/// a rejection.
fn logged_outcome(record: &TaskRecord) -> Option<Decision> {
    record.decision_trace.iter().rev().find_map(|t| {
        if let Some(rest) = t.action.strip_prefix("decided:") {
            if rest.starts_with("approved") {
                return Some(Decision::Approved);
            }
            if rest.starts_with("rejected") {
                return Some(Decision::Rejected);
            }
        }
        if t.action.starts_with("expired") {
            return Some(Decision::Rejected);
        }
        None
    })
}
