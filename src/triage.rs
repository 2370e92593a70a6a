//! Automated triage: pre-classifies a record before it reaches the human
//! gateway. Conservative by default — any error, timeout, or low-confidence
//! result maps to `NeedsHuman`, and certain categories can never be
//! auto-approved regardless of what the backing policy says.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OpError;
use crate::record::{TaskKind, TaskRecord};
use crate::retry::{with_retry, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoApprove,
    AutoReject,
    NeedsHuman,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AutoApprove => "auto_approve",
            Self::AutoReject => "auto_reject",
            Self::NeedsHuman => "needs_human",
        };
        write!(f, "{}", s)
    }
}

/// Policy result before the conservative wrapper is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub verdict: Verdict,
    pub rationale: String,
    /// 0.0..=1.0; low confidence is demoted to `NeedsHuman`.
    pub confidence: f64,
}

/// Backing policy. May delegate to a remote reasoning service; failures
/// are classified and retried by the wrapper.
#[async_trait]
pub trait TriagePolicy: Send + Sync {
    async fn assess(&self, record: &TaskRecord) -> Result<Assessment, OpError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Assessments below this confidence go to a human.
    pub min_confidence: f64,
    pub retry: RetryConfig,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            retry: RetryConfig::default(),
        }
    }
}

/// Conservative wrapper around an optional backing policy. Without a
/// policy, everything needs a human.
pub struct Triage {
    policy: Option<Arc<dyn TriagePolicy>>,
    config: TriageConfig,
}

impl Triage {
    pub fn new(policy: Option<Arc<dyn TriagePolicy>>, config: TriageConfig) -> Self {
        Self { policy, config }
    }

    /// Evaluate a record. The returned rationale is always logged and
    /// carried into the record's trace so a human can audit why a record
    /// skipped (or reached) manual review.
    pub async fn evaluate(&self, record: &TaskRecord) -> Assessment {
        if let Some(reason) = hard_override(record) {
            let assessment = Assessment {
                verdict: Verdict::NeedsHuman,
                rationale: reason.to_string(),
                confidence: 1.0,
            };
            info!(id = %record.id, rationale = %assessment.rationale, "Triage override");
            return assessment;
        }

        let Some(policy) = &self.policy else {
            return needs_human("no triage policy configured");
        };

        let result = with_retry(&self.config.retry, "triage", || policy.assess(record)).await;

        let assessment = match result {
            Ok(assessment) if assessment.confidence < self.config.min_confidence => {
                needs_human(&format!(
                    "low confidence {:.2} (< {:.2}): {}",
                    assessment.confidence, self.config.min_confidence, assessment.rationale
                ))
            }
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Triage policy failed, defaulting to human");
                needs_human(&format!("policy failure: {}", e))
            }
        };

        info!(
            id = %record.id,
            verdict = %assessment.verdict,
            rationale = %assessment.rationale,
            "Triage assessment"
        );
        assessment
    }
}

fn needs_human(rationale: &str) -> Assessment {
    Assessment {
        verdict: Verdict::NeedsHuman,
        rationale: rationale.to_string(),
        confidence: 0.0,
    }
}

/// Categories that must never be auto-approved, regardless of policy
/// output: payment initiation, first contact with an unseen counterparty,
/// irreversible external-platform actions.
fn hard_override(record: &TaskRecord) -> Option<&'static str> {
    if record.kind == TaskKind::Payment {
        return Some("payment initiation always requires a human decision");
    }
    if record.first_contact {
        return Some("first contact with an unseen counterparty requires a human decision");
    }
    if record.irreversible {
        return Some("irreversible external action requires a human decision");
    }
    None
}
