//! Detector seam. Detectors are external collaborators (mail, calendar,
//! chat, accounting pollers); this module owns the contract they fulfill:
//! drafts carry a stable source identity, the classifier assigns the
//! domain once, and creation is idempotent so a redelivered draft is a
//! no-op.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::audit::{AuditEntry, AuditLogger};
use crate::classify::DomainClassifier;
use crate::error::{OpError, Result};
use crate::record::{TaskKind, TaskRecord};
use crate::retry::{with_retry, RetryConfig};
use crate::schedule::Clock;
use crate::stage::{Stage, TaskStore};

/// What a detector yields: everything about a record except its domain,
/// which is assigned once at ingestion.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub kind: TaskKind,
    pub source: String,
    pub payload: String,
    /// When the underlying event happened, supplied by the detector.
    /// Record ids derive from this, never from the ingestion clock, so a
    /// redelivery on a later poll maps to the same id.
    pub occurred_at: DateTime<Utc>,
    pub first_contact: bool,
    pub irreversible: bool,
}

impl RecordDraft {
    pub fn new(
        kind: TaskKind,
        source: impl Into<String>,
        payload: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            payload: payload.into(),
            occurred_at,
            first_contact: false,
            irreversible: false,
        }
    }
}

/// An external poller. Failures are classified and retried by the
/// ingestor; a detector may safely redeliver drafts it already produced.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self) -> std::result::Result<Vec<RecordDraft>, OpError>;
}

pub struct Ingestor {
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    classifier: DomainClassifier,
    retry: RetryConfig,
    detectors: Vec<Arc<dyn Detector>>,
}

impl Ingestor {
    pub fn new(
        store: Arc<TaskStore>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        classifier: DomainClassifier,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            classifier,
            retry,
            detectors: Vec::new(),
        }
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// Poll every detector and create records for the drafts they yield.
    /// Returns the number of records actually created (duplicates are
    /// silently deduplicated by id).
    pub async fn poll_all(&self) -> Result<usize> {
        let mut created = 0;
        for detector in &self.detectors {
            let name = detector.name().to_string();
            let drafts =
                match with_retry(&self.retry, &format!("detect:{}", name), || detector.poll())
                    .await
                {
                    Ok(drafts) => drafts,
                    Err(e) => {
                        // One failing detector must not starve the others.
                        tracing::error!(detector = %name, error = %e, "Detector poll failed");
                        continue;
                    }
                };

            for draft in drafts {
                if self.ingest(&name, draft)? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Create a single record from a draft. Idempotent by derived id.
    pub fn ingest(&self, detector: &str, draft: RecordDraft) -> Result<bool> {
        let domain = self.classifier.classify(&draft.source, &draft.payload);
        let now = self.clock.now();

        let mut record = TaskRecord::new(draft.kind, domain, draft.source, draft.occurred_at)
            .with_payload(draft.payload)
            .with_first_contact(draft.first_contact)
            .with_irreversible(draft.irreversible);
        record.trace(format!("detector:{}", detector), "created", now);

        if !self.store.create(&record)? {
            debug!(id = %record.id, "Draft deduplicated");
            return Ok(false);
        }

        self.audit.append(&AuditEntry::new(
            &record.id,
            "-",
            Stage::NeedsAction(domain).to_string(),
            format!("detector:{}", detector),
            now,
            "created",
        ))?;
        info!(id = %record.id, kind = %record.kind, domain = %domain, "Record ingested");
        Ok(true)
    }
}
