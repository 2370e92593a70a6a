//! Append-only audit log: one JSONL document per day, one entry per
//! transition or decision. Entries are flushed before the caller performs
//! the physical move (log-then-move), so a crash between the two cannot
//! lose a decision.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TandemError};

pub const AUDIT_DIR: &str = "audit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub record_id: String,
    pub from: String,
    pub to: String,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub reason: String,
}

impl AuditEntry {
    pub fn new(
        record_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            from: from.into(),
            to: to.into(),
            actor: actor.into(),
            at,
            reason: reason.into(),
        }
    }
}

pub struct AuditLogger {
    dir: PathBuf,
}

impl AuditLogger {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(AUDIT_DIR),
        }
    }

    /// Append an entry to today's log (dated by the entry's own timestamp)
    /// and flush before returning.
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.jsonl", entry.at.format("%Y-%m-%d")));

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        info!(
            record_id = %entry.record_id,
            from = %entry.from,
            to = %entry.to,
            actor = %entry.actor,
            reason = %entry.reason,
            "Audit entry"
        );
        Ok(())
    }

    /// Read back one day's entries, oldest first.
    pub fn read_day(&self, day: &str) -> Result<Vec<AuditEntry>> {
        let path = self.dir.join(format!("{}.jsonl", day));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| TandemError::Audit(e.to_string())))
            .collect()
    }
}
