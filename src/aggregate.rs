//! Single-writer status aggregation. The always-on agent appends small,
//! independently named delta documents into a write-only inbox; only the
//! executive agent folds them into the canonical status document, so that
//! document has exactly one writer by construction.
//!
//! Folding is idempotent per delta id: a delta that reappears through
//! replication after it was consumed is deleted again without a second
//! entry.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TandemError};
use crate::record::AgentId;
use crate::schedule::Clock;

pub const UPDATES_DIR: &str = "Updates";
pub const STATUS_DOC: &str = "STATUS.md";

const DELTA_SUFFIX: &str = ".delta.md";

/// A small, independently authored fact destined for the status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub id: String,
    pub author: AgentId,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub body: String,
}

impl DeltaRecord {
    pub fn new(author: AgentId, at: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            id: format!("d-{}", &Uuid::new_v4().to_string()[..8]),
            author,
            at,
            body: body.into(),
        }
    }

    fn file_name(&self) -> String {
        format!("{}-{}{}", self.at.format("%Y%m%dt%H%M%Sz"), self.id, DELTA_SUFFIX)
    }

    fn render(&self) -> Result<String> {
        let header = toml::to_string_pretty(self).map_err(|e| TandemError::Config(e.to_string()))?;
        Ok(format!("---\n{}---\n{}", header, self.body))
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let parse_err = |message: String| TandemError::DocumentParse {
            path: path.to_path_buf(),
            message,
        };
        let rest = content
            .strip_prefix("---")
            .ok_or_else(|| parse_err("missing header".to_string()))?
            .trim_start_matches(['\r', '\n']);
        let end = rest
            .find("\n---")
            .ok_or_else(|| parse_err("missing header end".to_string()))?;
        let mut delta: DeltaRecord =
            toml::from_str(&rest[..end]).map_err(|e| parse_err(e.to_string()))?;
        let after = &rest[end + 4..];
        delta.body = after.strip_prefix('\n').unwrap_or(after).to_string();
        Ok(delta)
    }
}

pub struct StatusAggregator {
    root: PathBuf,
    agent: AgentId,
}

impl StatusAggregator {
    pub fn new(root: impl Into<PathBuf>, agent: AgentId) -> Self {
        Self {
            root: root.into(),
            agent,
        }
    }

    fn updates_dir(&self) -> PathBuf {
        self.root.join(UPDATES_DIR)
    }

    fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_DOC)
    }

    /// Append a delta to the write-only inbox. Any agent may author
    /// deltas; only the executive agent consumes them.
    pub fn write_delta(&self, clock: &dyn Clock, body: impl Into<String>) -> Result<DeltaRecord> {
        let delta = DeltaRecord::new(self.agent, clock.now(), body);
        let dir = self.updates_dir();
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(delta.file_name()), delta.render()?)?;
        debug!(id = %delta.id, author = %delta.author, "Delta written");
        Ok(delta)
    }

    /// Fold every pending delta into the canonical status document and
    /// delete the consumed inbox files. Restricted to the executive
    /// (`local`) agent; anyone else gets an error, never a partial write.
    pub fn fold(&self, clock: &dyn Clock) -> Result<usize> {
        if self.agent != AgentId::Local {
            return Err(TandemError::NotAggregateOwner(self.agent.to_string()));
        }

        let deltas = self.pending_deltas()?;
        if deltas.is_empty() {
            return Ok(0);
        }

        let mut status = match fs::read_to_string(self.status_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                "# Status\n\n## Log\n".to_string()
            }
            Err(e) => return Err(e.into()),
        };

        let mut folded = 0;
        for (_, delta) in &deltas {
            let marker = format!("[{}]", delta.id);
            if !status.contains(&marker) {
                let summary = delta.body.lines().next().unwrap_or("").trim();
                status.push_str(&format!(
                    "- [{}] {} {}: {}\n",
                    delta.id,
                    delta.at.format("%Y-%m-%d %H:%M"),
                    delta.author,
                    summary
                ));
                folded += 1;
            }
        }

        // Temp-write then rename; the counterpart only ever sees a
        // complete document. The markers must be durable before the inbox
        // is touched: a crash here leaves the consumed files in place, and
        // refolding them is a no-op.
        let tmp = self.status_path().with_extension("md.tmp");
        fs::write(&tmp, &status)?;
        fs::rename(&tmp, self.status_path())?;

        for (path, _) in &deltas {
            fs::remove_file(path)?;
        }

        info!(
            folded,
            consumed = deltas.len(),
            at = %clock.now(),
            "Status deltas folded"
        );
        Ok(folded)
    }

    /// Consumed delta ids are listed in the status document; used by the
    /// reconciler to prune inbox copies that replication resurrected.
    pub fn is_consumed(&self, delta_id: &str) -> bool {
        match fs::read_to_string(self.status_path()) {
            Ok(status) => status.contains(&format!("[{}]", delta_id)),
            Err(_) => false,
        }
    }

    pub fn pending_deltas(&self) -> Result<Vec<(PathBuf, DeltaRecord)>> {
        let dir = self.updates_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(DELTA_SUFFIX))
            })
            .collect();
        paths.sort();

        let mut deltas = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            let delta = DeltaRecord::parse(&content, &path)?;
            deltas.push((path, delta));
        }
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualClock;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn test_fold_requires_local_agent() {
        let dir = TempDir::new().unwrap();
        let cloud = StatusAggregator::new(dir.path(), AgentId::Cloud);
        let err = cloud.fold(&clock()).unwrap_err();
        assert!(matches!(err, TandemError::NotAggregateOwner(_)));
    }

    #[test]
    fn test_fold_consumes_deltas_into_status() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let cloud = StatusAggregator::new(dir.path(), AgentId::Cloud);
        let local = StatusAggregator::new(dir.path(), AgentId::Local);

        cloud.write_delta(&clock, "inbox scanned: 3 new messages").unwrap();
        cloud.write_delta(&clock, "calendar: standup moved to 10:00").unwrap();

        assert_eq!(local.fold(&clock).unwrap(), 2);
        assert!(local.pending_deltas().unwrap().is_empty());

        let status = fs::read_to_string(dir.path().join(STATUS_DOC)).unwrap();
        assert!(status.contains("inbox scanned: 3 new messages"));
        assert!(status.contains("calendar: standup moved to 10:00"));
    }

    #[test]
    fn test_refolding_a_replicated_delta_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let cloud = StatusAggregator::new(dir.path(), AgentId::Cloud);
        let local = StatusAggregator::new(dir.path(), AgentId::Local);

        let delta = cloud.write_delta(&clock, "health: sync latency 4s").unwrap();
        assert_eq!(local.fold(&clock).unwrap(), 1);
        assert!(local.is_consumed(&delta.id));

        // Replication brings the consumed delta back into the inbox.
        let dir_path = dir.path().join(UPDATES_DIR);
        fs::create_dir_all(&dir_path).unwrap();
        fs::write(dir_path.join(delta.file_name()), delta.render().unwrap()).unwrap();

        // It is deleted again but not folded twice.
        assert_eq!(local.fold(&clock).unwrap(), 0);
        let status = fs::read_to_string(dir.path().join(STATUS_DOC)).unwrap();
        assert_eq!(status.matches(&delta.id).count(), 1);
    }

    #[test]
    fn test_failed_status_write_leaves_the_inbox_intact() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let cloud = StatusAggregator::new(dir.path(), AgentId::Cloud);
        let local = StatusAggregator::new(dir.path(), AgentId::Local);

        cloud.write_delta(&clock, "inbox: 1 new message").unwrap();

        // Block the temp-write target so the fold fails before the status
        // document becomes durable. No inbox file may be deleted.
        fs::create_dir(dir.path().join("STATUS.md.tmp")).unwrap();
        assert!(local.fold(&clock).is_err());
        assert_eq!(local.pending_deltas().unwrap().len(), 1);

        // Once the write can proceed, the same delta folds normally.
        fs::remove_dir(dir.path().join("STATUS.md.tmp")).unwrap();
        assert_eq!(local.fold(&clock).unwrap(), 1);
        assert!(local.pending_deltas().unwrap().is_empty());
    }

    #[test]
    fn test_delta_round_trip() {
        let clock = clock();
        let delta = DeltaRecord::new(AgentId::Cloud, clock.now(), "line one\nline two");
        let rendered = delta.render().unwrap();
        let parsed = DeltaRecord::parse(&rendered, Path::new("x.delta.md")).unwrap();
        assert_eq!(parsed.id, delta.id);
        assert_eq!(parsed.body, delta.body);
    }
}
