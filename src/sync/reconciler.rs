//! Periodic reconciliation between the two agents. Each agent commits its
//! stage hierarchy to its own branch and folds the counterpart's branch
//! back in, record by record, through the pure resolution rule. A failed
//! fetch or push is a delayed sync, never an error: both agents keep
//! operating and converge on the next successful pass.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::aggregate::{StatusAggregator, STATUS_DOC, UPDATES_DIR};
use crate::audit::{AuditEntry, AuditLogger, AUDIT_DIR};
use crate::error::Result;
use crate::record::AgentId;
use crate::schedule::Clock;
use crate::stage::{Stage, TaskStore};

use super::{resolve, GitRunner};

pub struct Reconciler {
    store: Arc<TaskStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    git: GitRunner,
    agent: AgentId,
    remote: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<TaskStore>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        agent: AgentId,
        remote: impl Into<String>,
    ) -> Self {
        let git = GitRunner::new(store.root());
        Self {
            store,
            audit,
            clock,
            git,
            agent,
            remote: remote.into(),
        }
    }

    fn own_branch(&self) -> String {
        format!("agent/{}", self.agent)
    }

    fn counterpart_tree(&self) -> String {
        format!("{}/agent/{}", self.remote, self.agent.counterpart())
    }

    /// One reconciliation pass: publish our view, fold the counterpart's
    /// view back in, publish the resolved result.
    pub async fn reconcile(&self) -> Result<()> {
        self.store.rescan()?;

        self.git.add_all().await?;
        self.git
            .commit(&format!("sync: {} snapshot", self.agent))
            .await?;

        if let Err(e) = self.git.push(&self.remote, &self.own_branch()).await {
            warn!(error = %e, "Push failed, counterpart will catch up later");
        }

        let counterpart_branch = format!("agent/{}", self.agent.counterpart());
        if let Err(e) = self.git.fetch(&self.remote, &counterpart_branch).await {
            warn!(error = %e, "Fetch failed, reconciliation delayed");
            return Ok(());
        }
        let tree = self.counterpart_tree();
        if !self.git.rev_exists(&tree).await {
            debug!(tree = %tree, "Counterpart has not published yet");
            return Ok(());
        }

        let resolved = self.fold_counterpart(&tree).await?;
        self.prune_consumed_deltas()?;

        self.git.add_all().await?;
        let committed = self
            .git
            .commit(&format!("sync: {} resolve", self.agent))
            .await?;
        if committed {
            if let Err(e) = self.git.push(&self.remote, &self.own_branch()).await {
                warn!(error = %e, "Post-resolve push failed");
            }
        }

        self.store.rescan()?;
        if resolved > 0 {
            info!(resolved, agent = %self.agent, "Reconciliation resolved divergences");
        }
        Ok(())
    }

    /// Walk the counterpart's tree and fold every record and delta we do
    /// not agree about. Returns the number of divergences resolved.
    async fn fold_counterpart(&self, tree: &str) -> Result<usize> {
        let mut resolved = 0;

        for path in self.git.ls_tree(tree).await? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(".delta.md") && path.starts_with(UPDATES_DIR) {
                self.adopt_delta(tree, &path).await?;
                continue;
            }

            if name.ends_with(".jsonl") && path.starts_with(AUDIT_DIR) {
                self.merge_audit(tree, &path).await?;
                continue;
            }

            // The status document has one writer (the executive agent);
            // the always-on agent only ever mirrors it.
            if name == STATUS_DOC && self.agent == AgentId::Cloud {
                let content = self.git.show(tree, &path).await?;
                fs::write(self.store.root().join(&path), content)?;
                continue;
            }

            let Some(id) = name.strip_suffix(".task.md") else {
                continue;
            };
            let Some(parent) = path.parent() else {
                continue;
            };
            let Some(their_stage) = Stage::from_rel_dir(parent) else {
                continue;
            };

            match self.store.stage_of(id) {
                None => {
                    // New to us: adopt the counterpart's copy wholesale.
                    self.materialize(tree, &path, their_stage, id).await?;
                    debug!(id, stage = %their_stage, "Adopted record from counterpart");
                }
                Some(mine) if mine == their_stage => {}
                Some(mine) => {
                    let winner = resolve(mine, their_stage);
                    if winner == mine {
                        // Our copy survives; the counterpart discards its
                        // loser when it runs the same rule.
                        continue;
                    }
                    let local_path = self.store.record_path(mine, id);
                    if local_path.exists() {
                        fs::remove_file(&local_path)?;
                    }
                    self.materialize(tree, &path, winner, id).await?;
                    self.audit.append(&AuditEntry::new(
                        id,
                        mine.to_string(),
                        winner.to_string(),
                        self.agent.as_str(),
                        self.clock.now(),
                        "sync divergence resolved",
                    ))?;
                    resolved += 1;
                }
            }
        }

        Ok(resolved)
    }

    async fn materialize(&self, tree: &str, their_path: &Path, stage: Stage, id: &str) -> Result<()> {
        let content = self.git.show(tree, their_path).await?;
        let target = self.store.record_path(stage, id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(())
    }

    /// Deltas already present locally stay; consumed ones (listed in the
    /// status document) are pruned rather than resurrected.
    async fn adopt_delta(&self, tree: &str, their_path: &Path) -> Result<()> {
        let local = self.store.root().join(their_path);
        if local.exists() {
            return Ok(());
        }
        let Some(stem) = their_path.file_stem().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        // File name carries the delta id after the timestamp prefix.
        let aggregator = StatusAggregator::new(self.store.root(), self.agent);
        if let Some(id) = stem.strip_suffix(".delta").and_then(|s| s.rsplit("-d-").next()) {
            if aggregator.is_consumed(&format!("d-{}", id)) {
                return Ok(());
            }
        }
        let content = self.git.show(tree, their_path).await?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&local, content)?;
        Ok(())
    }

    /// Union-merge the counterpart's daily audit file into ours. Both
    /// agents append to the same day, so neither copy is a superset;
    /// lines already present locally are never duplicated.
    async fn merge_audit(&self, tree: &str, their_path: &Path) -> Result<()> {
        let theirs = self.git.show(tree, their_path).await?;
        let local = self.store.root().join(their_path);
        let existing = match fs::read_to_string(&local) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let known: HashSet<&str> = existing.lines().collect();
        let mut merged = existing.clone();
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        let mut added = 0;
        for line in theirs.lines().filter(|l| !l.trim().is_empty()) {
            if !known.contains(line) {
                merged.push_str(line);
                merged.push('\n');
                added += 1;
            }
        }
        if added > 0 {
            if let Some(parent) = local.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&local, merged)?;
            debug!(file = %their_path.display(), added, "Merged counterpart audit entries");
        }
        Ok(())
    }

    /// Drop inbox copies of deltas the executive agent has already folded
    /// into the status document.
    fn prune_consumed_deltas(&self) -> Result<()> {
        let aggregator = StatusAggregator::new(self.store.root(), self.agent);
        for (path, delta) in aggregator.pending_deltas()? {
            if aggregator.is_consumed(&delta.id) {
                debug!(id = %delta.id, "Pruning consumed delta");
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
