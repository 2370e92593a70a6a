//! Thin wrapper over the git CLI. Replication rides on plain commits and
//! per-agent branches; nothing here knows about stages or records.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, TandemError};

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TandemError::Sync(stderr.to_string()));
        }

        Ok(output)
    }

    pub async fn init_repo(&self) -> Result<()> {
        self.run_checked(&["init", "--quiet"]).await?;
        Ok(())
    }

    pub async fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"]).await?;
        Ok(())
    }

    /// Commit staged changes. Returns `false` when there was nothing to
    /// commit.
    pub async fn commit(&self, message: &str) -> Result<bool> {
        let output = self.run(&["commit", "-m", message]).await?;

        if !output.status.success() {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if combined.contains("nothing to commit") {
                return Ok(false);
            }
            return Err(TandemError::Sync(combined));
        }

        Ok(true)
    }

    pub async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["fetch", remote, branch]).await?;
        Ok(())
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", remote, &format!("HEAD:{}", branch)])
            .await?;
        Ok(())
    }

    /// All file paths in the given tree-ish, relative to the repo root.
    pub async fn ls_tree(&self, tree_ish: &str) -> Result<Vec<PathBuf>> {
        let output = self
            .run_checked(&["ls-tree", "-r", "--name-only", tree_ish])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(PathBuf::from).collect())
    }

    /// File content at a path inside a tree-ish.
    pub async fn show(&self, tree_ish: &str, path: &Path) -> Result<String> {
        let spec = format!("{}:{}", tree_ish, path.display());
        let output = self.run_checked(&["show", &spec]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn rev_exists(&self, tree_ish: &str) -> bool {
        match self
            .run(&["rev-parse", "--verify", "--quiet", tree_ish])
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}
