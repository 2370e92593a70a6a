//! Cross-agent replication: each agent periodically commits its view of
//! the stage hierarchy, publishes it on its own branch, and folds the
//! counterpart's view back in. Divergences are resolved by a pure,
//! transport-independent rule (`resolve`).

mod git;
mod reconciler;
mod resolve;

pub use git::GitRunner;
pub use reconciler::Reconciler;
pub use resolve::resolve;

use std::path::Path;

use crate::error::Result;

/// Ignore rules for machine-local state: session credentials and scratch
/// artifacts must never enter the replicated tree.
const IGNORE_RULES: &str = "\
.tandem/
secrets/
scratch/
*.session
*.md.tmp
";

pub fn write_ignore_rules(root: &Path) -> Result<()> {
    std::fs::write(root.join(".gitignore"), IGNORE_RULES)?;
    Ok(())
}
