use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::classify::ClassifierConfig;
use crate::error::{Result, TandemError};
use crate::record::AgentId;
use crate::retry::RetryConfig;
use crate::triage::TriageConfig;

/// Machine-local configuration directory. Excluded from the replicated
/// tree: agent identity and credentials never cross machines.
pub const CONFIG_DIR: &str = ".tandem";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    /// This machine's agent identity.
    pub agent: AgentId,
    pub intervals: IntervalsConfig,
    pub approval: ApprovalConfig,
    pub retry: RetryConfig,
    pub triage: TriageConfig,
    pub classifier: ClassifierConfig,
    pub sync: SyncConfig,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            agent: AgentId::Local,
            intervals: IntervalsConfig::default(),
            approval: ApprovalConfig::default(),
            retry: RetryConfig::default(),
            triage: TriageConfig::default(),
            classifier: ClassifierConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub poll_secs: u64,
    pub sweep_secs: u64,
    pub reconcile_secs: u64,
    pub execute_secs: u64,
    pub fold_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            poll_secs: 30,
            sweep_secs: 300,
            reconcile_secs: 120,
            execute_secs: 60,
            fold_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub expiry_hours: i64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { expiry_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: String,
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            enabled: true,
        }
    }
}

impl TandemConfig {
    pub async fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, root: &Path) -> Result<()> {
        self.validate()?;
        let dir = root.join(CONFIG_DIR);
        fs::create_dir_all(&dir).await?;
        let content =
            toml::to_string_pretty(self).map_err(|e| TandemError::Config(e.to_string()))?;
        fs::write(dir.join(CONFIG_FILE), content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.intervals.poll_secs == 0 {
            errors.push("intervals.poll_secs must be greater than 0");
        }
        if self.intervals.sweep_secs == 0 {
            errors.push("intervals.sweep_secs must be greater than 0");
        }
        if self.intervals.reconcile_secs == 0 {
            errors.push("intervals.reconcile_secs must be greater than 0");
        }

        if self.approval.expiry_hours <= 0 {
            errors.push("approval.expiry_hours must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be greater than 0");
        }
        if self.retry.initial_delay_secs > self.retry.max_delay_secs {
            errors.push("retry.initial_delay_secs must not exceed retry.max_delay_secs");
        }

        if !(0.0..=1.0).contains(&self.triage.min_confidence) {
            errors.push("triage.min_confidence must be between 0.0 and 1.0");
        }

        if self.sync.enabled && self.sync.remote.is_empty() {
            errors.push("sync.remote must not be empty when sync is enabled");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TandemError::Config(errors.join("; ")))
        }
    }
}
