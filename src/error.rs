use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure classification for operations that touch external services.
///
/// Transient failures are absorbed by the retry wrapper; permanent failures
/// surface immediately and leave the record where it is with an annotation.
#[derive(Debug, Clone)]
pub enum OpError {
    Timeout {
        operation: String,
        duration_secs: u64,
    },
    RateLimited {
        retry_after_secs: Option<u64>,
    },
    ServerError(String),
    NetworkError(String),
    AuthFailure(String),
    MalformedInput(String),
    Other(String),
}

impl OpError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ServerError(_)
                | Self::NetworkError(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Parse an error message into a structured classification.
    /// Only matches unambiguous patterns (HTTP codes, explicit keywords);
    /// anything else is `Other` and treated as permanent.
    pub fn from_message(msg: &str) -> Self {
        if msg.contains("429") || msg.contains("Too Many Requests") {
            return Self::RateLimited {
                retry_after_secs: Self::extract_retry_after(msg),
            };
        }
        if msg.contains("500") || msg.contains("502") || msg.contains("503") || msg.contains("504")
        {
            return Self::ServerError(msg.to_string());
        }
        if msg.contains("401") || msg.contains("403") || msg.contains("Unauthorized") {
            return Self::AuthFailure(msg.to_string());
        }
        if msg.contains("400") || msg.contains("Bad Request") {
            return Self::MalformedInput(msg.to_string());
        }
        if msg.contains("timed out") || msg.contains("timeout") {
            return Self::Timeout {
                operation: "external call".to_string(),
                duration_secs: 0,
            };
        }
        if msg.contains("connection refused") || msg.contains("connection reset") {
            return Self::NetworkError(msg.to_string());
        }
        Self::Other(msg.to_string())
    }

    fn extract_retry_after(msg: &str) -> Option<u64> {
        let msg_lower = msg.to_lowercase();
        for pattern in ["retry after ", "retry-after: ", "retry_after="] {
            if let Some(idx) = msg_lower.find(pattern) {
                let after = &msg_lower[idx + pattern.len()..];
                let num: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(secs) = num.parse() {
                    return Some(secs);
                }
            }
        }
        None
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                operation,
                duration_secs,
            } => write!(f, "Timeout after {}s: {}", duration_secs, operation),
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "Rate limited, retry after {}s", secs),
                None => write!(f, "Rate limited"),
            },
            Self::ServerError(msg) => write!(f, "Server error: {}", msg),
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::AuthFailure(msg) => write!(f, "Authentication failure: {}", msg),
            Self::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for OpError {}

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Stage conflict for {id}: {stage} no longer holds the record")]
    StageConflict { id: String, stage: String },

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Record {0} is in a terminal stage and cannot be transitioned")]
    TerminalStage(String),

    #[error("Record document parse error in {path}: {message}")]
    DocumentParse { path: PathBuf, message: String },

    #[error("Sync failed: {0}")]
    Sync(String),

    #[error("Status aggregation is restricted to the executive agent (this agent: {0})")]
    NotAggregateOwner(String),

    #[error("No executor registered for kind: {0}")]
    ExecutorNotFound(String),

    #[error("Execution failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Operation failed: {0}")]
    Operation(#[from] OpError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace not initialized. Run 'tandem init' first.")]
    NotInitialized,

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, TandemError>;
