//! Task record data model: the unit of work flowing through the pipeline.

mod document;

pub use document::{parse_document, render_document};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent identity. Two agents share the hierarchy: the always-on agent
/// (`cloud`) and the executive agent (`local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Cloud,
    Local,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
        }
    }

    pub fn counterpart(&self) -> Self {
        match self {
            Self::Cloud => Self::Local,
            Self::Local => Self::Cloud,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloud" => Ok(Self::Cloud),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown agent id: {}", other)),
        }
    }
}

/// Partition tag isolating unrelated workstreams. Assigned once at
/// creation and immutable thereafter; partitions are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Personal,
    Business,
    Shared,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Personal, Domain::Business, Domain::Shared];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "Personal",
            Self::Business => "Business",
            Self::Shared => "Shared",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "Personal" => Some(Self::Personal),
            "Business" => Some(Self::Business),
            "Shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag identifying the originating detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Message,
    CalendarEvent,
    FinancialAlert,
    Payment,
    GeneratedContent,
    PlatformPost,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::CalendarEvent => "calendar_event",
            Self::FinancialAlert => "financial_alert",
            Self::Payment => "payment",
            Self::GeneratedContent => "generated_content",
            Self::PlatformPost => "platform_post",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One hop in a record's audit trail. Appended at every transition and
/// decision; duplicated into the daily audit log for durability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub actor: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

impl TraceEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            at,
        }
    }
}

/// The unit of work. State is never stored here; it is derived from which
/// stage directory currently holds the record's document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Stable identifier derived from kind + source + creation time.
    pub id: String,

    pub kind: TaskKind,

    pub domain: Domain,

    /// Source identifier supplied by the detector (sender address,
    /// calendar id, account reference).
    pub source: String,

    pub created_at: DateTime<Utc>,

    /// Set when the record enters the approval gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Counterparty has never been contacted before. Hard triage override.
    #[serde(default)]
    pub first_contact: bool,

    /// Executing this record performs an irreversible external-platform
    /// action. Hard triage override.
    #[serde(default)]
    pub irreversible: bool,

    /// Id of a terminal record this one supersedes, if any. Terminal
    /// records are never reopened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,

    #[serde(default)]
    pub decision_trace: Vec<TraceEntry>,

    /// Persisted failure context from a permanent executor error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_annotation: Option<String>,

    /// Executor result summary, appended on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,

    /// Free-form payload: what the action is, plus supporting context.
    #[serde(skip)]
    pub payload: String,
}

impl TaskRecord {
    pub fn new(
        kind: TaskKind,
        domain: Domain,
        source: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let id = derive_id(kind, &source, created_at);
        Self {
            id,
            kind,
            domain,
            source,
            created_at,
            expires_at: None,
            first_contact: false,
            irreversible: false,
            supersedes: None,
            decision_trace: Vec::new(),
            error_annotation: None,
            result_summary: None,
            payload: String::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_first_contact(mut self, first_contact: bool) -> Self {
        self.first_contact = first_contact;
        self
    }

    pub fn with_irreversible(mut self, irreversible: bool) -> Self {
        self.irreversible = irreversible;
        self
    }

    pub fn with_supersedes(mut self, id: impl Into<String>) -> Self {
        self.supersedes = Some(id.into());
        self
    }

    pub fn trace(&mut self, actor: impl Into<String>, action: impl Into<String>, at: DateTime<Utc>) {
        self.decision_trace.push(TraceEntry::new(actor, action, at));
    }

    pub fn file_name(&self) -> String {
        format!("{}.task.md", self.id)
    }

    /// A decision has already been recorded for this record. Used to make
    /// `decide` idempotent across replicated copies.
    pub fn is_decided(&self) -> bool {
        self.decision_trace
            .iter()
            .any(|t| t.action.starts_with("decided:") || t.action.starts_with("expired"))
    }
}

/// Stable id: kind + sanitized source + creation second. Detectors supply
/// the same triple on redelivery, so duplicate creation is a no-op.
pub fn derive_id(kind: TaskKind, source: &str, created_at: DateTime<Utc>) -> String {
    let slug: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    format!(
        "{}-{}-{}",
        kind.as_str(),
        slug,
        created_at.format("%Y%m%dt%H%M%Sz")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = derive_id(TaskKind::Message, "alice@example.com", ts());
        let b = derive_id(TaskKind::Message, "alice@example.com", ts());
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_distinguishes_kind_and_source() {
        let a = derive_id(TaskKind::Message, "alice@example.com", ts());
        let b = derive_id(TaskKind::Payment, "alice@example.com", ts());
        let c = derive_id(TaskKind::Message, "bob@example.com", ts());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_agent_tiebreak_order() {
        // Lexicographic order backs the double-claim tiebreak.
        assert!(AgentId::Cloud.as_str() < AgentId::Local.as_str());
        assert!(AgentId::Cloud < AgentId::Local);
    }

    #[test]
    fn test_trace_marks_decided() {
        let mut record = TaskRecord::new(TaskKind::Message, Domain::Personal, "x", ts());
        assert!(!record.is_decided());
        record.trace("human", "decided:approved", ts());
        assert!(record.is_decided());
    }

    #[test]
    fn test_domain_dir_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_dir_name(domain.as_str()), Some(domain));
        }
        assert_eq!(Domain::from_dir_name("Other"), None);
    }
}
