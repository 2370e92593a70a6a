use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::approval::Decision;
use crate::record::{AgentId, TaskKind};

#[derive(Parser)]
#[command(name = "tandem", about = "Two-agent human-in-the-loop task coordination", version)]
pub struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Materialize the stage hierarchy, ignore rules, and default config.
    Init {
        /// This machine's agent identity.
        #[arg(long, value_enum)]
        agent: AgentArg,
    },

    /// Run the agent: detector polling, claims, triage, sweeps,
    /// execution, and reconciliation on their configured intervals.
    Run,

    /// Create a record by hand (stands in for an external detector).
    Ingest {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Source identity (sender address, account reference).
        #[arg(long)]
        source: String,
        /// Free-form payload text.
        payload: String,
        #[arg(long)]
        first_contact: bool,
        #[arg(long)]
        irreversible: bool,
    },

    /// Record a human decision on a pending record.
    Decide {
        id: String,
        #[arg(value_enum)]
        outcome: DecisionArg,
    },

    /// Run one approval-expiration sweep.
    Sweep,

    /// Run one reconciliation pass against the counterpart agent.
    Reconcile,

    /// Fold pending status deltas into the canonical status document
    /// (executive agent only).
    Fold,

    /// Append a status delta to the write-only inbox.
    Delta { body: String },

    /// Show per-stage record counts and pending approvals.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AgentArg {
    Cloud,
    Local,
}

impl From<AgentArg> for AgentId {
    fn from(value: AgentArg) -> Self {
        match value {
            AgentArg::Cloud => AgentId::Cloud,
            AgentArg::Local => AgentId::Local,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Message,
    CalendarEvent,
    FinancialAlert,
    Payment,
    GeneratedContent,
    PlatformPost,
}

impl From<KindArg> for TaskKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Message => TaskKind::Message,
            KindArg::CalendarEvent => TaskKind::CalendarEvent,
            KindArg::FinancialAlert => TaskKind::FinancialAlert,
            KindArg::Payment => TaskKind::Payment,
            KindArg::GeneratedContent => TaskKind::GeneratedContent,
            KindArg::PlatformPost => TaskKind::PlatformPost,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DecisionArg {
    Approved,
    Rejected,
}

impl From<DecisionArg> for Decision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Approved => Decision::Approved,
            DecisionArg::Rejected => Decision::Rejected,
        }
    }
}
