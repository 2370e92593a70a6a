//! Stage layout and transition rules. A record's state *is* its location:
//! moving a document between stage directories is the state transition.

mod store;

pub use store::TaskStore;

use std::path::{Path, PathBuf};

use crate::record::{AgentId, Domain};

/// Pipeline stage. The directory layout underneath the workspace root is
/// the wire contract between the two agents:
/// `Needs_Action/{domain}/`, `In_Progress/{agent}/{domain}/`,
/// `Pending_Approval/`, `Approved/`, `Rejected/`, `Done/{domain}/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NeedsAction(Domain),
    InProgress(AgentId, Domain),
    PendingApproval,
    Approved,
    Rejected,
    Done(Domain),
}

impl Stage {
    /// Relative directory for this stage under the workspace root.
    pub fn dir(&self) -> PathBuf {
        match self {
            Self::NeedsAction(domain) => Path::new("Needs_Action").join(domain.as_str()),
            Self::InProgress(agent, domain) => Path::new("In_Progress")
                .join(agent.as_str())
                .join(domain.as_str()),
            Self::PendingApproval => PathBuf::from("Pending_Approval"),
            Self::Approved => PathBuf::from("Approved"),
            Self::Rejected => PathBuf::from("Rejected"),
            Self::Done(domain) => Path::new("Done").join(domain.as_str()),
        }
    }

    /// Every concrete stage directory, used to materialize the hierarchy
    /// and to rebuild the index by scanning.
    pub fn all() -> Vec<Stage> {
        let mut stages = Vec::new();
        for domain in Domain::ALL {
            stages.push(Stage::NeedsAction(domain));
        }
        for agent in [AgentId::Cloud, AgentId::Local] {
            for domain in Domain::ALL {
                stages.push(Stage::InProgress(agent, domain));
            }
        }
        stages.push(Stage::PendingApproval);
        stages.push(Stage::Approved);
        stages.push(Stage::Rejected);
        for domain in Domain::ALL {
            stages.push(Stage::Done(domain));
        }
        stages
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Rejected)
    }

    pub fn can_transition_to(&self, target: Stage) -> bool {
        match (self, target) {
            (Self::NeedsAction(d), Stage::InProgress(_, td)) => *d == td,
            (Self::InProgress(..), Stage::PendingApproval) => true,
            (Self::InProgress(_, d), Stage::Done(td)) => *d == td,
            (Self::InProgress(..), Stage::Rejected) => true,
            (Self::InProgress(..), Stage::Approved) => true,
            // Liveness recovery: a restarting agent requeues parked work.
            (Self::InProgress(_, d), Stage::NeedsAction(td)) => *d == td,
            (Self::PendingApproval, Stage::Approved | Stage::Rejected) => true,
            (Self::Approved, Stage::Done(_)) => true,
            _ => false,
        }
    }

    /// Total order used by conflict resolution: the more finished outcome
    /// always wins a divergence.
    pub fn terminality_rank(&self) -> u8 {
        match self {
            Self::Done(_) | Self::Rejected => 4,
            Self::Approved => 3,
            Self::PendingApproval => 2,
            Self::InProgress(..) => 1,
            Self::NeedsAction(_) => 0,
        }
    }

    /// Reconstruct a stage from a relative path under the workspace root.
    pub fn from_rel_dir(rel: &Path) -> Option<Stage> {
        let mut parts = rel.iter().filter_map(|c| c.to_str());
        match parts.next()? {
            "Needs_Action" => Some(Stage::NeedsAction(Domain::from_dir_name(parts.next()?)?)),
            "In_Progress" => {
                let agent: AgentId = parts.next()?.parse().ok()?;
                let domain = Domain::from_dir_name(parts.next()?)?;
                Some(Stage::InProgress(agent, domain))
            }
            "Pending_Approval" => Some(Stage::PendingApproval),
            "Approved" => Some(Stage::Approved),
            "Rejected" => Some(Stage::Rejected),
            "Done" => Some(Stage::Done(Domain::from_dir_name(parts.next()?)?)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedsAction(domain) => write!(f, "Needs_Action/{}", domain),
            Self::InProgress(agent, domain) => write!(f, "In_Progress/{}/{}", agent, domain),
            Self::PendingApproval => write!(f, "Pending_Approval"),
            Self::Approved => write!(f, "Approved"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Done(domain) => write!(f, "Done/{}", domain),
        }
    }
}
