//! Pure conflict resolution. Given the two stages both agents believe a
//! record occupies, pick the surviving stage. The rule is a total order,
//! so both agents pick the same winner no matter which of them runs it.

use crate::stage::Stage;

/// Resolve a divergence for one record id.
///
/// 1. The more terminal stage wins (`Done`/`Rejected` > `Approved` >
///    `Pending_Approval` > `In_Progress` > `Needs_Action`).
/// 2. A double-claim (both sides `In_Progress`) goes to the
///    lexicographically smaller agent id; the loser's copy is discarded.
/// 3. Any remaining tie breaks on the stage path string, which is stable
///    and identical on both sides.
pub fn resolve(a: Stage, b: Stage) -> Stage {
    if a == b {
        return a;
    }

    match a.terminality_rank().cmp(&b.terminality_rank()) {
        std::cmp::Ordering::Greater => return a,
        std::cmp::Ordering::Less => return b,
        std::cmp::Ordering::Equal => {}
    }

    if let (Stage::InProgress(agent_a, _), Stage::InProgress(agent_b, _)) = (a, b) {
        return if agent_a <= agent_b { a } else { b };
    }

    if a.to_string() <= b.to_string() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AgentId, Domain};

    fn all_pairs() -> Vec<(Stage, Stage)> {
        let stages = Stage::all();
        let mut pairs = Vec::new();
        for &a in &stages {
            for &b in &stages {
                pairs.push((a, b));
            }
        }
        pairs
    }

    #[test]
    fn test_more_terminal_stage_wins() {
        let d = Domain::Business;
        assert_eq!(
            resolve(Stage::Done(d), Stage::InProgress(AgentId::Local, d)),
            Stage::Done(d)
        );
        assert_eq!(resolve(Stage::PendingApproval, Stage::Rejected), Stage::Rejected);
        assert_eq!(resolve(Stage::Approved, Stage::PendingApproval), Stage::Approved);
        assert_eq!(
            resolve(Stage::NeedsAction(d), Stage::InProgress(AgentId::Cloud, d)),
            Stage::InProgress(AgentId::Cloud, d)
        );
    }

    #[test]
    fn test_double_claim_goes_to_smaller_agent() {
        let d = Domain::Personal;
        let cloud = Stage::InProgress(AgentId::Cloud, d);
        let local = Stage::InProgress(AgentId::Local, d);
        assert_eq!(resolve(cloud, local), cloud);
        assert_eq!(resolve(local, cloud), cloud);
    }

    #[test]
    fn test_resolution_is_symmetric() {
        for (a, b) in all_pairs() {
            assert_eq!(resolve(a, b), resolve(b, a), "asymmetric for {} / {}", a, b);
        }
    }

    #[test]
    fn test_resolution_picks_one_of_the_inputs() {
        for (a, b) in all_pairs() {
            let winner = resolve(a, b);
            assert!(winner == a || winner == b);
        }
    }

    #[test]
    fn test_identical_stages_resolve_to_themselves() {
        for stage in Stage::all() {
            assert_eq!(resolve(stage, stage), stage);
        }
    }
}
