use crate::certainty::Certainty;
use crate::clause::ClauseId;
use crate::inference::DefaultPolicy;

/// An applicable default rule competing for a goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// The default rule.
    pub clause: ClauseId,
    /// Its certainty.
    pub certainty: Certainty,
}

/// Decision produced by applying a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// No default concludes the goal.
    NoCandidate,

    /// A default concluding the goal was selected.
    Selected(ClauseId),

    /// An opposing default (concluding the negation) prevails.
    Defeated(ClauseId),

    /// Policy refused to pick a winner. Holds the competing clauses in id
    /// order.
    Unresolved(Vec<ClauseId>),
}

/// Highest certainty first; among equals the lowest id (earliest asserted).
fn best(candidates: &[Candidate]) -> Option<Candidate> {
    let mut iter = candidates.iter().copied();
    let mut best = iter.next()?;
    for c in iter {
        match c.certainty.total_cmp(&best.certainty) {
            std::cmp::Ordering::Greater => best = c,
            std::cmp::Ordering::Equal if c.clause < best.clause => best = c,
            _ => {}
        }
    }
    Some(best)
}

/// Applies a policy to the defaults concluding a goal (`supporting`) and
/// the defaults concluding its negation (`opposing`).
#[must_use]
pub fn apply_default_policy(
    policy: DefaultPolicy,
    supporting: &[Candidate],
    opposing: &[Candidate],
) -> PolicyDecision {
    let Some(pro) = best(supporting) else {
        return PolicyDecision::NoCandidate;
    };
    let Some(con) = best(opposing) else {
        return PolicyDecision::Selected(pro.clause);
    };

    let tie = || {
        let mut rules = vec![pro.clause, con.clause];
        rules.sort();
        PolicyDecision::Unresolved(rules)
    };

    match policy {
        DefaultPolicy::ExplicitConflict => tie(),
        DefaultPolicy::HighestCertainty => match pro.certainty.total_cmp(&con.certainty) {
            std::cmp::Ordering::Greater => PolicyDecision::Selected(pro.clause),
            std::cmp::Ordering::Less => PolicyDecision::Defeated(con.clause),
            std::cmp::Ordering::Equal => tie(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: u64, certainty: f32) -> Candidate {
        Candidate {
            clause: ClauseId::from_raw(id),
            certainty: Certainty::new(certainty).unwrap(),
        }
    }

    #[test]
    fn unopposed_picks_highest_then_lowest_id() {
        let decision = apply_default_policy(
            DefaultPolicy::HighestCertainty,
            &[cand(3, 0.6), cand(2, 0.8), cand(1, 0.8)],
            &[],
        );
        assert_eq!(decision, PolicyDecision::Selected(ClauseId::from_raw(1)));
    }

    #[test]
    fn higher_certainty_opponent_defeats() {
        let decision = apply_default_policy(DefaultPolicy::HighestCertainty, &[cand(1, 0.5)], &[cand(2, 0.9)]);
        assert_eq!(decision, PolicyDecision::Defeated(ClauseId::from_raw(2)));
    }

    #[test]
    fn equal_certainty_is_unresolved() {
        let decision = apply_default_policy(DefaultPolicy::HighestCertainty, &[cand(4, 0.7)], &[cand(2, 0.7)]);
        assert_eq!(
            decision,
            PolicyDecision::Unresolved(vec![ClauseId::from_raw(2), ClauseId::from_raw(4)])
        );
    }

    #[test]
    fn explicit_conflict_never_picks() {
        let decision = apply_default_policy(DefaultPolicy::ExplicitConflict, &[cand(1, 0.9)], &[cand(2, 0.1)]);
        assert!(matches!(decision, PolicyDecision::Unresolved(_)));
        assert_eq!(
            apply_default_policy(DefaultPolicy::ExplicitConflict, &[cand(1, 0.9)], &[]),
            PolicyDecision::Selected(ClauseId::from_raw(1))
        );
    }

    #[test]
    fn no_candidates() {
        assert_eq!(
            apply_default_policy(DefaultPolicy::HighestCertainty, &[], &[cand(1, 0.9)]),
            PolicyDecision::NoCandidate
        );
    }
}
