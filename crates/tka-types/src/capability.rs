//! Capability rules and the priority-ranking algorithm used to pick one.

use serde::{Deserialize, Serialize};

/// A single decoded entry from a principal's configured capability name.
///
/// `role` names the cluster role to bind; `period` is a Go-syntax duration
/// string bounding how long the resulting sign-in stays valid; `priority`
/// breaks ties when a principal carries more than one rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityRule {
    pub role: String,
    pub period: String,
    #[serde(default)]
    pub priority: i32,
}

/// The only capability the auth middleware (4.B) requires of a rule type.
///
/// Kept as a trait rather than hard-coding [`CapabilityRule`] in the ranking
/// function so the middleware stays generic over whatever rule shape a
/// caller decodes its capability bytes into (spec.md §9, "capability
/// extraction is polymorphic").
pub trait RankedCapability {
    fn priority(&self) -> i32;
}

impl RankedCapability for CapabilityRule {
    fn priority(&self) -> i32 {
        self.priority
    }
}

/// Error raised when a set of rules cannot be deterministically ranked.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RankError {
    #[error("user not authorized")]
    Empty,
    #[error("multiple capability rules with the same priority")]
    Tie,
}

/// Select the single highest-priority rule out of `rules`.
///
/// Ties at the top priority are a hard error (spec.md §4.B step 6): picking
/// arbitrarily between two equally-ranked rules would make request handling
/// non-deterministic, so the request is rejected instead.
pub fn select_highest_priority<T: RankedCapability>(rules: &[T]) -> Result<&T, RankError> {
    if rules.is_empty() {
        return Err(RankError::Empty);
    }

    let mut best_idx = 0usize;
    let mut best_priority = rules[0].priority();
    let mut tied = false;

    for (idx, rule) in rules.iter().enumerate().skip(1) {
        let p = rule.priority();
        if p > best_priority {
            best_priority = p;
            best_idx = idx;
            tied = false;
        } else if p == best_priority {
            tied = true;
        }
    }

    if tied {
        return Err(RankError::Tie);
    }

    Ok(&rules[best_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(role: &str, priority: i32) -> CapabilityRule {
        CapabilityRule {
            role: role.to_string(),
            period: "15m".to_string(),
            priority,
        }
    }

    #[test]
    fn no_rules_is_rejected() {
        let rules: Vec<CapabilityRule> = vec![];
        assert_eq!(select_highest_priority(&rules), Err(RankError::Empty));
    }

    #[test]
    fn single_rule_wins_by_default() {
        let rules = vec![rule("dev", 0)];
        assert_eq!(select_highest_priority(&rules).unwrap().role, "dev");
    }

    #[test]
    fn higher_priority_wins() {
        let rules = vec![rule("dev", 100), rule("admin", 200)];
        assert_eq!(select_highest_priority(&rules).unwrap().role, "admin");
    }

    #[test]
    fn equal_top_priority_is_a_tie_error() {
        let rules = vec![rule("dev", 100), rule("admin", 100)];
        assert_eq!(select_highest_priority(&rules), Err(RankError::Tie));
    }

    #[test]
    fn tie_below_the_top_does_not_matter() {
        let rules = vec![rule("dev", 50), rule("admin", 200), rule("ops", 50)];
        assert_eq!(select_highest_priority(&rules).unwrap().role, "admin");
    }
}
