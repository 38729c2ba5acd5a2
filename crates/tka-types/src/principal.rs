//! The resolved identity of an inbound overlay connection.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An authenticated overlay peer, as resolved by the identity resolver (4.A).
///
/// Never persisted: derived fresh per request from the overlay's local
/// control socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// Full login, e.g. `alice@example.com`.
    pub login: String,
    /// Tags the overlay's ACL attached to this peer, e.g. `tag:ci`.
    pub tags: BTreeSet<String>,
    /// Raw capability entries, keyed by capability name. Each entry is the
    /// undecoded JSON bytes of one capability rule; decoding happens in the
    /// auth middleware (4.B), not here, since the capability name and the
    /// expected rule shape are both caller-configured.
    pub capabilities: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Principal {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            tags: BTreeSet::new(),
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_capability(
        mut self,
        name: impl Into<String>,
        raw_rules: Vec<Vec<u8>>,
    ) -> Self {
        self.capabilities.insert(name.into(), raw_rules);
        self
    }

    /// True if the overlay's ACL tagged this peer (a "tagged node" rather
    /// than a human user's device).
    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }

    /// The portion of `login` before the first `@`, used as the cluster-side
    /// username (spec.md §4.B step 7).
    pub fn username(&self) -> &str {
        self.login.split('@').next().unwrap_or(&self.login)
    }

    /// Raw capability entries registered under `name`, or an empty slice if
    /// the principal carries none.
    pub fn raw_capability(&self, name: &str) -> &[Vec<u8>] {
        self.capabilities
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_strips_domain() {
        let p = Principal::new("alice@example.com");
        assert_eq!(p.username(), "alice");
    }

    #[test]
    fn username_is_stable_without_at() {
        let p = Principal::new("alice");
        assert_eq!(p.username(), "alice");
    }

    #[test]
    fn tagged_principal_reports_tagged() {
        let p = Principal::new("ci@example.com").with_tags(["tag:ci".to_string()]);
        assert!(p.is_tagged());
    }

    #[test]
    fn untagged_principal_reports_not_tagged() {
        let p = Principal::new("alice@example.com");
        assert!(!p.is_tagged());
    }

    #[test]
    fn raw_capability_defaults_to_empty() {
        let p = Principal::new("alice@example.com");
        assert!(p.raw_capability("specht-labs.de/cap/tka").is_empty());
    }
}
