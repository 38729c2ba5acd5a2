//! The sign-in record's logical spec/status shape (spec.md §3).
//!
//! These are the domain-level structs passed across the store (4.C) and
//! reconciler (4.D) boundary. The concrete Kubernetes custom resource that
//! persists them lives in `tka-controller`, which is the only crate that
//! needs to know these are backed by a CRD rather than, say, an embedded
//! key-value store (spec.md §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Desired state of a sign-in (spec.md §3 "Desired").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInSpec {
    pub username: String,
    pub role: String,
    pub validity_period: String,
}

/// Observed state of a sign-in, written by the reconciler (spec.md §3
/// "Observed").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInStatus {
    pub provisioned: bool,
    pub signed_in_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// The annotations the reconciler and HTTP surface read and write
/// (spec.md §3 "Annotations"). Kept as named constants rather than scattered
/// string literals so store and reconciler agree on the keys.
pub mod annotations {
    pub const LAST_ATTEMPTED_SIGN_IN: &str = "specht-labs.de/tka/last-attempted-sign-in";
    pub const SIGN_IN_VALID_UNTIL: &str = "specht-labs.de/tka/sign-in-valid-until";
}

/// The body shared by `POST /login`, `GET /login`, and `POST /logout`
/// (spec.md §4.F: `{username, role, until}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginStatusResponse {
    pub username: String,
    pub role: String,
    pub until: DateTime<Utc>,
}

/// Full projection of a sign-in record, as returned by the store's
/// `status()` operation (spec.md §4.C).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInSummary {
    pub username: String,
    pub role: String,
    pub validity_period: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub provisioned: bool,
}

impl SignInSummary {
    /// Project to the `{username, role, until}` HTTP body. `None` when the
    /// record has no `valid_until` yet (not provisioned) — callers map that
    /// case to 202 before calling this.
    pub fn into_login_response(self) -> Option<LoginStatusResponse> {
        let until = self.valid_until?;
        Some(LoginStatusResponse {
            username: self.username,
            role: self.role,
            until,
        })
    }
}

/// The per-user object name prefix shared by the store (4.C), the
/// reconciler's derived identity object (4.D), and the kubeconfig
/// assembler's token-mint lookup (4.E) — all three must agree on how a
/// username maps to a cluster object name.
pub const DEFAULT_NAME_PREFIX: &str = "tka-";

/// Cluster-side object naming, derived from `username` (spec.md §3
/// "Identity", "uniquely determined by `username`").
pub fn record_name(user_prefix: &str, username: &str) -> String {
    format!("{user_prefix}{username}")
}

pub fn role_binding_name(record_name: &str) -> String {
    format!("{record_name}-binding")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_name_is_determined_by_username() {
        assert_eq!(record_name("tka-", "alice"), "tka-alice");
        assert_eq!(record_name("tka-", "alice"), record_name("tka-", "alice"));
    }

    #[test]
    fn role_binding_name_is_derived_from_record_name() {
        assert_eq!(role_binding_name("tka-alice"), "tka-alice-binding");
    }

    #[test]
    fn summary_without_valid_until_has_no_login_response() {
        let summary = SignInSummary {
            username: "alice".into(),
            role: "dev".into(),
            validity_period: "15m".into(),
            valid_until: None,
            provisioned: false,
        };
        assert!(summary.into_login_response().is_none());
    }

    #[test]
    fn summary_with_valid_until_projects_to_login_response() {
        let until = Utc::now();
        let summary = SignInSummary {
            username: "alice".into(),
            role: "dev".into(),
            validity_period: "15m".into(),
            valid_until: Some(until),
            provisioned: true,
        };
        let resp = summary.into_login_response().unwrap();
        assert_eq!(resp.username, "alice");
        assert_eq!(resp.until, until);
    }
}
