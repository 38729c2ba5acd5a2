//! The `SignIn` custom resource (spec.md §3): the cluster-persisted shape of
//! a sign-in record. This is the only module in the workspace that needs to
//! know the record is backed by a CRD rather than, say, an embedded
//! key-value store (spec.md §9) — everywhere else talks to `tka_types`'s
//! plain `SignInSpec`/`SignInStatus`.
//!
//! Grounded on the plain `kube` + `k8s-openapi` + `schemars`
//! `#[derive(CustomResource)]` pattern (no wrapper operator crate), since the
//! workspace's dependency stack doesn't carry one.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tka_types::{SignInSpec as DomainSpec, SignInStatus as DomainStatus};

pub const GROUP: &str = "specht-labs.de";
pub const VERSION: &str = "v1alpha1";

/// Finalizer held while the record's derived objects are being torn down,
/// so the controller observes deletion instead of losing the record before
/// cleanup runs.
pub const FINALIZER: &str = "specht-labs.de/tka-controller";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "specht-labs.de",
    version = "v1alpha1",
    kind = "SignIn",
    plural = "signins",
    namespaced,
    shortname = "tka",
    status = "SignInCrdStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SignInCrdSpec {
    pub username: String,
    pub role: String,
    pub validity_period: String,
}

/// RFC3339 text rather than `DateTime<Utc>` directly — keeps the CRD's
/// generated schema a plain string, matching how the cluster API round-trips
/// timestamps on custom resources.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignInCrdStatus {
    pub provisioned: bool,
    pub signed_in_at: Option<String>,
    pub valid_until: Option<String>,
}

impl From<&SignInCrdSpec> for DomainSpec {
    fn from(spec: &SignInCrdSpec) -> Self {
        DomainSpec {
            username: spec.username.clone(),
            role: spec.role.clone(),
            validity_period: spec.validity_period.clone(),
        }
    }
}

impl SignInCrdStatus {
    pub fn to_domain(&self) -> DomainStatus {
        DomainStatus {
            provisioned: self.provisioned,
            signed_in_at: self.signed_in_at.as_deref().and_then(parse_rfc3339),
            valid_until: self.valid_until.as_deref().and_then(parse_rfc3339),
        }
    }

    pub fn provisioned(
        signed_in_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            provisioned: true,
            signed_in_at: Some(signed_in_at.to_rfc3339()),
            valid_until: Some(valid_until.to_rfc3339()),
        }
    }
}

pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_domain_conversion() {
        let signed_in_at = Utc::now();
        let valid_until = signed_in_at + chrono::Duration::minutes(15);
        let status = SignInCrdStatus::provisioned(signed_in_at, valid_until);
        let domain = status.to_domain();
        assert!(domain.provisioned);
        assert_eq!(domain.signed_in_at.unwrap().timestamp(), signed_in_at.timestamp());
        assert_eq!(domain.valid_until.unwrap().timestamp(), valid_until.timestamp());
    }

    #[test]
    fn default_status_is_not_provisioned() {
        let status = SignInCrdStatus::default();
        assert!(!status.provisioned);
        assert!(status.signed_in_at.is_none());
    }
}
