//! Static (or config-map-seeded) information about the managed cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exposed verbatim via `GET /cluster-info` and embedded into every issued
/// client config document (spec.md §3, §4.E).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    pub server_url: String,
    /// Base64-encoded PEM certificate-authority bundle.
    pub ca_data: String,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ClusterInfo {
    pub fn new(server_url: impl Into<String>, ca_data: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ca_data: ca_data.into(),
            insecure_skip_tls_verify: false,
            labels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let info = ClusterInfo::new("https://cluster.example.com:6443", "base64-ca-data");
        let encoded = serde_json::to_string(&info).unwrap();
        let decoded: ClusterInfo = serde_json::from_str(&encoded).unwrap();
        assert_eq!(info, decoded);
    }
}
