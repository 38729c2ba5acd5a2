//! Gossip membership payloads (spec.md §3, §4.G).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The advertised state of one instance, exchanged over gossip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerState {
    pub api_endpoint: String,
    pub api_port: u16,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One entry in the gossip store: a peer's latest known state plus the
/// bookkeeping needed to decide whether a remote update supersedes it.
///
/// `last_seen` is deliberately excluded from the wire representation
/// (spec.md §3: "`lastSeen` is local-only") — it is stamped locally by the
/// receiving node, not carried by the sender, so two nodes observing the
/// same `(nodeId, version, state)` need not agree on when they last heard
/// about it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub node_id: String,
    pub version: u64,
    pub state: PeerState,
    #[serde(skip_serializing, default = "PeerDescriptor::unix_epoch")]
    pub last_seen: u64,
}

impl PeerDescriptor {
    pub fn new(node_id: impl Into<String>, version: u64, state: PeerState) -> Self {
        Self {
            node_id: node_id.into(),
            version,
            state,
            last_seen: Self::now(),
        }
    }

    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn unix_epoch() -> u64 {
        0
    }

    /// Seconds elapsed since `last_seen`, for the "time since" projection
    /// `displayData()` calls for (spec.md §4.G).
    pub fn seconds_since_seen(&self) -> u64 {
        Self::now().saturating_sub(self.last_seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_seen_round_trips_through_json_as_zero_when_absent() {
        let state = PeerState {
            api_endpoint: "https://cluster.example.com".to_string(),
            api_port: 6443,
            labels: BTreeMap::new(),
        };
        let entry = PeerDescriptor::new("node-a:7946", 1, state);
        let encoded = serde_json::to_string(&entry).unwrap();
        assert!(!encoded.contains("lastSeen"));

        let decoded: PeerDescriptor = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.node_id, "node-a:7946");
        assert_eq!(decoded.last_seen, 0);
    }

    #[test]
    fn seconds_since_seen_is_zero_for_fresh_entry() {
        let entry = PeerDescriptor::new(
            "node-a:7946",
            1,
            PeerState {
                api_endpoint: "https://cluster.example.com".to_string(),
                api_port: 6443,
                labels: BTreeMap::new(),
            },
        );
        assert_eq!(entry.seconds_since_seen(), 0);
    }
}
