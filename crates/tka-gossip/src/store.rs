//! 4.G: the in-memory gossip store.
//!
//! A `nodeId -> {version, state, lastSeen}` map, guarded by a single
//! `std::sync::RwLock` as SPEC_FULL.md §5 calls for (reads take a read
//! lock, mutations an exclusive lock). Grounded on `mesh-coordinator`'s
//! `registry.rs` shape (an in-memory map behind simple accessor methods,
//! with a heartbeat-style freshness field) generalized to the gossip
//! store's last-writer-wins, monotonic-version semantics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tka_types::{PeerDescriptor, PeerState};

/// The projection `displayData()` hands to a UI or CLI pretty-printer
/// (spec.md §4.G) — the wire-format fields plus `lastSeen` rendered as
/// "time since" rather than an absolute timestamp. This is also exactly
/// the shape `GET /memberlist` serializes (spec.md §4.F).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisplay {
    pub node_id: String,
    pub state: PeerState,
    pub seconds_since_seen: u64,
}

pub struct GossipStore {
    local_node_id: String,
    entries: RwLock<BTreeMap<String, PeerDescriptor>>,
}

impl GossipStore {
    pub fn new(local_node_id: impl Into<String>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Increment the local node's version, overwrite its state, and refresh
    /// `lastSeen` (spec.md §4.G `localUpdate`). Totally ordered with respect
    /// to itself because the write lock serializes callers.
    pub fn local_update(&self, state: PeerState) -> PeerDescriptor {
        let mut entries = self.entries.write().expect("gossip store lock poisoned");
        let next_version = entries
            .get(&self.local_node_id)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        let entry = PeerDescriptor::new(self.local_node_id.clone(), next_version, state);
        entries.insert(self.local_node_id.clone(), entry.clone());
        entry
    }

    /// Apply a batch of remote entries (spec.md §4.G `merge`). An entry is
    /// accepted iff its version is strictly greater than what's locally
    /// known; a tie with differing state marks the peer malformed and is
    /// dropped rather than trusted either way. Returns the accepted subset
    /// so the gossip client can fan the update back out.
    pub fn merge(&self, remote: Vec<PeerDescriptor>) -> Vec<PeerDescriptor> {
        let mut accepted = Vec::new();
        let mut entries = self.entries.write().expect("gossip store lock poisoned");
        for mut entry in remote {
            match entries.get(&entry.node_id) {
                Some(existing) if entry.version < existing.version => {
                    // stale, ignore
                }
                Some(existing) if entry.version == existing.version => {
                    if existing.state != entry.state {
                        tracing::warn!(
                            node_id = %entry.node_id,
                            version = entry.version,
                            "malformed gossip peer: equal version with differing state"
                        );
                    }
                }
                _ => {
                    entry.last_seen = PeerDescriptor::now();
                    entries.insert(entry.node_id.clone(), entry.clone());
                    accepted.push(entry);
                }
            }
        }
        accepted
    }

    /// A consistent point-in-time copy of every known entry (spec.md §4.G
    /// `snapshot`), sent over the wire and read by `/memberlist`.
    pub fn snapshot(&self) -> Vec<PeerDescriptor> {
        self.entries
            .read()
            .expect("gossip store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn display_data(&self) -> Vec<PeerDisplay> {
        self.snapshot()
            .into_iter()
            .map(|entry| PeerDisplay {
                node_id: entry.node_id,
                seconds_since_seen: entry.seconds_since_seen(),
                state: entry.state,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn state(port: u16) -> PeerState {
        PeerState {
            api_endpoint: "https://cluster.example.com".to_string(),
            api_port: port,
            labels: Map::new(),
        }
    }

    #[test]
    fn local_update_is_monotonic() {
        let store = GossipStore::new("node-a:7946");
        let first = store.local_update(state(1));
        let second = store.local_update(state(2));
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
    }

    #[test]
    fn merge_accepts_strictly_greater_version() {
        let store = GossipStore::new("node-a:7946");
        let accepted = store.merge(vec![PeerDescriptor::new("node-b:7946", 1, state(2))]);
        assert_eq!(accepted.len(), 1);

        let rejected = store.merge(vec![PeerDescriptor::new("node-b:7946", 1, state(3))]);
        assert!(rejected.is_empty());
        assert_eq!(store.snapshot()[0].state.api_port, 2);
    }

    #[test]
    fn merge_ignores_equal_version_with_differing_state_without_erroring() {
        let store = GossipStore::new("node-a:7946");
        store.merge(vec![PeerDescriptor::new("node-b:7946", 5, state(1))]);
        let accepted = store.merge(vec![PeerDescriptor::new("node-b:7946", 5, state(2))]);
        assert!(accepted.is_empty());
        assert_eq!(store.snapshot()[0].state.api_port, 1);
    }

    #[test]
    fn merge_overwrites_on_greater_version() {
        let store = GossipStore::new("node-a:7946");
        store.merge(vec![PeerDescriptor::new("node-b:7946", 1, state(1))]);
        store.merge(vec![PeerDescriptor::new("node-b:7946", 2, state(2))]);
        assert_eq!(store.snapshot()[0].version, 2);
        assert_eq!(store.snapshot()[0].state.api_port, 2);
    }

    #[test]
    fn snapshot_includes_local_and_remote_entries() {
        let store = GossipStore::new("node-a:7946");
        store.local_update(state(1));
        store.merge(vec![PeerDescriptor::new("node-b:7946", 1, state(2))]);
        let mut ids: Vec<_> = store.snapshot().into_iter().map(|e| e.node_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["node-a:7946".to_string(), "node-b:7946".to_string()]);
    }

    #[test]
    fn display_data_projects_seconds_since_seen() {
        let store = GossipStore::new("node-a:7946");
        store.local_update(state(1));
        let display = store.display_data();
        assert_eq!(display.len(), 1);
        assert_eq!(display[0].node_id, "node-a:7946");
    }
}
