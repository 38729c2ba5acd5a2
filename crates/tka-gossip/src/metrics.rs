//! Gossip-owned Prometheus instrument (spec.md §10), registered the same
//! way the teacher's `middleware/metrics.rs` registers its own vectors:
//! `lazy_static!` plus a one-time `register_*` call against the global
//! registry, which `tka-server`'s `/metrics` handler later gathers whole.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Gossip merges, partitioned by whether any entry was actually fresh
    /// (spec.md §4.G `merge`), incremented from both the emitter and accept
    /// sides of an exchange.
    pub static ref GOSSIP_MERGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tka_gossip_merges_total",
        "Gossip merge operations, partitioned by whether any entry was accepted",
        &["outcome"]
    )
    .unwrap();
}
