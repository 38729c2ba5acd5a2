//! The gossip membership plane (spec.md §4.G): an eventually-consistent
//! store of peer descriptors plus the push-pull client that disseminates
//! them over the overlay.

pub mod client;
pub mod metrics;
pub mod store;
pub mod wire;

pub use client::{GossipClient, GossipConfig, GossipError};
pub use store::{GossipStore, PeerDisplay};
