//! Shared data model for short-lived, role-scoped cluster credential issuance.
//!
//! This crate has no I/O of its own: it holds the types every other crate in
//! the workspace passes across its boundaries (principals, capability rules,
//! the sign-in record's spec/status shape, peer descriptors, cluster info)
//! plus the duration-parsing and error-envelope machinery those types need.

pub mod capability;
pub mod cluster_info;
pub mod duration;
pub mod error;
pub mod peer;
pub mod principal;
pub mod sign_in;

pub use capability::{CapabilityRule, RankedCapability};
pub use cluster_info::ClusterInfo;
pub use error::{TkaError, TkaResult};
pub use peer::{PeerDescriptor, PeerState};
pub use principal::Principal;
pub use sign_in::{
    record_name, role_binding_name, LoginStatusResponse, SignInSpec, SignInStatus, SignInSummary,
    DEFAULT_NAME_PREFIX,
};
