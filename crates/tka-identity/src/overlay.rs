//! The overlay network boundary (spec.md §1 "out of scope: the embedding of
//! the overlay networking library itself"; SPEC_FULL.md §10 "overlay trait
//! boundary").
//!
//! A production build wires a real Tailscale-style embedded node behind
//! [`OverlayIdentity`]; this crate only defines the trait, a config shape
//! for it, and a loopback fake used throughout the test suite, so that 4.A
//! and 4.B are exercisable without a real mesh.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use tka_types::Principal;
use tokio::net::{TcpListener, TcpStream};

/// Per-request connection facts the overlay runtime would otherwise expose
/// directly. Populated by the transport layer (the HTTP surface's
/// connection-accept hook in `tka-server`) and consulted by the auth
/// middleware before it even resolves an identity (spec.md §4.B step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    /// True if this connection arrived over the overlay's public-ingress
    /// ("funnel") path rather than as a peer-to-peer mesh connection.
    pub is_funnel: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay identity resolution failed: {0}")]
    ResolutionFailed(String),
    #[error("overlay peer dial failed: {0}")]
    DialFailed(String),
}

/// 4.A: maps a connection to the principal that opened it.
#[async_trait]
pub trait OverlayIdentity: Send + Sync {
    async fn who_is(&self, conn: ConnectionInfo) -> Result<Principal, OverlayError>;
}

/// Configuration for embedding a production overlay node (hostname, state
/// directory, ...). Shaped after `tsnet.Server`'s construction options;
/// carried here so `tka-cli`'s settings struct has somewhere to put the
/// corresponding flags even though no production implementation ships in
/// this crate.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub hostname: String,
    pub control_url: Option<String>,
    pub state_dir: String,
    pub ephemeral: bool,
}

/// 4.G/4.H: listen/dial for the gossip client, bound to the overlay's
/// virtual interface in a production build. The overlay network itself is
/// out of scope (spec.md §1); what's in scope is this seam, so the gossip
/// client and lifecycle supervisor can be built and tested against it
/// without embedding a real mesh node.
#[async_trait]
pub trait OverlayNetwork: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, OverlayError>;
    async fn bind(&self, addr: SocketAddr) -> Result<TcpListener, OverlayError>;
}

/// Direct-TCP stand-in for a production overlay network binding. A real
/// embedding would hand out sockets scoped to the overlay's virtual NIC;
/// since that embedding is out of scope here, this dials and binds plain
/// TCP, which is what the production implementation reduces to once the
/// overlay's interface is just another network device.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpOverlayNetwork;

#[async_trait]
impl OverlayNetwork for TcpOverlayNetwork {
    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, OverlayError> {
        TcpStream::connect(addr)
            .await
            .map_err(|e| OverlayError::DialFailed(e.to_string()))
    }

    async fn bind(&self, addr: SocketAddr) -> Result<TcpListener, OverlayError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| OverlayError::DialFailed(e.to_string()))
    }
}

/// A fixed address-to-principal table, for tests and for local manual runs
/// without a real mesh. Mirrors the teacher's table-driven test-fake idiom
/// (e.g. `mesh-coordinator`'s in-memory registries).
#[derive(Debug, Default, Clone)]
pub struct LoopbackOverlay {
    table: BTreeMap<SocketAddr, Principal>,
}

impl LoopbackOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, addr: SocketAddr, principal: Principal) -> Self {
        self.table.insert(addr, principal);
        self
    }

    pub fn with_tagged(self, addr: SocketAddr, login: &str, tags: &[&str]) -> Self {
        let principal = Principal::new(login)
            .with_tags(tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>());
        self.register(addr, principal)
    }
}

#[async_trait]
impl OverlayIdentity for LoopbackOverlay {
    async fn who_is(&self, conn: ConnectionInfo) -> Result<Principal, OverlayError> {
        self.table.get(&conn.remote_addr).cloned().ok_or_else(|| {
            OverlayError::ResolutionFailed(format!("no known peer at {}", conn.remote_addr))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tka_types::capability::CapabilityRule;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn resolves_a_registered_peer() {
        let overlay = LoopbackOverlay::new().register(addr(1), Principal::new("alice@example.com"));
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let principal = overlay.who_is(conn).await.unwrap();
        assert_eq!(principal.login, "alice@example.com");
    }

    #[tokio::test]
    async fn unknown_peer_resolution_fails() {
        let overlay = LoopbackOverlay::new();
        let conn = ConnectionInfo {
            remote_addr: addr(2),
            is_funnel: false,
        };
        assert!(overlay.who_is(conn).await.is_err());
    }

    #[tokio::test]
    async fn tagged_registration_round_trips() {
        let overlay = LoopbackOverlay::new().with_tagged(addr(3), "ci@example.com", &["tag:ci"]);
        let conn = ConnectionInfo {
            remote_addr: addr(3),
            is_funnel: false,
        };
        let principal = overlay.who_is(conn).await.unwrap();
        assert!(principal.is_tagged());
    }

    #[test]
    fn capability_rule_is_usable_as_the_table_value_payload() {
        // sanity: capability rules serialize into the raw-bytes shape
        // Principal::raw_capability expects, for callers building fixtures.
        let rule = CapabilityRule {
            role: "dev".into(),
            period: "15m".into(),
            priority: 10,
        };
        assert!(serde_json::to_vec(&rule).is_ok());
    }
}
