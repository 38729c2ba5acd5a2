//! 4.G: the gossip client — a periodic push-pull loop plus a symmetric
//! accept side, both built on the `OverlayNetwork` seam from `tka-identity`
//! so the real dial/listen implementation can later be backed by an
//! embedded overlay node without this crate changing.

use crate::store::GossipStore;
use crate::wire::{read_frame, write_frame, WireError};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tka_identity::{OverlayError, OverlayNetwork};
use tka_types::PeerDescriptor;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("gossip dial failed: {0}")]
    Dial(#[from] OverlayError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("gossip exchange timed out")]
    Timeout,
    #[error("peer address {0:?} did not resolve")]
    UnresolvedPeer(String),
}

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// How often the emitter picks new peers to exchange with.
    pub interval: Duration,
    /// How many peers to exchange with per round.
    pub fanout: usize,
    /// Local port the accept side binds to, on the overlay interface.
    pub listen_port: u16,
    /// One-shot exchange targets attempted at startup, before the local
    /// node has necessarily been discovered by anyone else (spec.md §4.G
    /// "the local node is registered before the first round").
    pub bootstrap_peers: Vec<SocketAddr>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            fanout: 3,
            listen_port: 7946,
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Runs the periodic emitter and the symmetric accept loop described in
/// spec.md §4.G. Callers are expected to have already called
/// [`GossipStore::local_update`] once before `run` so bootstrap peers learn
/// of this node on the very first exchange.
pub struct GossipClient {
    store: Arc<GossipStore>,
    network: Arc<dyn OverlayNetwork>,
    config: GossipConfig,
    in_flight: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl GossipClient {
    pub fn new(store: Arc<GossipStore>, network: Arc<dyn OverlayNetwork>, config: GossipConfig) -> Self {
        Self {
            store,
            network,
            config,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Runs the emitter loop and the accept loop until `cancel` fires, then
    /// drains any in-flight exchanges up to `drain_deadline` before
    /// returning (spec.md §4.G "graceful stop").
    pub async fn run(self: Arc<Self>, cancel: CancellationToken, drain_deadline: Duration) {
        for peer in self.config.bootstrap_peers.clone() {
            if let Err(err) = self.exchange_with(peer).await {
                tracing::warn!(%peer, error = %err, "bootstrap gossip exchange failed");
            }
        }

        let listener = match self.network.bind(bind_addr(self.config.listen_port)).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                tracing::warn!(error = %err, "gossip accept loop disabled: bind failed");
                None
            }
        };

        let emitter = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.emit_loop(cancel).await })
        };

        let acceptor = listener.map(|listener| {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.accept_loop(listener, cancel).await })
        });

        cancel.cancelled().await;
        let _ = emitter.await;
        if let Some(acceptor) = acceptor {
            let _ = acceptor.await;
        }

        self.drain(drain_deadline).await;
    }

    async fn emit_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.gossip_round().await,
            }
        }
    }

    async fn gossip_round(&self) {
        for peer in self.pick_random_peers().await {
            if let Err(err) = self.exchange_with(peer).await {
                tracing::debug!(%peer, error = %err, "gossip exchange failed");
            }
        }
    }

    /// Shuffles the known peers (excluding self) and resolves `nodeId`s
    /// (`host:port`, spec.md §3) one at a time until `fanout` addresses are
    /// found, skipping any that don't resolve.
    async fn pick_random_peers(&self) -> Vec<SocketAddr> {
        let local_id = self.store.local_node_id();
        let mut entries: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|entry| entry.node_id != local_id)
            .collect();
        entries.shuffle(&mut rand::thread_rng());

        let mut resolved = Vec::with_capacity(self.config.fanout);
        for entry in entries {
            if resolved.len() >= self.config.fanout {
                break;
            }
            match resolve_gossip_addr(&entry.node_id).await {
                Ok(addr) => resolved.push(addr),
                Err(err) => {
                    tracing::debug!(node_id = %entry.node_id, error = %err, "could not resolve gossip peer")
                }
            }
        }
        resolved
    }

    async fn exchange_with(&self, addr: SocketAddr) -> Result<(), GossipError> {
        let dial = tokio::time::timeout(self.config.interval, self.network.dial(addr));
        let mut stream = dial.await.map_err(|_| GossipError::Timeout)??;

        let outbound = self.store.snapshot();
        write_frame(&mut stream, &outbound).await?;
        let inbound = read_frame(&mut stream).await?;
        record_merge_outcome(self.store.merge(inbound));
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((mut stream, peer_addr)) => {
                            let store = self.store.clone();
                            let handle = tokio::spawn(async move {
                                if let Err(err) = handle_incoming(&mut stream, &store).await {
                                    tracing::warn!(%peer_addr, error = %err, "gossip accept exchange failed");
                                }
                            });
                            self.in_flight.lock().await.push(handle);
                        }
                        Err(err) => tracing::warn!(error = %err, "gossip accept failed"),
                    }
                }
            }
        }
    }

    async fn drain(&self, deadline: Duration) {
        let handles = std::mem::take(&mut *self.in_flight.lock().await);
        let drain_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, drain_all).await.is_err() {
            tracing::warn!("gossip drain deadline exceeded; abandoning in-flight exchanges");
        }
    }
}

async fn handle_incoming(
    stream: &mut tokio::net::TcpStream,
    store: &Arc<GossipStore>,
) -> Result<(), GossipError> {
    let inbound = read_frame(stream).await?;
    record_merge_outcome(store.merge(inbound));
    let outbound = store.snapshot();
    write_frame(stream, &outbound).await?;
    Ok(())
}

fn record_merge_outcome(accepted: Vec<PeerDescriptor>) {
    let outcome = if accepted.is_empty() { "unchanged" } else { "accepted" };
    crate::metrics::GOSSIP_MERGES_TOTAL.with_label_values(&[outcome]).inc();
}

fn bind_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// `nodeId` is `hostname:gossipPort` (spec.md §3); resolve it the way any
/// TCP client resolves a host:port pair. `lookup_host` accepts both a
/// numeric `ip:port` and a DNS name with a port, unlike a strict
/// `SocketAddr` parse, which only accepts the numeric form.
async fn resolve_gossip_addr(node_id: &str) -> Result<SocketAddr, GossipError> {
    tokio::net::lookup_host(node_id)
        .await
        .map_err(|_| GossipError::UnresolvedPeer(node_id.to_string()))?
        .next()
        .ok_or_else(|| GossipError::UnresolvedPeer(node_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gossip_addr_resolves_numeric_ip_and_port_node_id() {
        assert_eq!(
            resolve_gossip_addr("127.0.0.1:7946").await.unwrap(),
            "127.0.0.1:7946".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn gossip_addr_resolves_hostname_and_port_node_id() {
        let resolved = resolve_gossip_addr("localhost:7946").await.unwrap();
        assert_eq!(resolved.port(), 7946);
    }

    #[tokio::test]
    async fn unresolvable_node_id_is_reported() {
        assert!(resolve_gossip_addr("not-an-address").await.is_err());
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = GossipConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.fanout, 3);
    }
}
