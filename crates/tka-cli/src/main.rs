//! `tka serve` / `tka version` (spec.md §6 "CLI"). Wires the layered
//! settings (`tka_server::config`) into a `kube::Client`, the store and
//! reconciler (`tka-controller`), the gossip client (`tka-gossip`), and the
//! HTTP surface + lifecycle supervisor (`tka-server`), then runs until a
//! shutdown signal drains everything.
//!
//! Grounded on the teacher's `api-server/src/main.rs` startup sequence
//! (`tracing_subscriber::fmt().init()`, structured startup logging) and on
//! `cli/src/main.rs`'s `clap::Parser` + `Subcommand` binary shape.

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tka_gossip::{GossipClient, GossipConfig, GossipStore};
use tka_identity::{AuthConfig, LoopbackOverlay, TcpOverlayNetwork};
use tka_server::config::{Cli, Command, ServeArgs, Settings};
use tka_server::supervisor::{self, SupervisorDeps};
use tka_types::ClusterInfo;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("tka {}", env!("CARGO_PKG_VERSION"));
        }
        Command::Serve(args) => {
            if let Err(err) = serve(args).await {
                error!("{err:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let settings = Settings::load(&args).context("failed to resolve settings")?;

    tracing_subscriber::fmt()
        .with_max_level(if settings.debug { Level::DEBUG } else { Level::INFO })
        .init();

    info!("starting tka");
    info!(version = env!("CARGO_PKG_VERSION"));

    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client from the ambient kubeconfig")?;
    let namespace = client.default_namespace().to_string();

    let cluster_info = ClusterInfo {
        server_url: settings.api_endpoint.clone(),
        ca_data: settings.ca_data.clone(),
        insecure_skip_tls_verify: settings.insecure_skip_tls_verify,
        labels: settings.labels.clone(),
    };

    let store = Arc::new(tka_controller::KubeSignInStore::new(
        client.clone(),
        &namespace,
        tka_types::DEFAULT_NAME_PREFIX,
    ));

    // Embedding a real overlay node is out of scope (spec.md §1); the
    // direct-TCP network and an empty identity table are what a deployment
    // without one reduces to, same as the test suite's fixtures.
    let overlay_network = Arc::new(TcpOverlayNetwork);
    let overlay_identity = Arc::new(LoopbackOverlay::new());

    let auth_config = AuthConfig {
        allow_funnel: false,
        allow_tagged: false,
        capability_name: settings.cap_name.clone(),
    };

    let gossip_config = GossipConfig::default();
    // nodeId is hostname:gossipPort (spec.md §3) so peers that learn this
    // node via gossip can dial it back on the port it actually listens on.
    let hostname = if settings.overlay_hostname.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        settings.overlay_hostname.clone()
    };
    let local_node_id = format!("{hostname}:{}", gossip_config.listen_port);
    let gossip_store = Arc::new(GossipStore::new(local_node_id));
    gossip_store.local_update(tka_types::PeerState {
        api_endpoint: settings.api_endpoint.clone(),
        api_port: settings.overlay_port,
        labels: settings.labels.clone(),
    });
    let gossip_client = Arc::new(GossipClient::new(
        gossip_store.clone(),
        overlay_network.clone(),
        gossip_config,
    ));

    let overlay_addr = SocketAddr::new([0, 0, 0, 0].into(), settings.overlay_port);
    let health_addr = SocketAddr::new([0, 0, 0, 0].into(), settings.health_port);

    let deps = SupervisorDeps {
        client,
        store,
        overlay_identity,
        overlay_network,
        auth_config,
        cluster_info,
        namespace,
        name_prefix: tka_types::DEFAULT_NAME_PREFIX.to_string(),
        overlay_addr,
        health_addr,
        retry_after_secs: settings.retry_after_secs,
        gossip: Some((gossip_client, gossip_store)),
    };

    supervisor::run(deps).await.context("supervisor exited with an error")
}
