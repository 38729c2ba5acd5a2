//! 4.H: the lifecycle supervisor. One cancelable scope parents the overlay
//! connection, the HTTP surface, the reconciler, the gossip client, and the
//! health/metrics listener; a signal triggers cancellation, after which a
//! fresh 30-second deadline scope runs the ordered drain.
//!
//! Grounded on the teacher's `cli/src/main.rs` run-until-interrupted shape
//! (`tokio::select!` over a signal future and task handles) generalized from
//! a single `ctrl_c()` wait into the three-signal, five-component scope
//! spec.md §4.H and §5 "Cancellation" describe.

use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tka_controller::SignInStore;
use tka_gossip::{GossipClient, GossipStore};
use tka_identity::{AuthConfig, AuthState, OverlayIdentity, OverlayNetwork};
use tka_types::ClusterInfo;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::http::{self, AppState};
use crate::metrics::{health_router, ReadyGate};

/// Time budget for the ordered shutdown drain (spec.md §4.H: "a fresh
/// 30-second deadline scope").
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to bind overlay listener on {0}: {1}")]
    OverlayBind(SocketAddr, tka_identity::OverlayError),
    #[error("failed to bind health listener on {0}: {1}")]
    HealthBind(SocketAddr, std::io::Error),
    #[error("HTTP surface failed: {0}")]
    Http(std::io::Error),
    #[error("overlay shutdown failed: {0}")]
    OverlayShutdown(tka_identity::OverlayError),
}

/// Everything the supervisor needs to start A, C/D's client, F, and G.
/// Built by `tka-cli`'s `serve` entrypoint from a resolved [`crate::config::Settings`].
pub struct SupervisorDeps {
    pub client: Client,
    pub store: Arc<dyn SignInStore>,
    pub overlay_identity: Arc<dyn OverlayIdentity>,
    pub overlay_network: Arc<dyn OverlayNetwork>,
    pub auth_config: AuthConfig,
    pub cluster_info: ClusterInfo,
    pub namespace: String,
    pub name_prefix: String,
    pub overlay_addr: SocketAddr,
    pub health_addr: SocketAddr,
    pub retry_after_secs: u64,
    /// `None` disables component G entirely; `GET /memberlist` then answers
    /// 503 (spec.md §4.F) and no gossip task is started.
    pub gossip: Option<(Arc<GossipClient>, Arc<GossipStore>)>,
}

/// Runs every component until a shutdown signal arrives, then drains them in
/// order. Returns once the drain completes (successfully or past deadline);
/// the overlay-shutdown error, if any, is the only one propagated to the
/// caller (spec.md §4.H).
pub async fn run(deps: SupervisorDeps) -> Result<(), SupervisorError> {
    let cancel = CancellationToken::new();
    let ready = ReadyGate::new();

    let overlay_listener = deps
        .overlay_network
        .bind(deps.overlay_addr)
        .await
        .map_err(|err| SupervisorError::OverlayBind(deps.overlay_addr, err))?;
    let health_listener = tokio::net::TcpListener::bind(deps.health_addr)
        .await
        .map_err(|err| SupervisorError::HealthBind(deps.health_addr, err))?;

    let app_state = Arc::new(AppState {
        store: deps.store.clone(),
        client: deps.client.clone(),
        namespace: deps.namespace.clone(),
        name_prefix: deps.name_prefix.clone(),
        cluster_info: deps.cluster_info,
        gossip: deps.gossip.as_ref().map(|(_, store)| store.clone()),
        retry_after_secs: deps.retry_after_secs,
    });
    let auth_state = Arc::new(AuthState::new(deps.overlay_identity, deps.auth_config));
    let router = http::versioned_router(app_state, auth_state);
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    let http_cancel = cancel.child_token();
    let http_handle: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        axum::serve(overlay_listener, make_service)
            .with_graceful_shutdown(http_cancel.cancelled_owned())
            .await
    });

    let health_cancel = cancel.child_token();
    let health_ready = ready.clone();
    let health_handle: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        axum::serve(health_listener, health_router(health_ready))
            .with_graceful_shutdown(health_cancel.cancelled_owned())
            .await
    });

    let reconciler_cancel = cancel.child_token();
    let reconciler_handle = tokio::spawn(tka_controller::reconciler::run(
        deps.client.clone(),
        deps.namespace.clone(),
        deps.name_prefix.clone(),
        reconciler_cancel,
    ));

    let gossip_handle = deps.gossip.map(|(client, _)| {
        let gossip_cancel = cancel.child_token();
        tokio::spawn(async move { client.run(gossip_cancel, DRAIN_DEADLINE).await })
    });

    // A, C/D's client, F and G have all been spawned; the supervisor
    // considers that "started" (spec.md §4.H: the gate "flips to healthy
    // only once [they] have all reported started").
    ready.set_ready(true);
    info!("tka-server ready");

    wait_for_shutdown_signal(&cancel).await;
    ready.set_ready(false);
    info!("shutdown signal received, draining");

    let drain = tokio::time::timeout(DRAIN_DEADLINE, async {
        // (1) stop gossip.
        if let Some(handle) = gossip_handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "gossip task panicked during drain");
            }
        }

        // (2) shut down health listener.
        if let Err(err) = health_handle.await {
            warn!(error = %err, "health listener task panicked during drain");
        }

        // (3) shut down HTTP surface: stop accepting, drain in-flight.
        match http_handle.await {
            Ok(Err(err)) => warn!(error = %err, "HTTP surface returned an error during drain"),
            Err(err) => warn!(error = %err, "HTTP surface task panicked during drain"),
            Ok(Ok(())) => {}
        }

        if let Err(err) = reconciler_handle.await {
            warn!(error = %err, "reconciler task panicked during drain");
        }
    })
    .await;

    if drain.is_err() {
        warn!("shutdown drain exceeded its deadline, proceeding anyway");
    }

    // (4) shut down overlay. A direct-TCP network has nothing left to
    // release once its listener is dropped in step (3); a production
    // overlay embedding would close its node handle here, and that error
    // uniquely propagates past the drain (spec.md §4.H).
    shutdown_overlay().map_err(SupervisorError::OverlayShutdown)?;

    // (5) flush observability exporters. Prometheus exposition here is pull
    // based (`GET /metrics`, already torn down in step 2); nothing to flush.
    info!("shutdown drain complete");
    Ok(())
}

fn shutdown_overlay() -> Result<(), tka_identity::OverlayError> {
    Ok(())
}

async fn wait_for_shutdown_signal(cancel: &CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            cancel.cancel();
            return;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGQUIT handler");
            cancel.cancel();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigquit.recv() => info!("received SIGQUIT"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
