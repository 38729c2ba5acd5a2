//! 4.F: the HTTP surface. Routes under `/api/v1alpha1`, wrapped by the auth
//! middleware from `tka-identity` (4.B); `/ready` and `/metrics` are wired in
//! separately by [`crate::supervisor`] and [`crate::metrics`], outside both
//! the version prefix and the auth layer.
//!
//! Grounded on the teacher's `api-server/src/lib.rs` handler shape (thin
//! handlers returning `ApiResult<T>`, a `create_router` that layers
//! middleware and nests a versioned group) but with `tka_types::TkaError` in
//! place of `ApiError`, since this system's error envelope is the crate-wide
//! one built in `tka-types`.

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware as axum_middleware;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tka_controller::{SignInStore, StoreError};
use tka_gossip::GossipStore;
use tka_identity::{auth_middleware, AuthContext, AuthState, ConnectionInfo, FUNNEL_MARKER_HEADER};
use tka_types::{ClusterInfo, LoginStatusResponse, TkaError};

use crate::kubeconfig;

/// Stamps [`ConnectionInfo`] onto the request before the auth middleware
/// runs (spec.md §4.B step 1 expects it already present in extensions). The
/// overlay's real transport would know funnel-vs-mesh at accept time; this
/// direct-TCP stand-in only has the funnel marker header to go on, which
/// `auth_middleware` re-checks anyway, so `is_funnel` here is always `false`.
async fn connection_info_middleware(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let is_funnel = request.headers().contains_key(FUNNEL_MARKER_HEADER);
    request
        .extensions_mut()
        .insert(ConnectionInfo { remote_addr, is_funnel });
    next.run(request).await
}

/// Shared state behind the versioned route group.
pub struct AppState {
    pub store: Arc<dyn SignInStore>,
    pub client: Client,
    pub namespace: String,
    pub name_prefix: String,
    pub cluster_info: ClusterInfo,
    pub gossip: Option<Arc<GossipStore>>,
    pub retry_after_secs: u64,
}

fn map_store_error(err: StoreError, not_found_status: StatusCode) -> TkaError {
    match err {
        StoreError::NotFound(username) => {
            TkaError::new(not_found_status, format!("no sign-in record for {username:?}"))
        }
        StoreError::InvalidPeriod(reason) => {
            TkaError::internal_error(format!("validity period rejected: {reason}"))
                .with_advice("check the capability rule's period string")
        }
        StoreError::Kube(err) => TkaError::internal_error(err.to_string()),
    }
}

/// `POST /api/v1alpha1/login` (spec.md §4.F). Creates or refreshes the
/// sign-in record; the returned `until` is the *predicted* expiry (now plus
/// the winning rule's period), since the reconciler hasn't necessarily run
/// yet by the time this handler returns.
async fn login_post(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<(StatusCode, Json<LoginStatusResponse>), TkaError> {
    state
        .store
        .upsert(&auth.username, &auth.rule.role, &auth.rule.period)
        .await
        .map_err(|err| map_store_error(err, StatusCode::NOT_FOUND))?;

    // spec.md §4.F tables this as a 500, not the usual 400 a malformed
    // duration string gets elsewhere: by the time a rule reaches this
    // handler `upsert` has already accepted it, so a parse failure here
    // means the capability config, not the request, is broken.
    let period = tka_types::duration::parse(&auth.rule.period)
        .map_err(|err| TkaError::internal_error(err.to_string()))?;
    let until = Utc::now() + period;

    Ok((
        StatusCode::ACCEPTED,
        Json(LoginStatusResponse {
            username: auth.username,
            role: auth.rule.role,
            until,
        }),
    ))
}

/// `GET /api/v1alpha1/login` (spec.md §4.F).
async fn login_get(State(state): State<Arc<AppState>>, auth: AuthContext) -> Result<Response, TkaError> {
    let summary = state
        .store
        .status(&auth.username)
        .await
        .map_err(|err| map_store_error(err, StatusCode::UNAUTHORIZED))?;

    match summary.into_login_response() {
        Some(response) => Ok((StatusCode::OK, Json(response)).into_response()),
        None => Err(TkaError::accepted_not_ready(
            "sign-in accepted but not yet provisioned",
            state.retry_after_secs,
        )),
    }
}

/// `GET /api/v1alpha1/kubeconfig` (spec.md §4.E, §4.F).
async fn kubeconfig_get(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    headers: HeaderMap,
) -> Result<Response, TkaError> {
    let summary = state
        .store
        .status(&auth.username)
        .await
        .map_err(|err| map_store_error(err, StatusCode::UNAUTHORIZED))?;

    if !summary.provisioned {
        return Err(TkaError::accepted_not_ready(
            "sign-in accepted but not yet provisioned",
            state.retry_after_secs,
        ));
    }
    let valid_until = summary
        .valid_until
        .ok_or_else(|| TkaError::internal_error("provisioned record is missing validUntil"))?;

    let identity_name = tka_types::record_name(&state.name_prefix, &auth.username);
    let token = kubeconfig::mint_token(&state.client, &state.namespace, &identity_name, valid_until).await?;
    let document = kubeconfig::assemble(&auth.username, &state.cluster_info, token)?;

    let wants_yaml = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("yaml"))
        .unwrap_or(false);

    if wants_yaml {
        let body = serde_yaml::to_string(&document)
            .map_err(|err| TkaError::internal_error(format!("failed to encode kubeconfig as yaml: {err}")))?;
        Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/yaml")], body).into_response())
    } else {
        Ok((StatusCode::OK, Json(document)).into_response())
    }
}

/// `POST /api/v1alpha1/logout` (spec.md §4.F).
async fn logout_post(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<LoginStatusResponse>, TkaError> {
    let summary = state
        .store
        .status(&auth.username)
        .await
        .map_err(|err| map_store_error(err, StatusCode::NOT_FOUND))?;

    state
        .store
        .delete(&auth.username)
        .await
        .map_err(|err| TkaError::internal_error(format!("failed to delete sign-in record: {err}")))?;

    let until = summary.valid_until.unwrap_or_else(Utc::now);
    Ok(Json(LoginStatusResponse {
        username: summary.username,
        role: summary.role,
        until,
    }))
}

/// `GET /api/v1alpha1/cluster-info` (spec.md §4.F).
async fn cluster_info_get(State(state): State<Arc<AppState>>) -> Json<ClusterInfo> {
    Json(state.cluster_info.clone())
}

/// Renders the member list as a small HTML table, grounded on the teacher's
/// `api-server/src/lib.rs` `axum::response::Html` dashboard handler — except
/// the body here is assembled from live peer data rather than a static
/// `include_str!` asset, since the member list changes every gossip round.
fn memberlist_html(peers: &[tka_gossip::PeerDisplay]) -> String {
    let mut rows = String::new();
    for peer in peers {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}s ago</td></tr>\n",
            peer.node_id, peer.state.api_endpoint, peer.state.api_port, peer.seconds_since_seen
        ));
    }
    format!(
        "<!DOCTYPE html><html><head><title>tka memberlist</title></head><body>\
         <h1>Cluster memberlist</h1>\
         <table border=\"1\"><tr><th>Node</th><th>API endpoint</th><th>Port</th><th>Last seen</th></tr>\n{rows}</table>\
         </body></html>"
    )
}

/// `GET /api/v1alpha1/memberlist` (spec.md §4.F). JSON by default; HTML when
/// the caller's `Accept` header prefers it, same negotiation shape as
/// `GET /kubeconfig`.
async fn memberlist_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, TkaError> {
    let store = state
        .gossip
        .as_ref()
        .ok_or_else(|| TkaError::service_unavailable("gossip membership is disabled"))?;

    let peers = store.display_data();
    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false);

    if wants_html {
        Ok((StatusCode::OK, axum::response::Html(memberlist_html(&peers))).into_response())
    } else {
        Ok((StatusCode::OK, Json(peers)).into_response())
    }
}

/// Builds the versioned, auth-wrapped route group (spec.md §4.F) and stamps
/// [`ConnectionInfo`] onto every request ahead of the auth layer. Served over
/// a listener from [`tka_identity::OverlayNetwork::bind`], so
/// `into_make_service_with_connect_info::<SocketAddr>()` is required at the
/// call site for the `ConnectInfo` extractor above to resolve.
pub fn versioned_router(state: Arc<AppState>, auth_state: Arc<AuthState>) -> Router {
    let group = Router::new()
        .route("/login", post(login_post).get(login_get))
        .route("/kubeconfig", get(kubeconfig_get))
        .route("/logout", post(logout_post))
        .route("/cluster-info", get(cluster_info_get))
        .route("/memberlist", get(memberlist_get))
        .layer(axum_middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state);

    Router::new()
        .nest("/api/v1alpha1", group)
        .layer(axum_middleware::from_fn(crate::metrics::metrics_middleware))
        .layer(axum_middleware::from_fn(connection_info_middleware))
}
