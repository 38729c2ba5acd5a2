//! 4.B: the auth middleware.
//!
//! Shaped like the teacher's `middleware/auth.rs` (a function wrapping
//! `Next`, consulting request extensions for shared state, inserting a
//! typed value back into the extensions for downstream extractors) but the
//! logic underneath is entirely different: there is no JWT, no API key, no
//! database — just the overlay's notion of identity and a capability rule
//! ranking.

use crate::overlay::{ConnectionInfo, OverlayIdentity};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tka_types::{
    capability::select_highest_priority, CapabilityRule, Principal, TkaError,
};

/// Header an overlay funnel proxy stamps on inbound public-ingress requests
/// (spec.md §4.B step 1).
pub const FUNNEL_MARKER_HEADER: &str = "tailscale-funnel";

/// Policy toggles read once at startup (spec.md §6 flags feed these).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub allow_funnel: bool,
    pub allow_tagged: bool,
    pub capability_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_funnel: false,
            allow_tagged: false,
            capability_name: "specht-labs.de/cap/tka".to_string(),
        }
    }
}

pub struct AuthState {
    pub overlay: Arc<dyn OverlayIdentity>,
    pub config: AuthConfig,
}

impl AuthState {
    pub fn new(overlay: Arc<dyn OverlayIdentity>, config: AuthConfig) -> Self {
        Self { overlay, config }
    }
}

/// What the middleware attaches to the request on success: the resolved
/// principal, its cluster-side username, and the single winning capability
/// rule (spec.md §4.B step 7).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub username: String,
    pub rule: CapabilityRule,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = TkaError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| TkaError::internal_error("auth middleware did not run for this route"))
    }
}

/// The middleware function itself, registered via
/// `axum::middleware::from_fn_with_state` on the versioned route group only
/// (spec.md §4.B: "Applied to the versioned API route group only").
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, TkaError> {
    let conn = *request
        .extensions()
        .get::<ConnectionInfo>()
        .ok_or_else(|| TkaError::internal_error("connection info missing from request"))?;

    let funnel_header_present = request.headers().contains_key(FUNNEL_MARKER_HEADER);
    if (funnel_header_present || conn.is_funnel) && !state.config.allow_funnel {
        return Err(TkaError::forbidden("unauthorized request from funnel"));
    }

    let principal = state
        .overlay
        .who_is(conn)
        .await
        .map_err(|e| TkaError::internal_error(e.to_string()))?;

    if principal.is_tagged() && !state.config.allow_tagged {
        return Err(TkaError::bad_request("tagged nodes not (yet) supported"));
    }

    let raw_rules = principal.raw_capability(&state.config.capability_name);
    let mut rules = Vec::with_capacity(raw_rules.len());
    for raw in raw_rules {
        let rule: CapabilityRule = serde_json::from_slice(raw)
            .map_err(|e| TkaError::bad_request(format!("invalid capability rule: {e}")))?;
        rules.push(rule);
    }

    let selected = select_highest_priority(&rules)?.clone();
    let username = principal.username().to_string();

    request.extensions_mut().insert(AuthContext {
        principal,
        username,
        rule: selected,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::LoopbackOverlay;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn capability_bytes(rules: &[CapabilityRule]) -> Vec<Vec<u8>> {
        rules
            .iter()
            .map(|r| serde_json::to_vec(r).unwrap())
            .collect()
    }

    async fn probe(
        overlay: LoopbackOverlay,
        config: AuthConfig,
        conn: ConnectionInfo,
        funnel_header: bool,
    ) -> StatusCode {
        let state = Arc::new(AuthState::new(Arc::new(overlay), config));
        let app = Router::new()
            .route("/login", get(|_ctx: AuthContext| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, auth_middleware));

        let mut builder = Request::builder().method("GET").uri("/login");
        builder = builder.extension(conn);
        if funnel_header {
            builder = builder.header(FUNNEL_MARKER_HEADER, "true");
        }
        let request = builder.body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        response.status()
    }

    #[tokio::test]
    async fn funnel_request_rejected_when_disallowed() {
        let overlay = LoopbackOverlay::new().register(addr(1), Principal::new("alice@example.com"));
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: true,
        };
        let status = probe(overlay, AuthConfig::default(), conn, false).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn funnel_header_rejected_even_over_a_peer_connection() {
        let overlay = LoopbackOverlay::new().register(addr(1), Principal::new("alice@example.com"));
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let status = probe(overlay, AuthConfig::default(), conn, true).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn tagged_node_rejected_by_default() {
        let overlay = LoopbackOverlay::new().with_tagged(addr(1), "ci@example.com", &["tag:ci"]);
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let status = probe(overlay, AuthConfig::default(), conn, false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_rules_is_forbidden() {
        let overlay = LoopbackOverlay::new().register(addr(1), Principal::new("alice@example.com"));
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let status = probe(overlay, AuthConfig::default(), conn, false).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn tied_priority_rules_are_rejected() {
        let rules = vec![
            CapabilityRule {
                role: "dev".into(),
                period: "15m".into(),
                priority: 100,
            },
            CapabilityRule {
                role: "admin".into(),
                period: "15m".into(),
                priority: 100,
            },
        ];
        let principal = Principal::new("alice@example.com")
            .with_capability("specht-labs.de/cap/tka", capability_bytes(&rules));
        let overlay = LoopbackOverlay::new().register(addr(1), principal);
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let status = probe(overlay, AuthConfig::default(), conn, false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn highest_priority_rule_is_selected_and_request_succeeds() {
        let rules = vec![
            CapabilityRule {
                role: "dev".into(),
                period: "15m".into(),
                priority: 100,
            },
            CapabilityRule {
                role: "admin".into(),
                period: "15m".into(),
                priority: 200,
            },
        ];
        let principal = Principal::new("alice@example.com")
            .with_capability("specht-labs.de/cap/tka", capability_bytes(&rules));
        let overlay = LoopbackOverlay::new().register(addr(1), principal);
        let conn = ConnectionInfo {
            remote_addr: addr(1),
            is_funnel: false,
        };
        let status = probe(overlay, AuthConfig::default(), conn, false).await;
        assert_eq!(status, StatusCode::OK);
    }
}
