//! Identity resolution (4.A) and auth middleware (4.B).

pub mod middleware;
pub mod overlay;

pub use middleware::{auth_middleware, AuthConfig, AuthContext, AuthState, FUNNEL_MARKER_HEADER};
pub use overlay::{
    ConnectionInfo, LoopbackOverlay, OverlayConfig, OverlayError, OverlayIdentity, OverlayNetwork,
    TcpOverlayNetwork,
};
