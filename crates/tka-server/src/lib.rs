//! The HTTP surface (4.F), kubeconfig assembler (4.E), layered settings
//! (§6), and lifecycle supervisor (4.H) that `tka-cli` wires up into a
//! running process.

pub mod config;
pub mod http;
pub mod kubeconfig;
pub mod metrics;
pub mod supervisor;

pub use config::{Cli, Command, ServeArgs, Settings, SettingsError};
pub use http::AppState;
pub use metrics::ReadyGate;
pub use supervisor::{SupervisorDeps, SupervisorError, DRAIN_DEADLINE};
