//! Reconciler-owned Prometheus instruments (spec.md §10), registered once
//! into the process-wide registry and shared via `lazy_static!`, following
//! the teacher's `middleware/metrics.rs` idiom. `GET /metrics` itself is
//! served by `tka-server`, which gathers this registry alongside its own.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Total sign-ins provisioned, by role. Counts both first-time logins
    /// and extensions (spec.md §4.D Provision step 4).
    pub static ref SIGN_INS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tka_sign_ins_total",
        "Total number of sign-ins provisioned, by role",
        &["role"]
    )
    .unwrap();

    /// Currently active sessions, by role. Incremented on the false->true
    /// provisioned transition, decremented on deprovision.
    pub static ref ACTIVE_SESSIONS: IntGaugeVec = register_int_gauge_vec!(
        "tka_active_sessions",
        "Currently active sign-in sessions, by role",
        &["role"]
    )
    .unwrap();

    /// Reconcile wall-clock time, by the action that was applied.
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "tka_reconcile_duration_seconds",
        "Reconcile duration in seconds, by selected action",
        &["action"]
    )
    .unwrap();
}
