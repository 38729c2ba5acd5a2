//! 4.D: the level-triggered reconciler over `SignIn` records. Grounded on
//! the eosin `reconcile.rs` shape (a `ContextData`-carried last-action map
//! for throttled logging, a `determine_action`/`reconcile`/`on_error` split)
//! and the ASoldo `rust_operator` finalizer/owner-ref pattern, but without
//! the eosin example's `kube_leader_election` wrapper: spec.md's Non-goals
//! rule out cross-instance coordination, so each instance just reconciles
//! its own configured cluster directly via `kube::runtime::Controller`.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tka_types::sign_in::annotations::LAST_ATTEMPTED_SIGN_IN;
use tka_types::role_binding_name;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::crd::{parse_rfc3339, SignIn, SignInCrdStatus, FINALIZER};
use crate::metrics;

pub const FIELD_MANAGER: &str = "tka-controller";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("sign-in record {0:?} has no namespace")]
    MissingNamespace(String),
    #[error("sign-in record {0:?} has an unparseable validity period")]
    InvalidDuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileAction {
    Provision,
    Deprovision,
    NoOp,
}

impl ReconcileAction {
    fn label(self) -> &'static str {
        match self {
            ReconcileAction::Provision => "provision",
            ReconcileAction::Deprovision => "deprovision",
            ReconcileAction::NoOp => "noop",
        }
    }
}

pub struct ReconcilerContext {
    client: Client,
    namespace: String,
    name_prefix: String,
    last_action: Mutex<HashMap<String, (ReconcileAction, Instant)>>,
}

/// Runs the controller until `cancel` fires. Reconciliation of each key is
/// serialized by `kube::runtime::Controller`'s internal work queue; distinct
/// keys may run concurrently, bounded by that queue (spec.md §5).
pub async fn run(client: Client, namespace: String, name_prefix: String, cancel: CancellationToken) {
    let api: Api<SignIn> = Api::namespaced(client.clone(), &namespace);
    let ctx = Arc::new(ReconcilerContext {
        client,
        namespace,
        name_prefix,
        last_action: Mutex::new(HashMap::new()),
    });

    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, on_error, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => tracing::debug!(name = %object.name, "sign-in reconciled"),
                Err(err) => warn!(error = %err, "sign-in reconcile failed"),
            }
        })
        .await;
}

async fn reconcile(record: Arc<SignIn>, ctx: Arc<ReconcilerContext>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let name = record.name_any();
    let namespace = record
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace(name.clone()))?;

    if record.meta().deletion_timestamp.is_some() {
        log_transition(&ctx, &name, ReconcileAction::Deprovision).await;
        delete_derived_objects(&record, &namespace, &ctx).await?;
        decrement_active_sessions(&record);
        ensure_finalizer(&record, &namespace, &ctx, false).await?;
        metrics::RECONCILE_DURATION
            .with_label_values(&[ReconcileAction::Deprovision.label()])
            .observe(start.elapsed().as_secs_f64());
        return Ok(Action::await_change());
    }

    ensure_finalizer(&record, &namespace, &ctx, true).await?;

    let action = determine_action(&record);
    log_transition(&ctx, &name, action).await;

    let result = match action {
        ReconcileAction::Provision => {
            let was_provisioned = record.status.as_ref().is_some_and(|s| s.provisioned);
            provision(&record, &namespace, &ctx, was_provisioned).await?;
            let requeue_after = tka_types::duration::parse(&record.spec.validity_period)
                .ok()
                .and_then(|d| d.to_std().ok())
                .unwrap_or(Duration::from_secs(60));
            Ok(Action::requeue(requeue_after))
        }
        ReconcileAction::Deprovision => {
            // Cleanup of derived objects and the gauge decrement happen
            // once, in the `deletion_timestamp.is_some()` branch above: a
            // provisioned record always carries the finalizer, so this
            // `delete` only stamps `deletionTimestamp` and the watcher
            // re-invokes `reconcile` down that branch. Doing the cleanup
            // here too would decrement `tka_active_sessions` twice per
            // expiry.
            let api: Api<SignIn> = Api::namespaced(ctx.client.clone(), &namespace);
            match api.delete(&name, &Default::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(err) => return Err(err.into()),
            }
            Ok(Action::await_change())
        }
        ReconcileAction::NoOp => Ok(Action::requeue(Duration::from_secs(30))),
    };

    metrics::RECONCILE_DURATION
        .with_label_values(&[action.label()])
        .observe(start.elapsed().as_secs_f64());
    result
}

fn on_error(record: Arc<SignIn>, error: &ReconcileError, _ctx: Arc<ReconcilerContext>) -> Action {
    warn!(name = %record.name_any(), error = %error, "sign-in reconcile failed; retrying with backoff");
    Action::requeue(Duration::from_secs(5))
}

/// spec.md §4.D "Action selection". The absent-record case (deletion
/// already observed) is handled by the caller before this is reached.
fn determine_action(record: &SignIn) -> ReconcileAction {
    let status = record.status.clone().unwrap_or_default();
    if !status.provisioned {
        return ReconcileAction::Provision;
    }

    let Ok(period) = tka_types::duration::parse(&record.spec.validity_period) else {
        return ReconcileAction::NoOp;
    };

    let Some(valid_until) = status.valid_until.as_deref().and_then(parse_rfc3339) else {
        return ReconcileAction::NoOp;
    };

    if valid_until < Utc::now() {
        return ReconcileAction::Deprovision;
    }

    if let Some(last_attempted) = record
        .annotations()
        .get(LAST_ATTEMPTED_SIGN_IN)
        .and_then(|raw| parse_rfc3339(raw))
    {
        let expected = last_attempted.checked_add_signed(period);
        if expected != Some(valid_until) {
            return ReconcileAction::Provision;
        }
    }

    ReconcileAction::NoOp
}

/// spec.md §4.D "Provision". `was_provisioned` distinguishes a first-time
/// provision from an extension so the active-sessions gauge isn't
/// double-counted on re-provision.
async fn provision(
    record: &SignIn,
    namespace: &str,
    ctx: &ReconcilerContext,
    was_provisioned: bool,
) -> Result<(), ReconcileError> {
    let name = record.name_any();
    let owner = record
        .controller_owner_ref(&())
        .expect("sign-in record missing uid for owner ref");

    let sa_api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    let service_account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        ..Default::default()
    };
    match sa_api.create(&PostParams::default(), &service_account).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(err) => return Err(err.into()),
    }

    let binding_name = role_binding_name(&name);
    let crb_api: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: record.spec.role.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.clone(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };
    match crb_api.create(&PostParams::default(), &binding).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {
            // already exists: fetch-and-patch roleRef to the current spec.role
            // (spec.md §4.D Provision step 2).
            let patch = serde_json::json!({
                "roleRef": {
                    "apiGroup": "rbac.authorization.k8s.io",
                    "kind": "ClusterRole",
                    "name": record.spec.role,
                }
            });
            crb_api
                .patch(&binding_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?;
        }
        Err(err) => return Err(err.into()),
    }

    let api: Api<SignIn> = Api::namespaced(ctx.client.clone(), namespace);
    let fresh = api.get(&name).await?;
    let last_attempted = fresh
        .annotations()
        .get(LAST_ATTEMPTED_SIGN_IN)
        .and_then(|raw| parse_rfc3339(raw));
    let signed_in_at: DateTime<Utc> = last_attempted.unwrap_or_else(Utc::now);
    let period = tka_types::duration::parse(&fresh.spec.validity_period)
        .map_err(|_| ReconcileError::InvalidDuration(name.clone()))?;
    let valid_until = signed_in_at + period;

    let status = SignInCrdStatus::provisioned(signed_in_at, valid_until);
    let status_patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&status_patch))
        .await?;

    metrics::SIGN_INS_TOTAL
        .with_label_values(&[&fresh.spec.role])
        .inc();
    if !was_provisioned {
        metrics::ACTIVE_SESSIONS
            .with_label_values(&[&fresh.spec.role])
            .inc();
    }

    Ok(())
}

/// spec.md §4.D "Deprovision" steps 1-2: the role binding and per-user
/// identity, tolerating not-found. Step 3 (deleting the record itself) and
/// step 4 (the gauge) are the caller's responsibility, since they differ
/// between the finalizer-driven and expiry-driven call sites.
async fn delete_derived_objects(
    record: &SignIn,
    namespace: &str,
    ctx: &ReconcilerContext,
) -> Result<(), ReconcileError> {
    let name = record.name_any();
    let binding_name = role_binding_name(&name);

    let crb_api: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    match crb_api.delete(&binding_name, &Default::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(err) => return Err(err.into()),
    }

    let sa_api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    match sa_api.delete(&name, &Default::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

fn decrement_active_sessions(record: &SignIn) {
    let was_provisioned = record.status.as_ref().is_some_and(|s| s.provisioned);
    if was_provisioned {
        metrics::ACTIVE_SESSIONS
            .with_label_values(&[&record.spec.role])
            .dec();
    }
}

async fn ensure_finalizer(
    record: &SignIn,
    namespace: &str,
    ctx: &ReconcilerContext,
    present: bool,
) -> Result<(), ReconcileError> {
    let has_finalizer = record.finalizers().iter().any(|f| f == FINALIZER);
    if has_finalizer == present {
        return Ok(());
    }

    let api: Api<SignIn> = Api::namespaced(ctx.client.clone(), namespace);
    let finalizers: Vec<&str> = if present { vec![FINALIZER] } else { vec![] };
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&record.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Logs only on an action transition or every five minutes thereafter
/// (spec.md §10 "throttled to avoid log spam on NoOp-heavy loops"),
/// following the eosin reconcile's last-action-map pattern.
async fn log_transition(ctx: &ReconcilerContext, name: &str, action: ReconcileAction) {
    if action == ReconcileAction::NoOp {
        return;
    }
    let mut last_action = ctx.last_action.lock().await;
    let should_log = match last_action.get(name) {
        Some((last, at)) => *last != action || at.elapsed() > Duration::from_secs(300),
        None => true,
    };
    if should_log {
        info!(namespace = %ctx.namespace, %name, action = action.label(), "sign-in reconcile action selected");
    }
    last_action.insert(name.to_string(), (action, Instant::now()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tka_types::sign_in::annotations::LAST_ATTEMPTED_SIGN_IN;

    fn record_with(status: Option<SignInCrdStatus>, period: &str, annotations: BTreeMap<String, String>) -> SignIn {
        SignIn {
            metadata: ObjectMeta {
                name: Some("tka-alice".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: crate::crd::SignInCrdSpec {
                username: "alice".to_string(),
                role: "dev".to_string(),
                validity_period: period.to_string(),
            },
            status,
        }
    }

    #[test]
    fn unprovisioned_record_is_provisioned() {
        let record = record_with(None, "15m", BTreeMap::new());
        assert_eq!(determine_action(&record), ReconcileAction::Provision);
    }

    #[test]
    fn unparseable_validity_period_is_a_noop() {
        let record = record_with(
            Some(SignInCrdStatus::provisioned(Utc::now(), Utc::now() + chrono::Duration::minutes(15))),
            "not-a-duration",
            BTreeMap::new(),
        );
        assert_eq!(determine_action(&record), ReconcileAction::NoOp);
    }

    #[test]
    fn expired_record_is_deprovisioned() {
        let past = Utc::now() - chrono::Duration::hours(1);
        let record = record_with(Some(SignInCrdStatus::provisioned(past, past)), "15m", BTreeMap::new());
        assert_eq!(determine_action(&record), ReconcileAction::Deprovision);
    }

    #[test]
    fn matching_annotation_and_valid_until_is_a_noop() {
        let signed_in_at = Utc::now();
        let valid_until = signed_in_at + chrono::Duration::minutes(15);
        let mut annotations = BTreeMap::new();
        annotations.insert(LAST_ATTEMPTED_SIGN_IN.to_string(), signed_in_at.to_rfc3339());
        let record = record_with(
            Some(SignInCrdStatus::provisioned(signed_in_at, valid_until)),
            "15m",
            annotations,
        );
        assert_eq!(determine_action(&record), ReconcileAction::NoOp);
    }

    #[test]
    fn extended_login_triggers_reprovision() {
        let signed_in_at = Utc::now() - chrono::Duration::minutes(5);
        let valid_until = signed_in_at + chrono::Duration::minutes(15);
        let mut annotations = BTreeMap::new();
        // last-attempted-sign-in moved forward (a fresh POST /login) but
        // status.validUntil hasn't caught up yet.
        annotations.insert(LAST_ATTEMPTED_SIGN_IN.to_string(), Utc::now().to_rfc3339());
        let record = record_with(
            Some(SignInCrdStatus::provisioned(signed_in_at, valid_until)),
            "30m",
            annotations,
        );
        assert_eq!(determine_action(&record), ReconcileAction::Provision);
    }
}
