//! 4.C: the sign-in record store. The only trait implementation that talks
//! to the cluster API directly; everything above this layer (the HTTP
//! surface) sees the plain `tka_types` domain shapes and a not-found error
//! it can map to 401/404 per endpoint.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tka_types::sign_in::annotations::LAST_ATTEMPTED_SIGN_IN;
use tka_types::{record_name, SignInSummary};

use crate::crd::{SignIn, SignInCrdSpec};

pub const FIELD_MANAGER: &str = "tka-controller";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sign-in record for {0:?} not found")]
    NotFound(String),
    #[error("validity period rejected: {0}")]
    InvalidPeriod(String),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// 4.C's four operations, behind a trait so the HTTP surface can be tested
/// against a fake store instead of a live cluster API.
#[async_trait]
pub trait SignInStore: Send + Sync {
    async fn upsert(&self, username: &str, role: &str, period: &str) -> Result<(), StoreError>;
    async fn get(&self, username: &str) -> Result<SignIn, StoreError>;
    async fn status(&self, username: &str) -> Result<SignInSummary, StoreError>;
    async fn delete(&self, username: &str) -> Result<(), StoreError>;
}

pub struct KubeSignInStore {
    api: Api<SignIn>,
    name_prefix: String,
}

impl KubeSignInStore {
    pub fn new(client: Client, namespace: &str, name_prefix: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name_prefix: name_prefix.into(),
        }
    }

    fn name_for(&self, username: &str) -> String {
        record_name(&self.name_prefix, username)
    }
}

fn classify(err: kube::Error, name: &str) -> StoreError {
    match &err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(name.to_string()),
        _ => StoreError::Kube(err),
    }
}

#[async_trait]
impl SignInStore for KubeSignInStore {
    async fn upsert(&self, username: &str, role: &str, period: &str) -> Result<(), StoreError> {
        tka_types::duration::parse_validity_period(period).map_err(StoreError::InvalidPeriod)?;

        let name = self.name_for(username);
        let now = Utc::now().to_rfc3339();

        match self.api.get(&name).await {
            Ok(_) => {
                let patch = serde_json::json!({
                    "metadata": {
                        "annotations": { LAST_ATTEMPTED_SIGN_IN: now },
                    },
                    "spec": {
                        "username": username,
                        "role": role,
                        "validityPeriod": period,
                    },
                });
                self.api
                    .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await
                    .map_err(|err| classify(err, &name))?;
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                let mut annotations = BTreeMap::new();
                annotations.insert(LAST_ATTEMPTED_SIGN_IN.to_string(), now);
                let record = SignIn {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        annotations: Some(annotations),
                        ..Default::default()
                    },
                    spec: SignInCrdSpec {
                        username: username.to_string(),
                        role: role.to_string(),
                        validity_period: period.to_string(),
                    },
                    status: None,
                };
                self.api
                    .create(&PostParams::default(), &record)
                    .await
                    .map_err(|err| classify(err, &name))?;
                Ok(())
            }
            Err(err) => Err(classify(err, &name)),
        }
    }

    async fn get(&self, username: &str) -> Result<SignIn, StoreError> {
        let name = self.name_for(username);
        self.api.get(&name).await.map_err(|err| classify(err, &name))
    }

    async fn status(&self, username: &str) -> Result<SignInSummary, StoreError> {
        let record = self.get(username).await?;
        let status = record.status.clone().unwrap_or_default().to_domain();
        Ok(SignInSummary {
            username: record.spec.username.clone(),
            role: record.spec.role.clone(),
            validity_period: record.spec.validity_period.clone(),
            valid_until: status.valid_until,
            provisioned: status.provisioned,
        })
    }

    async fn delete(&self, username: &str) -> Result<(), StoreError> {
        let name = self.name_for(username);
        match self.api.delete(&name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(err) => Err(classify(err, &name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_period_is_rejected_before_any_api_call() {
        let err = tka_types::duration::parse_validity_period("9m59s").unwrap_err();
        assert!(err.contains("minimum"));
    }

    #[test]
    fn not_found_is_distinguishable_from_other_errors() {
        let err = StoreError::NotFound("alice".to_string());
        assert!(err.is_not_found());
        let other = StoreError::InvalidPeriod("bad".to_string());
        assert!(!other.is_not_found());
    }
}
