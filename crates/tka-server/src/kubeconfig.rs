//! 4.E: the kubeconfig assembler. Mints a short-lived bearer token against
//! the managed cluster's `ServiceAccount` token-request subresource and
//! emits a client-config document shaped like the kubeconfig file format,
//! grounded on `other_examples/baa5517f_kube-rs-kube__kube-client-src-config-file_config.rs.rs`
//! (the `certificate-authority-data` base64 round trip in particular).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec, TokenRequestStatus};
use kube::api::PostParams;
use kube::{Api, Client};
use serde::Serialize;
use tka_types::{ClusterInfo, TkaError};

/// Lower bound on requested token lifetime (spec.md §4.E: `max(timeUntil(validUntil), 600)`).
pub const MIN_TOKEN_LIFETIME_SECS: i64 = 600;

pub const USER_PREFIX: &str = "tka-";
pub const CONTEXT_PREFIX: &str = "tka-";

#[derive(Debug, Clone, Serialize)]
pub struct ClientConfigDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    pub current_context: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterEntry {
    pub server: String,
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
    #[serde(rename = "insecure-skip-tls-verify", skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserEntry {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

/// Mints a token for the per-user `ServiceAccount` named `identity_name` via
/// the cluster API's token-request subresource (spec.md §4.E step 2: "token
/// minting is required; there is no legacy mounted-secret fallback").
pub async fn mint_token(
    client: &Client,
    namespace: &str,
    identity_name: &str,
    valid_until: DateTime<Utc>,
) -> Result<String, TkaError> {
    let lifetime = (valid_until - Utc::now()).num_seconds().max(MIN_TOKEN_LIFETIME_SECS);

    let request = TokenRequest {
        spec: TokenRequestSpec {
            expiration_seconds: Some(lifetime),
            ..Default::default()
        },
        status: None,
        ..Default::default()
    };

    let sa_api: Api<k8s_openapi::api::core::v1::ServiceAccount> =
        Api::namespaced(client.clone(), namespace);
    let body = serde_json::to_vec(&request)
        .map_err(|err| TkaError::internal_error(format!("failed to encode token request: {err}")))?;

    let response: TokenRequest = sa_api
        .create_subresource("token", identity_name, &PostParams::default(), body)
        .await
        .map_err(|err| TkaError::internal_error(format!("failed to mint cluster token: {err}")))?;

    response
        .status
        .map(|TokenRequestStatus { token, .. }| token)
        .ok_or_else(|| TkaError::internal_error("cluster API returned no token"))
}

/// Assembles the document described in spec.md §4.E step 3.
pub fn assemble(
    username: &str,
    cluster_info: &ClusterInfo,
    token: String,
) -> Result<ClientConfigDocument, TkaError> {
    let ca_data = STANDARD.decode(&cluster_info.ca_data).map_err(|err| {
        TkaError::internal_error(format!("cluster CA data is not valid base64: {err}"))
    })?;

    let cluster_name = "tka-cluster".to_string();
    let user_name = format!("{USER_PREFIX}{username}");
    let context_name = format!("{CONTEXT_PREFIX}{username}");

    Ok(ClientConfigDocument {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster_name.clone(),
            cluster: ClusterEntry {
                server: cluster_info.server_url.clone(),
                certificate_authority_data: STANDARD.encode(&ca_data),
                insecure_skip_tls_verify: cluster_info.insecure_skip_tls_verify,
            },
        }],
        users: vec![NamedUser {
            name: user_name.clone(),
            user: UserEntry { token },
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: ContextEntry {
                cluster: cluster_name,
                user: user_name,
            },
        }],
        current_context: context_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembled_document_binds_one_cluster_user_and_context() {
        let info = ClusterInfo::new("https://cluster.example.com:6443", STANDARD.encode("ca-bytes"));
        let doc = assemble("alice", &info, "sa-token".to_string()).unwrap();

        assert_eq!(doc.clusters.len(), 1);
        assert_eq!(doc.users.len(), 1);
        assert_eq!(doc.contexts.len(), 1);
        assert_eq!(doc.users[0].name, "tka-alice");
        assert_eq!(doc.contexts[0].name, "tka-alice");
        assert_eq!(doc.current_context, "tka-alice");
        assert_eq!(doc.users[0].user.token, "sa-token");
    }

    #[test]
    fn malformed_ca_data_is_rejected() {
        let info = ClusterInfo::new("https://cluster.example.com:6443", "not-base64!!");
        assert!(assemble("alice", &info, "sa-token".to_string()).is_err());
    }
}
