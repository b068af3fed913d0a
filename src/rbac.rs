//! Default service identity provisioning
//!
//! Game-server pods run under the `carrier-sdk` service account unless their
//! template names another one. Before such an object is admitted the webhook
//! makes sure the account exists in the target namespace, bound to the
//! cluster-wide `carrier-sdk` role the SDK sidecar needs.
//!
//! Lookups go through reflector caches; creates go to the API server. A create
//! that loses a race with another replica (409 Conflict) counts as success.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result, CARRIER_GROUP, DEFAULT_SERVICE_ACCOUNT};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Outcome of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    /// The object was created by this call
    Created,
    /// Another writer created the object first
    AlreadyExists,
}

/// Access to service accounts, role bindings and cluster roles
///
/// This trait allows mocking the Kubernetes client in tests while using
/// reflector caches and the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessControlBackend: Send + Sync {
    /// Whether the service account `name` exists in `namespace`
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Whether the role binding `name` exists in `namespace`
    async fn role_binding_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Create a namespaced service account
    async fn create_service_account(&self, account: &ServiceAccount) -> Result<Created>;

    /// Create a namespaced role binding
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<Created>;

    /// Create a cluster role
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<Created>;
}

// =============================================================================
// Provisioner
// =============================================================================

/// Ensures the default service identity exists where it is needed
#[derive(Clone)]
pub struct Provisioner {
    backend: Arc<dyn AccessControlBackend>,
}

impl Provisioner {
    /// Create a provisioner on top of the given backend
    pub fn new(backend: Arc<dyn AccessControlBackend>) -> Self {
        Self { backend }
    }

    /// Make sure the default service account and its binding exist in `namespace`
    ///
    /// Does nothing when `requested` names a service account other than the
    /// default one; the owner of a custom account provisions it themselves.
    pub async fn ensure_service_identity(
        &self,
        namespace: &str,
        requested: Option<&str>,
    ) -> Result<()> {
        let requested = requested.unwrap_or_default();
        if !requested.is_empty() && requested != DEFAULT_SERVICE_ACCOUNT {
            debug!(namespace, service_account = requested, "custom service account, skipping provisioning");
            return Ok(());
        }

        if !self
            .backend
            .service_account_exists(namespace, DEFAULT_SERVICE_ACCOUNT)
            .await?
        {
            let created = self
                .backend
                .create_service_account(&default_service_account(namespace))
                .await?;
            log_created("serviceaccount", namespace, created);
        }

        if !self
            .backend
            .role_binding_exists(namespace, DEFAULT_SERVICE_ACCOUNT)
            .await?
        {
            let created = self
                .backend
                .create_role_binding(&default_role_binding(namespace))
                .await?;
            log_created("rolebinding", namespace, created);
        }
        Ok(())
    }

    /// Create the cluster role the default role bindings reference
    pub async fn ensure_cluster_role(&self) -> Result<()> {
        let created = self
            .backend
            .create_cluster_role(&default_cluster_role())
            .await?;
        log_created("clusterrole", "", created);
        Ok(())
    }
}

fn log_created(kind: &str, namespace: &str, created: Created) {
    match created {
        Created::Created => info!(kind, namespace, name = DEFAULT_SERVICE_ACCOUNT, "created"),
        Created::AlreadyExists => {
            debug!(kind, namespace, name = DEFAULT_SERVICE_ACCOUNT, "already exists")
        }
    }
}

// =============================================================================
// Object builders
// =============================================================================

/// The `carrier-sdk` service account in `namespace`
pub fn default_service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(DEFAULT_SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Binds the `carrier-sdk` cluster role to the `carrier-sdk` account in `namespace`
pub fn default_role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(DEFAULT_SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: DEFAULT_SERVICE_ACCOUNT.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: DEFAULT_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Permissions the SDK sidecar needs: emit events and manage its GameServer
pub fn default_cluster_role() -> ClusterRole {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(DEFAULT_SERVICE_ACCOUNT.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&["events"])),
                verbs: strings(&["create", "patch"]),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&[CARRIER_GROUP])),
                resources: Some(strings(&[
                    "gameservers",
                    "gameservers/status",
                    "webhookconfigurations",
                ])),
                verbs: strings(&["*"]),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

// =============================================================================
// Kubernetes backend
// =============================================================================

/// Backend reading from reflector caches and writing through the API server
#[derive(Clone)]
pub struct KubeAccessControl {
    client: Client,
    service_accounts: Store<ServiceAccount>,
    role_bindings: Store<RoleBinding>,
}

impl KubeAccessControl {
    /// Start cluster-wide reflectors for service accounts and role bindings
    ///
    /// The watch streams run on background tasks for the life of the process.
    /// Call [`KubeAccessControl::wait_until_ready`] before serving requests.
    pub fn start(client: Client) -> Self {
        let service_accounts = spawn_reflector::<ServiceAccount>(client.clone());
        let role_bindings = spawn_reflector::<RoleBinding>(client.clone());
        Self {
            client,
            service_accounts,
            role_bindings,
        }
    }

    /// Wait for the initial list of both caches
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.service_accounts
            .wait_until_ready()
            .await
            .map_err(|e| Error::provisioning("serviceaccounts", "", e.to_string()))?;
        self.role_bindings
            .wait_until_ready()
            .await
            .map_err(|e| Error::provisioning("rolebindings", "", e.to_string()))?;
        info!("service account and role binding caches synced");
        Ok(())
    }
}

fn spawn_reflector<K>(client: Client) -> Store<K>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = watcher(Api::<K>::all(client), watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .for_each(|event| {
            if let Err(e) = event {
                debug!(kind = %K::kind(&()), error = %e, "watch error");
            }
            futures::future::ready(())
        });
    tokio::spawn(stream);
    reader
}

/// Map a create result, treating 409 Conflict as success
fn created<K>(
    result: std::result::Result<K, kube::Error>,
    resource: &str,
    namespace: &str,
) -> Result<Created> {
    match result {
        Ok(_) => Ok(Created::Created),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Created::AlreadyExists),
        Err(e) => Err(Error::provisioning(resource, namespace, e.to_string())),
    }
}

#[async_trait]
impl AccessControlBackend for KubeAccessControl {
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = ObjectRef::new(name).within(namespace);
        Ok(self.service_accounts.get(&key).is_some())
    }

    async fn role_binding_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = ObjectRef::new(name).within(namespace);
        Ok(self.role_bindings.get(&key).is_some())
    }

    async fn create_service_account(&self, account: &ServiceAccount) -> Result<Created> {
        let namespace = account.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let result = api.create(&PostParams::default(), account).await;
        created(result, "serviceaccount/carrier-sdk", namespace)
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<Created> {
        let namespace = binding.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let result = api.create(&PostParams::default(), binding).await;
        created(result, "rolebinding/carrier-sdk", namespace)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<Created> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        let result = api.create(&PostParams::default(), role).await;
        created(result, "clusterrole/carrier-sdk", "")
    }
}
