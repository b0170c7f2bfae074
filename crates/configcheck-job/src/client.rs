//! Cluster operations used by a validation run
//!
//! The trait keeps the controller testable with a mocked API server while the
//! production implementation talks to Kubernetes through kube-rs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Pod, Secret, ServiceAccount};
use kube::api::{
    Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams, WatchEvent,
    WatchParams,
};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use configcheck_common::kube_utils::{is_not_found, name_field_selector};
use configcheck_common::{Error, DEFAULT_FIELD_MANAGER};

/// Change events for one pod; dropping the stream closes the watch
pub type PodEventStream = BoxStream<'static, Result<WatchEvent<Pod>, Error>>;

/// Server-side bound on a single watch request, in seconds
///
/// The API server rejects watch timeouts above 295 seconds.
pub const WATCH_TIMEOUT_SECS: u32 = 290;

/// Trait abstracting the Kubernetes operations of a validation run
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update a ServiceAccount (server-side apply)
    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<(), Error>;

    /// Create or update a Secret (server-side apply)
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Create a pod, returning the stored object
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Get a pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Get a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;

    /// List Secrets matching a label selector
    async fn list_secrets(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Secret>, Error>;

    /// List ServiceAccounts matching a label selector
    async fn list_service_accounts(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceAccount>, Error>;

    /// Delete a pod; `Ok(false)` if it was already gone
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Delete a Secret; `Ok(false)` if it was already gone
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Delete a ServiceAccount; `Ok(false)` if it was already gone
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Watch a single pod by name, starting after `resource_version`
    async fn watch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, Error>;

    /// Fetch the captured output of one container of a pod
    async fn pod_logs(&self, namespace: &str, name: &str, container: &str)
        -> Result<String, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self::with_field_manager(client, DEFAULT_FIELD_MANAGER)
    }

    /// Create a client that applies objects under a custom field manager
    pub fn with_field_manager(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }
}

/// Map a delete result so that "already gone" is not an error
fn tolerate_absent<T>(result: Result<T, kube::Error>) -> Result<bool, Error> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Map a get result so that "absent" becomes `None`
fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn namespace_of<K: ResourceExt>(obj: &K, kind: &str) -> Result<String, Error> {
    obj.namespace().ok_or_else(|| {
        Error::validation_for(obj.name_any(), format!("{} has no namespace", kind))
    })
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply_service_account(&self, account: &ServiceAccount) -> Result<(), Error> {
        let namespace = namespace_of(account, "ServiceAccount")?;
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &namespace);
        let name = account.name_any();
        debug!(name = %name, namespace = %namespace, "applying ServiceAccount");
        api.patch(&name, &self.apply_params(), &Patch::Apply(account))
            .await?;
        Ok(())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = namespace_of(secret, "Secret")?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let name = secret.name_any();
        debug!(name = %name, namespace = %namespace, "applying Secret");
        api.patch(&name, &self.apply_params(), &Patch::Apply(secret))
            .await?;
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let namespace = namespace_of(pod, "Pod")?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let created = api.create(&PostParams::default(), pod).await?;
        Ok(created)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secrets = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(secrets.items)
    }

    async fn list_service_accounts(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let accounts = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(accounts.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        tolerate_absent(api.delete(name, &DeleteParams::default()).await)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        tolerate_absent(api.delete(name, &DeleteParams::default()).await)
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        tolerate_absent(api.delete(name, &DeleteParams::default()).await)
    }

    async fn watch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = WatchParams::default()
            .fields(&name_field_selector(name))
            .timeout(WATCH_TIMEOUT_SECS);
        let stream = api.watch(&params, resource_version).await?;
        Ok(stream.map_err(Error::from).boxed())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
    ) -> Result<String, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        let logs = api.logs(name, &params).await?;
        Ok(logs)
    }
}
