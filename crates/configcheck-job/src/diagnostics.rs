//! Failure reason extraction from a failed validator pod

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::CheckError;

/// Name of the first container in the pod spec
pub fn primary_container(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .map(|c| c.name.as_str())
}

/// Fetch the captured output of a failed pod's primary container
///
/// The text is passed through verbatim. A fetch failure is returned rather
/// than an empty reason, which would misreport why validation failed.
pub async fn extract_failure_reason(
    client: &dyn ClusterClient,
    pod: &Pod,
    fallback_container: &str,
) -> Result<String, CheckError> {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();
    let container = primary_container(pod).unwrap_or(fallback_container);

    debug!(pod = %name, container = %container, "fetching validator output");
    client
        .pod_logs(&namespace, &name, container)
        .await
        .map_err(|source| CheckError::LogRetrieval { pod: name, source })
}
