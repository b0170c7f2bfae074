//! Shared Kubernetes utilities using kube-rs

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients
///
/// Watches are bounded server-side by their own timeout, so the client read
/// timeout must exceed the longest watch the caller opens.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Whether a kube error is the API server reporting a missing object
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Field selector matching exactly one object by name
pub fn name_field_selector(name: &str) -> String {
    format!("metadata.name={}", name)
}

/// Render a label map as an equality-based label selector
///
/// Keys are emitted in sorted order so the selector is stable.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check whether a string is a valid RFC 1123 DNS label
///
/// Pod, Secret and ServiceAccount names built from user input must pass this
/// before they reach the API server.
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "pods \"x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&err));

        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_name_field_selector() {
        assert_eq!(
            name_field_selector("configcheck-agent-abcde"),
            "metadata.name=configcheck-agent-abcde"
        );
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let labels = BTreeMap::from([
            ("b.io/x".to_string(), "2".to_string()),
            ("a.io/y".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a.io/y=1,b.io/x=2");
    }

    #[test]
    fn test_label_selector_empty() {
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_is_dns_label() {
        assert!(is_dns_label("vector-agent"));
        assert!(is_dns_label("a1"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("Vector"));
        assert!(!is_dns_label("-agent"));
        assert!(!is_dns_label("agent-"));
        assert!(!is_dns_label("agent.prod"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }
}
