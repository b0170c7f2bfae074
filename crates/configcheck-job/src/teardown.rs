//! Teardown of the transient objects of a validation run
//!
//! Teardown is driven by a [`Ledger`] of what the run actually created, read
//! together with the live pod's payload volumes. Every step tolerates objects
//! that are already gone, so running it twice is harmless.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use crate::error::CheckError;
use crate::template::payload_secret_names;

/// Objects a run created, in creation order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    service_account: Option<String>,
    secret: Option<String>,
    pod: Option<String>,
}

impl Ledger {
    /// Empty ledger for a run that has not created anything yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger of a run from its surviving pod
    ///
    /// The ServiceAccount is only claimed when it carries the pod's own name;
    /// a shared account such as `default` is never run-owned.
    pub fn from_pod(pod: &Pod) -> Self {
        let name = pod.name_any();
        let service_account = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.clone())
            .filter(|sa| *sa == name);
        Self {
            service_account,
            secret: None,
            pod: Some(name),
        }
    }

    pub fn record_service_account(&mut self, name: impl Into<String>) {
        self.service_account = Some(name.into());
    }

    pub fn record_secret(&mut self, name: impl Into<String>) {
        self.secret = Some(name.into());
    }

    pub fn record_pod(&mut self, name: impl Into<String>) {
        self.pod = Some(name.into());
    }

    pub fn service_account(&self) -> Option<&str> {
        self.service_account.as_deref()
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn pod(&self) -> Option<&str> {
        self.pod.as_deref()
    }

    /// Whether the run created nothing
    pub fn is_empty(&self) -> bool {
        self.service_account.is_none() && self.secret.is_none() && self.pod.is_none()
    }
}

/// Counts of one teardown pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Objects this pass deleted
    pub deleted: usize,
    /// Objects that were already gone
    pub absent: usize,
}

impl TeardownSummary {
    fn record(&mut self, removed: bool) {
        if removed {
            self.deleted += 1;
        } else {
            self.absent += 1;
        }
    }
}

/// Removes every object recorded in a run's ledger
pub struct TeardownExecutor<'a> {
    client: &'a dyn ClusterClient,
}

impl<'a> TeardownExecutor<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> Self {
        Self { client }
    }

    /// Delete the run's objects
    ///
    /// Every step is attempted even after an earlier one failed; the first
    /// failure is returned once all steps ran.
    pub async fn execute(
        &self,
        namespace: &str,
        ledger: &Ledger,
    ) -> Result<TeardownSummary, CheckError> {
        let mut summary = TeardownSummary::default();
        if ledger.is_empty() {
            debug!(namespace = %namespace, "nothing to tear down");
            return Ok(summary);
        }

        let mut first_error: Option<CheckError> = None;
        let mut keep = |result: Result<(), CheckError>| {
            if let Err(e) = result {
                warn!(error = %e, "teardown step failed");
                first_error.get_or_insert(e);
            }
        };

        // Live pod, if any; its volumes name the payload Secrets to remove
        let mut pod_present = false;
        let mut secrets: Vec<String> = Vec::new();
        if let Some(pod_name) = ledger.pod() {
            match self.client.get_pod(namespace, pod_name).await {
                Ok(Some(pod)) => {
                    pod_present = true;
                    secrets = payload_secret_names(&pod);
                }
                Ok(None) => {
                    debug!(pod = %pod_name, "validation pod already gone");
                    summary.record(false);
                }
                Err(source) => {
                    keep(Err(CheckError::Teardown {
                        kind: "Pod",
                        name: pod_name.to_string(),
                        source,
                    }));
                    // Unknown state; still attempt the delete below
                    pod_present = true;
                }
            }
        }
        if let Some(secret) = ledger.secret() {
            if !secrets.iter().any(|s| s == secret) {
                secrets.push(secret.to_string());
            }
        }

        for secret in &secrets {
            keep(self.remove_secret(namespace, secret, &mut summary).await);
        }

        if let (true, Some(pod_name)) = (pod_present, ledger.pod()) {
            let result = self.client.delete_pod(namespace, pod_name).await;
            keep(match result {
                Ok(removed) => {
                    summary.record(removed);
                    Ok(())
                }
                Err(source) => Err(CheckError::Teardown {
                    kind: "Pod",
                    name: pod_name.to_string(),
                    source,
                }),
            });
        }

        if let Some(account) = ledger.service_account() {
            let result = self.client.delete_service_account(namespace, account).await;
            keep(match result {
                Ok(removed) => {
                    summary.record(removed);
                    Ok(())
                }
                Err(source) => Err(CheckError::Teardown {
                    kind: "ServiceAccount",
                    name: account.to_string(),
                    source,
                }),
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    namespace = %namespace,
                    deleted = summary.deleted,
                    absent = summary.absent,
                    "tore down validation run"
                );
                Ok(summary)
            }
        }
    }

    async fn remove_secret(
        &self,
        namespace: &str,
        name: &str,
        summary: &mut TeardownSummary,
    ) -> Result<(), CheckError> {
        let to_error = |source| CheckError::Teardown {
            kind: "Secret",
            name: name.to_string(),
            source,
        };
        match self.client.get_secret(namespace, name).await.map_err(to_error)? {
            Some(_) => {
                let removed = self
                    .client
                    .delete_secret(namespace, name)
                    .await
                    .map_err(to_error)?;
                summary.record(removed);
            }
            None => {
                debug!(secret = %name, "payload secret already gone");
                summary.record(false);
            }
        }
        Ok(())
    }
}
