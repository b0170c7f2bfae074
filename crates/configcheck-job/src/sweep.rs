//! Reclaims run objects left behind by a crashed process
//!
//! A run tears down its own objects before returning, and no run outlives its
//! deadline by more than teardown. Anything carrying the configcheck labels
//! that is older than `deadline + sweep_grace` therefore belongs to nobody.
//! A finished pod younger than that may still be read by its run, so the
//! pod phase plays no part.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use configcheck_common::Error;

use crate::client::ClusterClient;
use crate::error::CheckError;
use crate::naming::common_label_selector;
use crate::settings::CheckSettings;
use crate::teardown::{Ledger, TeardownExecutor};

/// Counts of one sweep pass, over pods, Secrets and ServiceAccounts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Labeled objects found
    pub examined: usize,
    /// Objects torn down
    pub reclaimed: usize,
    /// Objects that may still belong to a live run
    pub skipped: usize,
    /// Objects whose removal failed
    pub failed: usize,
}

impl SweepSummary {
    fn tally(&mut self, kind: &str, name: &str, result: Result<(), String>) {
        match result {
            Ok(()) => {
                info!(kind = %kind, name = %name, "reclaimed orphaned run object");
                self.reclaimed += 1;
            }
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "failed to reclaim orphaned run object");
                self.failed += 1;
            }
        }
    }
}

/// Whether a labeled object is too old to belong to a live run
///
/// An object without a creation timestamp is never considered orphaned.
pub fn is_orphaned(meta: &ObjectMeta, now: DateTime<Utc>, max_age: Duration) -> bool {
    let Some(created) = meta.creation_timestamp.as_ref() else {
        return false;
    };
    now.signed_duration_since(created.0)
        .to_std()
        .map(|age| age >= max_age)
        .unwrap_or(false)
}

/// Finds and tears down orphaned run objects
pub struct Sweeper<'a> {
    client: &'a dyn ClusterClient,
    settings: &'a CheckSettings,
}

impl<'a> Sweeper<'a> {
    pub fn new(client: &'a dyn ClusterClient, settings: &'a CheckSettings) -> Self {
        Self { client, settings }
    }

    /// Sweep one namespace
    pub async fn sweep(&self, namespace: &str) -> Result<SweepSummary, CheckError> {
        self.sweep_at(namespace, Utc::now()).await
    }

    /// Sweep one namespace as seen at `now`
    ///
    /// Pods go first so their payload Secrets and accounts are removed with
    /// them; the Secret and ServiceAccount passes catch runs that crashed
    /// before their pod was submitted.
    pub async fn sweep_at(
        &self,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<SweepSummary, CheckError> {
        let selector = common_label_selector();
        let max_age = self.settings.deadline + self.settings.sweep_grace;
        let list_error = |kind: &'static str| {
            move |source: Error| CheckError::Sweep {
                kind,
                namespace: namespace.to_string(),
                source,
            }
        };
        let mut summary = SweepSummary::default();

        let pods = self
            .client
            .list_pods(namespace, &selector)
            .await
            .map_err(list_error("pods"))?;
        let teardown = TeardownExecutor::new(self.client);
        for pod in &pods {
            summary.examined += 1;
            let name = pod.name_any();
            if !is_orphaned(&pod.metadata, now, max_age) {
                debug!(pod = %name, "pod may belong to a live run, skipping");
                summary.skipped += 1;
                continue;
            }
            let result = teardown
                .execute(namespace, &Ledger::from_pod(pod))
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            summary.tally("Pod", &name, result);
        }

        let secrets = self
            .client
            .list_secrets(namespace, &selector)
            .await
            .map_err(list_error("secrets"))?;
        for secret in &secrets {
            summary.examined += 1;
            let name = secret.name_any();
            if !is_orphaned(&secret.metadata, now, max_age) {
                summary.skipped += 1;
                continue;
            }
            let result = self
                .client
                .delete_secret(namespace, &name)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            summary.tally("Secret", &name, result);
        }

        let accounts = self
            .client
            .list_service_accounts(namespace, &selector)
            .await
            .map_err(list_error("service accounts"))?;
        for account in &accounts {
            summary.examined += 1;
            let name = account.name_any();
            if !is_orphaned(&account.metadata, now, max_age) {
                summary.skipped += 1;
                continue;
            }
            let result = self
                .client
                .delete_service_account(namespace, &name)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            summary.tally("ServiceAccount", &name, result);
        }

        info!(
            namespace = %namespace,
            examined = summary.examined,
            reclaimed = summary.reclaimed,
            skipped = summary.skipped,
            failed = summary.failed,
            "sweep finished"
        );
        Ok(summary)
    }
}
