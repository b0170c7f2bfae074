//! Outcome watcher for a submitted validator pod
//!
//! Resolves a run to exactly one terminal state by racing three sources:
//! - change events of the single tracked pod
//! - the run deadline, started when the watch opens
//! - the caller's cancellation token
//!
//! The first source to resolve wins. The watch connection is closed on every
//! exit path, including errors while fetching diagnostics.

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::WatchEvent;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ClusterClient, PodEventStream};
use crate::diagnostics::extract_failure_reason;
use crate::error::CheckError;
use crate::settings::CheckSettings;

/// Identity of a submitted pod, as returned by the API server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodHandle {
    pub namespace: String,
    pub name: String,
    /// Resource version of the created object; the watch starts after it
    pub resource_version: String,
}

impl PodHandle {
    /// Build a handle from the object returned by a create call
    pub fn from_created(pod: &Pod) -> Self {
        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            resource_version: pod.resource_version().unwrap_or_default(),
        }
    }
}

/// Lifecycle phase reported in a pod's status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Phase of a pod snapshot; a missing status counts as `Pending`
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            None | Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            Some(_) => PodPhase::Unknown,
        }
    }
}

/// What a single watch event means for the run
#[derive(Debug)]
pub enum Step {
    /// Not terminal, keep waiting
    Continue,
    /// The validator exited successfully
    Succeeded,
    /// The validator failed; carries the snapshot to extract output from
    Failed(Box<Pod>),
    /// The server ended the watch with an error event
    Lost(String),
}

/// Change kind of a watch event carrying an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
    Added,
    Modified,
    Deleted,
}

/// Classify one watch event of the tracked pod
///
/// Only status modifications of the tracked pod can be terminal. A pod whose
/// deletion is already in flight is not a verdict either way.
pub fn classify(event: WatchEvent<Pod>, tracked: &str) -> Step {
    let (change, pod) = match event {
        WatchEvent::Added(pod) => (Change::Added, pod),
        WatchEvent::Modified(pod) => (Change::Modified, pod),
        WatchEvent::Deleted(pod) => (Change::Deleted, pod),
        WatchEvent::Bookmark(_) => return Step::Continue,
        WatchEvent::Error(e) => {
            return Step::Lost(format!("{} (code {})", e.message, e.code));
        }
    };

    if pod.name_any() != tracked {
        return Step::Continue;
    }
    let deleting = pod.metadata.deletion_timestamp.is_some();
    match (change, deleting, PodPhase::of(&pod)) {
        (Change::Modified, false, PodPhase::Succeeded) => Step::Succeeded,
        (Change::Modified, false, PodPhase::Failed) => Step::Failed(Box::new(pod)),
        (Change::Modified, _, _) | (Change::Added | Change::Deleted, _, _) => Step::Continue,
    }
}

/// Terminal state of a watch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The pod reached `Succeeded`
    Succeeded,
    /// The pod reached `Failed`; carries the validator output
    Failed { reason: String },
    /// No terminal phase before the deadline
    TimedOut { deadline: Duration },
    /// The caller canceled the run
    Canceled,
    /// The event stream ended or errored before a terminal phase
    Lost { reason: String },
}

/// Open event subscription to one pod
struct Subscription {
    pod: String,
    events: Option<PodEventStream>,
    seen: usize,
}

impl Subscription {
    fn new(pod: &str, events: PodEventStream) -> Self {
        Self {
            pod: pod.to_string(),
            events: Some(events),
            seen: 0,
        }
    }

    async fn next(&mut self) -> Option<Result<WatchEvent<Pod>, configcheck_common::Error>> {
        let event = self.events.as_mut()?.next().await;
        if event.is_some() {
            self.seen += 1;
        }
        event
    }

    fn close(&mut self) {
        if self.events.take().is_some() {
            debug!(pod = %self.pod, events = self.seen, "closed pod watch");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Watches one submitted pod until it resolves
pub struct OutcomeWatcher<'a> {
    client: &'a dyn ClusterClient,
    settings: &'a CheckSettings,
}

impl<'a> OutcomeWatcher<'a> {
    /// Create a watcher using the given client and settings
    pub fn new(client: &'a dyn ClusterClient, settings: &'a CheckSettings) -> Self {
        Self { client, settings }
    }

    /// Wait for the pod to resolve
    ///
    /// Returns `Err` only when the watch cannot be opened or when the output
    /// of a failed pod cannot be fetched. Fetching that output is still
    /// bounded by the deadline and the token.
    pub async fn watch(
        &self,
        handle: &PodHandle,
        cancel: &CancellationToken,
    ) -> Result<Resolution, CheckError> {
        let events = self
            .client
            .watch_pod(&handle.namespace, &handle.name, &handle.resource_version)
            .await
            .map_err(|source| CheckError::WatchSetup {
                pod: handle.name.clone(),
                source,
            })?;
        let mut subscription = Subscription::new(&handle.name, events);

        let deadline = tokio::time::sleep(self.settings.deadline);
        tokio::pin!(deadline);

        debug!(pod = %handle.name, deadline_secs = self.settings.deadline.as_secs(), "watching validator pod");

        let failed = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    subscription.close();
                    return Ok(self.canceled(handle));
                }
                _ = &mut deadline => {
                    subscription.close();
                    return Ok(self.timed_out(handle));
                }
                event = subscription.next() => {
                    let step = match event {
                        Some(Ok(event)) => classify(event, &handle.name),
                        Some(Err(e)) => Step::Lost(e.to_string()),
                        None => Step::Lost("event stream closed".to_string()),
                    };
                    match step {
                        Step::Continue => {
                            trace!(pod = %handle.name, "non-terminal pod event");
                        }
                        Step::Succeeded => {
                            subscription.close();
                            info!(pod = %handle.name, "config check completed successfully");
                            return Ok(Resolution::Succeeded);
                        }
                        Step::Failed(pod) => {
                            subscription.close();
                            info!(pod = %handle.name, "config check failed");
                            break pod;
                        }
                        Step::Lost(reason) => {
                            subscription.close();
                            warn!(pod = %handle.name, reason = %reason, "pod watch ended without a verdict");
                            return Ok(Resolution::Lost { reason });
                        }
                    }
                }
            }
        };

        // Output retrieval stays bound by the same deadline and token
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Ok(self.canceled(handle)),
            _ = &mut deadline => Ok(self.timed_out(handle)),
            reason = extract_failure_reason(
                self.client,
                &failed,
                &self.settings.diagnostics_container,
            ) => Ok(Resolution::Failed { reason: reason? }),
        }
    }

    fn canceled(&self, handle: &PodHandle) -> Resolution {
        info!(pod = %handle.name, "validation canceled by caller");
        Resolution::Canceled
    }

    fn timed_out(&self, handle: &PodHandle) -> Resolution {
        warn!(
            pod = %handle.name,
            deadline_secs = self.settings.deadline.as_secs(),
            "validation timed out"
        );
        Resolution::TimedOut {
            deadline: self.settings.deadline,
        }
    }
}
