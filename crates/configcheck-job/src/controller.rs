//! Validation run controller
//!
//! Drives one run through provision, submit, watch and teardown:
//! - ServiceAccount and payload Secret are applied (create-or-update)
//! - the validator pod is created exactly once
//! - the outcome watcher resolves the run
//! - teardown always runs afterwards, whatever the pipeline returned

use std::fmt;
use std::sync::Arc;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ClusterClient;
use crate::error::CheckError;
use crate::naming::{RunNames, RunToken};
use crate::settings::CheckSettings;
use crate::teardown::{Ledger, TeardownExecutor, TeardownSummary};
use crate::template::{build_config_secret, build_pod, build_service_account, CheckTemplate};
use crate::watcher::{OutcomeWatcher, PodHandle, Resolution};

// =============================================================================
// Run model
// =============================================================================

/// Input of one validation run
#[derive(Clone, Debug)]
pub struct CheckRequest {
    /// Name of the agent whose configuration is validated
    pub subject: String,
    /// Namespace of the agent; every run object is created there
    pub namespace: String,
    /// Candidate configuration, opaque to the controller
    pub config: Vec<u8>,
    /// Validator pod inputs
    pub template: CheckTemplate,
}

/// Lifecycle of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Watching,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
    /// The watch ended before the pod reached a terminal phase
    Lost,
    /// An infrastructure error stopped the run before it had a verdict
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Watching)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Watching => "Watching",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::TimedOut => "TimedOut",
            RunStatus::Canceled => "Canceled",
            RunStatus::Lost => "Lost",
            RunStatus::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// State of one run: its names, status, and what it created
#[derive(Clone, Debug)]
pub struct ValidationRun {
    names: RunNames,
    status: RunStatus,
    ledger: Ledger,
}

impl ValidationRun {
    fn new(names: RunNames) -> Self {
        Self {
            names,
            status: RunStatus::Pending,
            ledger: Ledger::new(),
        }
    }

    pub fn names(&self) -> &RunNames {
        &self.names
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Move to `next`; a terminal status is never left again
    fn advance(&mut self, next: RunStatus) {
        if self.status.is_terminal() {
            warn!(
                run = %self.names.token,
                from = %self.status,
                to = %next,
                "ignoring transition out of terminal status"
            );
            return;
        }
        debug!(run = %self.names.token, from = %self.status, to = %next, "run status changed");
        self.status = next;
    }
}

/// Validation verdict of a completed run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The validator accepted the configuration
    Passed,
    /// The validator rejected the configuration with this output
    Failed { reason: String },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Human-readable reason; empty when the configuration passed
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Passed => "",
            Verdict::Failed { reason } => reason,
        }
    }
}

/// Everything a run produced, including the teardown result
#[derive(Debug)]
pub struct RunReport {
    pub run: ValidationRun,
    pub outcome: Result<Verdict, CheckError>,
    pub teardown: Result<TeardownSummary, CheckError>,
}

impl RunReport {
    /// The run's outcome; a teardown failure never replaces it
    pub fn into_result(self) -> Result<Verdict, CheckError> {
        self.outcome
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Runs ephemeral validator pods against candidate configurations
pub struct ConfigCheck {
    client: Arc<dyn ClusterClient>,
    settings: CheckSettings,
}

impl ConfigCheck {
    pub fn new(client: Arc<dyn ClusterClient>, settings: CheckSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// Validate a configuration
    ///
    /// `Ok` carries the verdict; `Err` means the configuration was not
    /// validated. All run objects are removed before this returns.
    #[instrument(
        skip(self, request, cancel),
        fields(subject = %request.subject, namespace = %request.namespace)
    )]
    pub async fn run(
        &self,
        request: CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<Verdict, CheckError> {
        self.run_detailed(request, cancel).await?.into_result()
    }

    /// Validate a configuration, reporting outcome and teardown separately
    ///
    /// Returns `Err` only when the run objects could not even be named;
    /// nothing has been created in that case.
    pub async fn run_detailed(
        &self,
        request: CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport, CheckError> {
        let names = RunNames::new(&request.subject, &request.namespace, RunToken::generate())
            .map_err(|source| CheckError::Template {
                kind: "run names",
                subject: request.subject.clone(),
                source,
            })?;
        let mut run = ValidationRun::new(names);
        info!(run = %run.names.token, pod = %run.names.pod, "starting config check");

        let outcome = self.execute(&mut run, &request, cancel).await;
        if outcome.is_err() && !run.status.is_terminal() {
            run.advance(RunStatus::Aborted);
        }

        let teardown = TeardownExecutor::new(self.client.as_ref())
            .execute(&run.names.namespace, &run.ledger)
            .await;
        if let Err(e) = &teardown {
            error!(run = %run.names.token, error = %e, "teardown of validation run failed");
        }

        match &outcome {
            Ok(verdict) => info!(
                run = %run.names.token,
                status = %run.status,
                passed = verdict.is_passed(),
                "config check finished"
            ),
            Err(e) => warn!(
                run = %run.names.token,
                status = %run.status,
                error = %e,
                "config check could not complete"
            ),
        }

        Ok(RunReport {
            run,
            outcome,
            teardown,
        })
    }

    /// Provision, submit and watch
    ///
    /// Each object is recorded in the ledger before its write is sent. A
    /// failed or timed out write may still have taken effect on the server,
    /// and teardown tolerates objects that never appeared.
    async fn execute(
        &self,
        run: &mut ValidationRun,
        request: &CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<Verdict, CheckError> {
        if cancel.is_cancelled() {
            run.advance(RunStatus::Canceled);
            return Err(CheckError::Canceled);
        }

        let account = build_service_account(&run.names);
        run.ledger.record_service_account(account.name_any());
        self.client
            .apply_service_account(&account)
            .await
            .map_err(|source| CheckError::Provision {
                kind: "ServiceAccount",
                name: run.names.service_account.clone(),
                source,
            })?;

        let secret = build_config_secret(&run.names, &request.config);
        run.ledger.record_secret(secret.name_any());
        self.client
            .apply_secret(&secret)
            .await
            .map_err(|source| CheckError::Provision {
                kind: "Secret",
                name: run.names.config_secret.clone(),
                source,
            })?;
        debug!(run = %run.names.token, "provisioned run objects");

        let pod = build_pod(&run.names, &request.template);
        run.ledger.record_pod(pod.name_any());
        let created = self
            .client
            .create_pod(&pod)
            .await
            .map_err(|source| CheckError::Submission {
                pod: run.names.pod.clone(),
                source,
            })?;
        let handle = PodHandle::from_created(&created);
        info!(run = %run.names.token, pod = %handle.name, "submitted validator pod");

        run.advance(RunStatus::Watching);
        let resolution = OutcomeWatcher::new(self.client.as_ref(), &self.settings)
            .watch(&handle, cancel)
            .await?;

        match resolution {
            Resolution::Succeeded => {
                run.advance(RunStatus::Succeeded);
                Ok(Verdict::Passed)
            }
            Resolution::Failed { reason } => {
                run.advance(RunStatus::Failed);
                Ok(Verdict::Failed { reason })
            }
            Resolution::TimedOut { deadline } => {
                run.advance(RunStatus::TimedOut);
                Err(CheckError::Timeout {
                    pod: handle.name,
                    deadline,
                })
            }
            Resolution::Canceled => {
                run.advance(RunStatus::Canceled);
                Err(CheckError::Canceled)
            }
            Resolution::Lost { reason } => {
                run.advance(RunStatus::Lost);
                Err(CheckError::WatchLost {
                    pod: handle.name,
                    reason,
                })
            }
        }
    }
}
