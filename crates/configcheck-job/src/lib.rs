//! Ephemeral validation job controller
//!
//! Validates a candidate agent configuration by running the agent's own
//! `validate` command in a short-lived pod:
//! - ServiceAccount and payload Secret provisioned per run
//! - validator Pod submitted once and watched under a deadline
//! - validator output captured as the failure reason
//! - every run object torn down before the run returns

pub mod client;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod naming;
pub mod settings;
pub mod sweep;
pub mod teardown;
pub mod template;
pub mod watcher;

pub use client::{ClusterClient, KubeClusterClient};
pub use controller::{CheckRequest, ConfigCheck, RunReport, RunStatus, ValidationRun, Verdict};
pub use error::CheckError;
pub use settings::CheckSettings;
pub use sweep::{SweepSummary, Sweeper};
pub use template::{AgentSpec, CheckTemplate};
