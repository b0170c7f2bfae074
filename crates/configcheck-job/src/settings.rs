//! Process-level settings of the validation controller

use std::time::Duration;

use configcheck_common::{Error, DEFAULT_FIELD_MANAGER};

use crate::client::WATCH_TIMEOUT_SECS;
use crate::template::CONTAINER_NAME;

/// How long a run waits for a verdict, measured from watch start
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(180);

/// Extra age past the deadline before the sweeper reclaims a non-terminal pod
pub const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(60);

/// Settings shared by every run of one controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckSettings {
    /// Wall-clock bound on the watch phase of a run
    pub deadline: Duration,
    /// Container whose output becomes the failure reason
    pub diagnostics_container: String,
    /// Age past `deadline` after which the sweeper reclaims a running pod
    pub sweep_grace: Duration,
    /// Field manager owning the applied ServiceAccount and Secret
    pub field_manager: String,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            diagnostics_container: CONTAINER_NAME.to_string(),
            sweep_grace: DEFAULT_SWEEP_GRACE,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl CheckSettings {
    /// Settings with a custom deadline
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Default::default()
        }
    }

    /// Reject settings a run could never honor
    ///
    /// A single watch request is cut off by the API server, so the deadline
    /// has to fit inside one.
    pub fn validate(&self) -> Result<(), Error> {
        if self.deadline.is_zero() {
            return Err(Error::validation("deadline must be greater than zero"));
        }
        if self.deadline >= Duration::from_secs(u64::from(WATCH_TIMEOUT_SECS)) {
            return Err(Error::validation(format!(
                "deadline of {}s must be below the {}s watch timeout",
                self.deadline.as_secs(),
                WATCH_TIMEOUT_SECS
            )));
        }
        if self.diagnostics_container.is_empty() {
            return Err(Error::validation("diagnostics container must not be empty"));
        }
        if self.field_manager.is_empty() {
            return Err(Error::validation("field manager must not be empty"));
        }
        Ok(())
    }
}
