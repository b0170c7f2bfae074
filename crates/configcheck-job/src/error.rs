//! Validation-run error types
//!
//! Every infrastructure variant names the object it was acting on so a single
//! log line is enough to find the leaked or missing resource.

use std::time::Duration;

use configcheck_common::Error;

/// Why a validation run could not produce a verdict
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("failed to build {kind} for '{subject}': {source}")]
    Template {
        kind: &'static str,
        subject: String,
        source: Error,
    },

    #[error("failed to provision {kind} '{name}': {source}")]
    Provision {
        kind: &'static str,
        name: String,
        source: Error,
    },

    #[error("failed to submit validation pod '{pod}': {source}")]
    Submission { pod: String, source: Error },

    #[error("failed to watch validation pod '{pod}': {source}")]
    WatchSetup { pod: String, source: Error },

    #[error("failed to fetch output of validation pod '{pod}': {source}")]
    LogRetrieval { pod: String, source: Error },

    #[error("validation pod '{pod}' did not finish within {}s", deadline.as_secs())]
    Timeout { pod: String, deadline: Duration },

    #[error("watch on validation pod '{pod}' ended before a verdict: {reason}")]
    WatchLost { pod: String, reason: String },

    #[error("validation run was canceled by the caller")]
    Canceled,

    #[error("failed to list validation {kind} in '{namespace}': {source}")]
    Sweep {
        kind: &'static str,
        namespace: String,
        source: Error,
    },

    #[error("failed to tear down {kind} '{name}': {source}")]
    Teardown {
        kind: &'static str,
        name: String,
        source: Error,
    },
}

impl CheckError {
    /// Whether the caller may simply run the validation again
    ///
    /// A timeout or a lost watch says nothing about the configuration, so a
    /// fresh run can still reach a verdict. Cancellation is the caller's own
    /// decision and template errors need an input fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckError::Template { .. } => false,
            CheckError::Canceled => false,
            CheckError::Timeout { .. } | CheckError::WatchLost { .. } => true,
            CheckError::Provision { source, .. }
            | CheckError::Submission { source, .. }
            | CheckError::WatchSetup { source, .. }
            | CheckError::LogRetrieval { source, .. }
            | CheckError::Sweep { source, .. }
            | CheckError::Teardown { source, .. } => source.is_retryable(),
        }
    }

    /// Whether this is the deadline sentinel rather than a fault
    pub fn is_timeout(&self) -> bool {
        matches!(self, CheckError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_deadline() {
        let err = CheckError::Timeout {
            pod: "configcheck-agent-abcde".to_string(),
            deadline: Duration::from_secs(180),
        };
        assert_eq!(
            err.to_string(),
            "validation pod 'configcheck-agent-abcde' did not finish within 180s"
        );
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_canceled_is_not_retryable() {
        assert!(!CheckError::Canceled.is_retryable());
        assert!(!CheckError::Canceled.is_timeout());
    }

    #[test]
    fn test_infrastructure_errors_defer_to_source() {
        let err = CheckError::Provision {
            kind: "Secret",
            name: "configcheck-agent-abcde".to_string(),
            source: Error::validation("payload rejected"),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Secret"));

        let err = CheckError::Teardown {
            kind: "Pod",
            name: "configcheck-agent-abcde".to_string(),
            source: Error::internal("connection reset"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_watch_lost_reason_is_reported() {
        let err = CheckError::WatchLost {
            pod: "p".to_string(),
            reason: "event stream closed".to_string(),
        };
        assert!(err.to_string().contains("event stream closed"));
    }
}
