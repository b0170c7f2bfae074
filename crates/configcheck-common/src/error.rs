//! Error types shared by configcheck crates
//!
//! Errors carry enough context (resource kind, name, operation) to be useful
//! in a single structured log line without the caller re-wrapping them.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster-facing operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid input that no retry can fix
    #[error("validation error for {subject}: {message}")]
    Validation {
        /// Name of the subject with invalid input
        subject: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "watch")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            subject: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named subject
    pub fn validation_for(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors need an input fix. Kubernetes
    /// errors are retryable unless the server rejected the request (4xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from api server", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: the caller decides whether to retry a failed run
    #[test]
    fn story_error_retryability() {
        // Server rejected the request: a retry would be rejected again
        assert!(!api_error(403, "Forbidden").is_retryable());
        assert!(!api_error(422, "Invalid").is_retryable());

        // Server-side trouble may clear up
        assert!(api_error(503, "ServiceUnavailable").is_retryable());

        assert!(!Error::validation("bad subject name").is_retryable());
        assert!(Error::internal("stream reset").is_retryable());
    }

    #[test]
    fn test_validation_for_includes_subject() {
        let err = Error::validation_for("agent-a", "name too long");
        assert!(err.to_string().contains("agent-a"));
        assert!(err.to_string().contains("name too long"));
    }

    #[test]
    fn test_internal_error_context() {
        let err = Error::internal_with_context("create_client", "no kubeconfig");
        assert_eq!(
            err.to_string(),
            "internal error [create_client]: no kubeconfig"
        );

        let err = Error::internal("stream closed");
        assert!(err.to_string().contains(&format!("[{}]", UNKNOWN_CONTEXT)));
    }

    /// Story: a 404 surfaced through the shared error stays recognizable
    #[test]
    fn story_wrapped_not_found_is_not_retried_as_server_trouble() {
        let err = api_error(404, "NotFound");
        assert!(matches!(
            &err,
            Error::Kube { source } if crate::kube_utils::is_not_found(source)
        ));
        assert!(!err.is_retryable());
    }
}
