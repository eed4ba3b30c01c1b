//! Errors raised by Atlas services, the executor and the temp-user manager.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Service Errors
// =============================================================================

/// How a service classifies a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    NotFound,
    /// The resource already exists, or a concurrent change collided.
    Conflict,
    /// Network failure or 5xx; worth retrying.
    Transient,
    /// The request was rejected (4xx); retrying cannot help.
    Validation,
    /// Credentials missing, expired or insufficient.
    AuthN,
    RateLimit,
    Fatal,
    /// The call exceeded its deadline.
    Timeout,
    Cancelled,
}

impl ServiceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::NotFound => "not-found",
            ServiceErrorKind::Conflict => "conflict",
            ServiceErrorKind::Transient => "transient",
            ServiceErrorKind::Validation => "validation",
            ServiceErrorKind::AuthN => "authn",
            ServiceErrorKind::RateLimit => "rate-limit",
            ServiceErrorKind::Fatal => "fatal",
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified error from an Atlas service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
    /// Server-suggested wait before retrying.
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Conflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Transient, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Validation, message)
    }

    pub fn authn(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::AuthN, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            kind: ServiceErrorKind::RateLimit,
            message: "rate limit exceeded".into(),
            retry_after,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Fatal, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ServiceErrorKind::Timeout,
            format!("no response within {}", humanize(after)),
        )
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Cancelled, reason)
    }

    /// Transient, rate-limit and timeout errors are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ServiceErrorKind::Transient | ServiceErrorKind::RateLimit | ServiceErrorKind::Timeout
        )
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            ServiceErrorKind::NotFound => "MATLAS-EXEC-001",
            ServiceErrorKind::Conflict => "MATLAS-EXEC-002",
            ServiceErrorKind::Transient => "MATLAS-EXEC-003",
            ServiceErrorKind::Validation => "MATLAS-EXEC-004",
            ServiceErrorKind::AuthN => "MATLAS-EXEC-005",
            ServiceErrorKind::RateLimit => "MATLAS-EXEC-006",
            ServiceErrorKind::Fatal => "MATLAS-EXEC-007",
            ServiceErrorKind::Timeout => "MATLAS-EXEC-008",
            ServiceErrorKind::Cancelled => "MATLAS-EXEC-009",
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self.kind {
            ServiceErrorKind::Conflict => {
                Some("the resource exists with different settings; run discover and reconcile the manifest")
            }
            ServiceErrorKind::Validation => Some("fix the resource spec and re-run apply"),
            ServiceErrorKind::AuthN => Some("check the Atlas API key and its project role"),
            ServiceErrorKind::Transient | ServiceErrorKind::RateLimit | ServiceErrorKind::Timeout => {
                Some("re-run apply; completed operations will be no-ops")
            }
            _ => None,
        }
    }
}

fn humanize(d: Duration) -> String {
    if d.as_secs() > 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

// =============================================================================
// Temp-User Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TempUserError {
    /// The OS random source failed; no credentials were minted.
    #[error("cannot obtain entropy for a temporary password: {0}")]
    Entropy(String),

    #[error("temporary user request is invalid: {0}")]
    InvalidRequest(String),

    #[error("temporary user service call failed: {0}")]
    Service(#[from] ServiceError),

    /// Cleanup finished with per-user failures.
    #[error("{} temporary user(s) could not be deleted: {}", .0.len(), .0.join("; "))]
    Cleanup(Vec<String>),
}

impl TempUserError {
    pub fn code(&self) -> &'static str {
        match self {
            TempUserError::Entropy(_) => "MATLAS-TEMPUSER-001",
            TempUserError::InvalidRequest(_) => "MATLAS-TEMPUSER-002",
            TempUserError::Service(_) => "MATLAS-TEMPUSER-003",
            TempUserError::Cleanup(_) => "MATLAS-TEMPUSER-004",
        }
    }
}

// =============================================================================
// Executor Errors
// =============================================================================

/// The executor refused to start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecuteError {
    #[error("plan stages do not respect operation dependencies; re-run plan")]
    InconsistentPlan,

    #[error("plan targets project '{plan}' but the run was started for '{run}'")]
    ProjectMismatch { plan: String, run: String },
}

impl ExecuteError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecuteError::InconsistentPlan => "MATLAS-EXEC-101",
            ExecuteError::ProjectMismatch { .. } => "MATLAS-EXEC-102",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ServiceError::transient("503").is_retryable());
        assert!(ServiceError::rate_limited(None).is_retryable());
        assert!(ServiceError::timeout(Duration::from_secs(30)).is_retryable());
        assert!(!ServiceError::validation("bad size").is_retryable());
        assert!(!ServiceError::authn("expired key").is_retryable());
        assert!(!ServiceError::conflict("exists").is_retryable());
    }

    #[test]
    fn test_display_carries_kind() {
        let err = ServiceError::not_found("cluster c1");
        assert_eq!(err.to_string(), "not-found: cluster c1");
        assert_eq!(err.code(), "MATLAS-EXEC-001");
    }

    #[test]
    fn test_cleanup_error_lists_failures() {
        let err = TempUserError::Cleanup(vec!["a: timeout".into(), "b: authn".into()]);
        assert_eq!(
            err.to_string(),
            "2 temporary user(s) could not be deleted: a: timeout; b: authn"
        );
    }
}
