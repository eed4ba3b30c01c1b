//! Process exit codes.

use matlas_core::{ConfigError, LoadError};
use matlas_planner::PlanError;
use matlas_runtime::memory::StoreError;
use matlas_runtime::ExecuteError;

/// What the process reports to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    /// Unreadable input or validation errors.
    Validation = 1,
    /// The plan could not be built or the run failed.
    Failure = 2,
    Cancelled = 3,
    /// Missing or broken configuration, backend or credentials.
    Config = 4,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

/// An error that already knows its exit code.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Exit {
    pub code: ExitCode,
    pub message: String,
}

impl Exit {
    pub fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Config, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Validation, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Cancelled, message)
    }
}

/// Exit code for an error escaping a command.
pub fn classify(err: &anyhow::Error) -> ExitCode {
    if let Some(exit) = err.downcast_ref::<Exit>() {
        return exit.code;
    }
    if err.downcast_ref::<LoadError>().is_some() {
        return ExitCode::Validation;
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<StoreError>().is_some() {
        return ExitCode::Config;
    }
    ExitCode::Failure
}

/// Stable code and remediation hint, when the error carries them.
pub fn describe(err: &anyhow::Error) -> (Option<&'static str>, Option<String>) {
    if let Some(e) = err.downcast_ref::<LoadError>() {
        return (Some(e.code()), None);
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return (Some(e.code()), None);
    }
    if let Some(e) = err.downcast_ref::<PlanError>() {
        return (Some(e.code()), e.suggestion());
    }
    if let Some(e) = err.downcast_ref::<ExecuteError>() {
        return (
            Some(e.code()),
            Some("re-run `matlas plan` against the target project".into()),
        );
    }
    (None, None)
}
