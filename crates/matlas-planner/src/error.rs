//! Planning errors.

use matlas_core::ResourceKind;

/// The desired and observed state cannot be turned into a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("operations form a dependency cycle: {}", .ops.join(", "))]
    Cycle { ops: Vec<String> },

    #[error("{kind} was not discovered ({reason}); resources of this kind cannot be planned")]
    KindNotDiscovered { kind: ResourceKind, reason: String },

    #[error("{kind} '{key}' is declared by both '{first}' and '{second}'")]
    DuplicateResource {
        kind: ResourceKind,
        key: String,
        first: String,
        second: String,
    },
}

impl PlanError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Cycle { .. } => "MATLAS-PLAN-001",
            PlanError::KindNotDiscovered { .. } => "MATLAS-PLAN-002",
            PlanError::DuplicateResource { .. } => "MATLAS-PLAN-003",
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            PlanError::Cycle { .. } => Some(
                "remove a dependsOn entry or a reference so replacements can be ordered".into(),
            ),
            PlanError::KindNotDiscovered { .. } => {
                Some("retry once Atlas is reachable, or remove the kind from the manifest".into())
            }
            PlanError::DuplicateResource { .. } => {
                Some("run `matlas validate` and remove the duplicate".into())
            }
        }
    }
}
