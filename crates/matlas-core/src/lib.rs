//! Shared data model for the matlas apply engine.
//!
//! Resource kinds and their typed specs, the manifest loader, observed
//! project state, plans, execution results and configuration. Every other
//! matlas crate builds on these types.

pub mod cidr;
pub mod config;
pub mod error;
pub mod kind;
pub mod loader;
pub mod manifest;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod result;
pub mod state;

pub use config::{ConfigError, MatlasConfig};
pub use error::LoadError;
pub use kind::{DiffRules, ResourceKind};
pub use manifest::{ApplyDocument, Metadata, Resource, ResourceId, ResourceManifest};
pub use plan::{
    ChangeType, Diff, FieldChange, OperationStatus, OperationType, Plan, PlanMode,
    PlanSummary, PlannedOperation, Replacement,
};
pub use provider::Provider;
pub use resources::{KindSpec, RefStrength, Reference, ResourceSpec};
pub use result::{
    ExecutionResult, ExecutionSummary, OperationError, OperationResult, RunStatus,
};
pub use state::{Observed, ObservedResource, ProjectState, ProvisioningState};
