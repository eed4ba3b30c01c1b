//! Execution plans.
//!
//! A [`Plan`] is fully determined by its inputs: it carries no timestamps or
//! random identifiers, so planning the same document against the same
//! snapshot twice serializes to identical bytes.

use crate::kind::ResourceKind;
use crate::manifest::ResourceId;
use crate::resources::ResourceSpec;
use crate::state::ObservedResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Schema tag written into plan files.
pub const PLAN_FORMAT: &str = "matlas.mongodb.com/plan/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
    NoOp,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::NoOp => "noop",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, OperationType::NoOp)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation lifecycle: `Pending → Running → terminal`. Terminal states absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::Failed
                | OperationStatus::Cancelled
                | OperationStatus::Skipped
        )
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Cancelled | Skipped) => true,
            // No-ops finish without running.
            (Pending, Completed) => true,
            (Running, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One field-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path into the spec, e.g. `instanceSize` or `roles`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    pub change: ChangeType,
    /// Changing this field requires replacing the resource.
    #[serde(default)]
    pub immutable: bool,
}

/// Field-level differences between desired and observed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub changes: Vec<FieldChange>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn touches_immutable(&self) -> bool {
        self.changes.iter().any(|c| c.immutable)
    }

    pub fn immutable_paths(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.immutable)
            .map(|c| c.path.as_str())
            .collect()
    }
}

/// Which half of a replacement an operation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replacement {
    /// The Delete that clears the way.
    Teardown,
    /// The Create that follows it.
    Recreate,
}

/// One typed operation in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOperation {
    /// Deterministic id, e.g. `cluster:c1:create`.
    pub id: String,
    pub kind: ResourceKind,
    /// `metadata.name` of the desired resource, or a name derived from the
    /// observed natural key.
    pub name: String,
    pub op_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<ObservedResource>,
    #[serde(default, skip_serializing_if = "Diff::is_empty")]
    pub diff: Diff,
    /// Operation ids that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub stage: usize,
    pub priority: u32,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Replacement>,
}

impl PlannedOperation {
    pub fn op_id(kind: ResourceKind, name: &str, op_type: OperationType) -> String {
        format!(
            "{}:{}:{}",
            kind.as_str().to_ascii_lowercase(),
            name,
            op_type.as_str()
        )
    }

    pub fn new(kind: ResourceKind, name: impl Into<String>, op_type: OperationType) -> Self {
        let name = name.into();
        Self {
            id: Self::op_id(kind, &name, op_type),
            kind,
            name,
            op_type,
            desired: None,
            observed: None,
            diff: Diff::default(),
            dependencies: Vec::new(),
            stage: 0,
            priority: kind.rank(),
            status: OperationStatus::Pending,
            warnings: Vec::new(),
            replacement: None,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }

    /// Atlas id of the observed resource, when there is one.
    pub fn target_id(&self) -> Option<&str> {
        self.observed.as_ref().map(|o| o.id.as_str())
    }

    pub fn is_destructive(&self) -> bool {
        self.op_type == OperationType::Delete
    }
}

/// Whether observed-but-undeclared resources may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Apply,
    Destroy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub noop: usize,
    pub stages: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete + self.noop
    }

    pub fn changes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// Ordered, staged operations for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub format: String,
    pub project_id: String,
    pub mode: PlanMode,
    /// Sorted by (stage, priority, id).
    pub operations: Vec<PlannedOperation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: PlanSummary,
}

impl Plan {
    pub fn new(project_id: impl Into<String>, mode: PlanMode) -> Self {
        Self {
            format: PLAN_FORMAT.to_string(),
            project_id: project_id.into(),
            mode,
            operations: Vec::new(),
            warnings: Vec::new(),
            summary: PlanSummary::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&PlannedOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlannedOperation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    /// Operation for a resource, ignoring its type.
    pub fn find(&self, kind: ResourceKind, name: &str) -> Vec<&PlannedOperation> {
        self.operations
            .iter()
            .filter(|op| op.kind == kind && op.name == name)
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.op_type.is_mutation())
            .map(|op| op.stage + 1)
            .max()
            .unwrap_or(0)
    }

    /// Operations grouped by stage, in order.
    pub fn stages(&self) -> BTreeMap<usize, Vec<&PlannedOperation>> {
        let mut out: BTreeMap<usize, Vec<&PlannedOperation>> = BTreeMap::new();
        for op in &self.operations {
            out.entry(op.stage).or_default().push(op);
        }
        out
    }

    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.op_type.is_mutation())
    }

    pub fn destructive(&self) -> Vec<&PlannedOperation> {
        self.operations.iter().filter(|op| op.is_destructive()).collect()
    }

    /// Recount the summary from the operations.
    pub fn summarize(&mut self) {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op.op_type {
                OperationType::Create => summary.create += 1,
                OperationType::Update => summary.update += 1,
                OperationType::Delete => summary.delete += 1,
                OperationType::NoOp => summary.noop += 1,
            }
        }
        summary.stages = self.stage_count();
        self.summary = summary;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ids_are_stable() {
        assert_eq!(
            PlannedOperation::op_id(ResourceKind::Cluster, "c1", OperationType::Create),
            "cluster:c1:create"
        );
        assert_eq!(
            PlannedOperation::op_id(ResourceKind::VpcEndpoint, "e", OperationType::NoOp),
            "vpcendpoint:e:noop"
        );
    }

    #[test]
    fn terminal_states_absorb() {
        for terminal in [
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Cancelled,
            OperationStatus::Skipped,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(OperationStatus::Running));
            assert!(!terminal.can_transition_to(OperationStatus::Pending));
        }
        assert!(OperationStatus::Pending.can_transition_to(OperationStatus::Running));
        assert!(!OperationStatus::Running.can_transition_to(OperationStatus::Skipped));
    }

    #[test]
    fn summary_counts_types() {
        let mut plan = Plan::new("p", PlanMode::Apply);
        plan.operations
            .push(PlannedOperation::new(ResourceKind::Project, "p1", OperationType::NoOp));
        let mut create = PlannedOperation::new(ResourceKind::Cluster, "c1", OperationType::Create);
        create.stage = 1;
        plan.operations.push(create);
        plan.summarize();
        assert_eq!(plan.summary.create, 1);
        assert_eq!(plan.summary.noop, 1);
        assert_eq!(plan.summary.stages, 2);
        assert!(plan.has_changes());
    }
}
