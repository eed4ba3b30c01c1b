//! Plan simulation without mutation.
//!
//! Quick mode looks at the plan alone. Thorough mode also reads the project
//! through the services' list calls and predicts how each operation will
//! fare. Neither mode calls a mutating service method.

use crate::discovery::Discoverer;
use matlas_core::provider::{instance_size_availability, Availability, Provider};
use matlas_core::{
    OperationStatus, OperationType, Plan, PlannedOperation, ProjectState, ResourceKind,
    ResourceSpec,
};
use matlas_planner::diff_specs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Clusters Atlas allows in one project.
pub const MAX_CLUSTERS_PER_PROJECT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunMode {
    #[default]
    Quick,
    Thorough,
}

impl fmt::Display for DryRunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DryRunMode::Quick => f.write_str("quick"),
            DryRunMode::Thorough => f.write_str("thorough"),
        }
    }
}

impl FromStr for DryRunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(DryRunMode::Quick),
            "thorough" => Ok(DryRunMode::Thorough),
            other => Err(format!("unknown dry-run mode '{other}' (expected quick or thorough)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Prediction {
    LikelySucceed,
    LikelyFail,
    Uncertain,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Prediction::LikelySucceed => "likely-succeed",
            Prediction::LikelyFail => "likely-fail",
            Prediction::Uncertain => "uncertain",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedOutcome {
    pub op_id: String,
    pub prediction: Prediction,
    pub reason: String,
}

/// A dependency the operation cannot count on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsatisfiedDependency {
    pub op_id: String,
    pub dependency: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub mode: DryRunMode,
    pub project_id: String,
    pub by_kind: BTreeMap<ResourceKind, usize>,
    pub by_type: BTreeMap<OperationType, usize>,
    /// Delete operations, in plan order.
    pub destructive: Vec<String>,
    pub unsatisfied: Vec<UnsatisfiedDependency>,
    /// Thorough mode only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predictions: Vec<PredictedOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SimulationReport {
    pub fn prediction(&self, op_id: &str) -> Option<&PredictedOutcome> {
        self.predictions.iter().find(|p| p.op_id == op_id)
    }

    /// Nothing is unsatisfiable and nothing is predicted to fail.
    pub fn looks_clean(&self) -> bool {
        self.unsatisfied.is_empty()
            && self
                .predictions
                .iter()
                .all(|p| p.prediction != Prediction::LikelyFail)
    }
}

/// Structural analysis of a plan.
pub fn simulate_quick(plan: &Plan) -> SimulationReport {
    let mut by_kind = BTreeMap::new();
    let mut by_type = BTreeMap::new();
    for op in &plan.operations {
        *by_kind.entry(op.kind).or_insert(0) += 1;
        *by_type.entry(op.op_type).or_insert(0) += 1;
    }
    SimulationReport {
        mode: DryRunMode::Quick,
        project_id: plan.project_id.clone(),
        by_kind,
        by_type,
        destructive: plan.destructive().iter().map(|op| op.id.clone()).collect(),
        unsatisfied: unsatisfied_dependencies(plan),
        predictions: Vec::new(),
        warnings: plan.warnings.clone(),
    }
}

/// Structural analysis plus read-only probes of the current project.
pub async fn simulate_thorough(plan: &Plan, discoverer: &Discoverer) -> SimulationReport {
    let mut report = simulate_quick(plan);
    report.mode = DryRunMode::Thorough;

    let kinds: Vec<ResourceKind> = plan
        .operations
        .iter()
        .map(|op| op.kind)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let state = discoverer.discover(&plan.project_id, &kinds).await;
    for (kind, err) in &state.errors {
        report
            .warnings
            .push(format!("could not read {kind} resources: {err}"));
    }

    let blocked: BTreeSet<&str> = report.unsatisfied.iter().map(|u| u.op_id.as_str()).collect();
    let probe = Probe { plan, state: &state };
    report.predictions = plan
        .operations
        .iter()
        .map(|op| {
            let (prediction, reason) = if blocked.contains(op.id.as_str()) {
                (Prediction::LikelyFail, "a dependency cannot be satisfied".to_string())
            } else {
                probe.predict(op)
            };
            PredictedOutcome {
                op_id: op.id.clone(),
                prediction,
                reason,
            }
        })
        .collect();
    info!(
        project_id = %plan.project_id,
        operations = plan.operations.len(),
        likely_fail = report
            .predictions
            .iter()
            .filter(|p| p.prediction == Prediction::LikelyFail)
            .count(),
        "thorough dry run complete"
    );
    report
}

pub async fn simulate(plan: &Plan, mode: DryRunMode, discoverer: &Discoverer) -> SimulationReport {
    match mode {
        DryRunMode::Quick => simulate_quick(plan),
        DryRunMode::Thorough => simulate_thorough(plan, discoverer).await,
    }
}

/// Dependencies that are missing, already failed, or torn down for good.
fn unsatisfied_dependencies(plan: &Plan) -> Vec<UnsatisfiedDependency> {
    let recreated: BTreeSet<(ResourceKind, &str)> = plan
        .operations
        .iter()
        .filter(|op| op.op_type == OperationType::Create)
        .map(|op| (op.kind, op.name.as_str()))
        .collect();

    let mut out = Vec::new();
    for op in &plan.operations {
        for dep in &op.dependencies {
            let reason = match plan.get(dep) {
                None => Some("dependency is not part of the plan".to_string()),
                Some(d)
                    if matches!(
                        d.status,
                        OperationStatus::Failed | OperationStatus::Skipped | OperationStatus::Cancelled
                    ) =>
                {
                    Some(format!("dependency ended {}", d.status))
                }
                Some(d)
                    if d.op_type == OperationType::Delete
                        && op.op_type != OperationType::Delete
                        && !recreated.contains(&(d.kind, d.name.as_str())) =>
                {
                    Some(format!("{} {} is deleted by this plan", d.kind, d.name))
                }
                Some(_) => None,
            };
            if let Some(reason) = reason {
                out.push(UnsatisfiedDependency {
                    op_id: op.id.clone(),
                    dependency: dep.clone(),
                    reason,
                });
            }
        }
    }
    out
}

struct Probe<'a> {
    plan: &'a Plan,
    state: &'a ProjectState,
}

impl Probe<'_> {
    fn predict(&self, op: &PlannedOperation) -> (Prediction, String) {
        if !self.state.is_discovered(op.kind) {
            return (
                Prediction::Uncertain,
                format!("current {} resources could not be read", op.kind),
            );
        }
        match op.op_type {
            OperationType::NoOp => (Prediction::LikelySucceed, "already up to date".into()),
            OperationType::Create => self.predict_create(op),
            OperationType::Update => match op.target_id() {
                Some(id) if self.state.find_by_id(op.kind, id).is_some() => {
                    (Prediction::LikelySucceed, "target exists".into())
                }
                _ => (
                    Prediction::LikelyFail,
                    "target no longer exists; re-run plan".into(),
                ),
            },
            OperationType::Delete => match op.target_id() {
                Some(id) if self.state.find_by_id(op.kind, id).is_some() => {
                    (Prediction::LikelySucceed, "target exists".into())
                }
                _ => (
                    Prediction::Uncertain,
                    "target is already gone; the delete will be a no-op".into(),
                ),
            },
        }
    }

    fn predict_create(&self, op: &PlannedOperation) -> (Prediction, String) {
        let Some(desired) = &op.desired else {
            return (Prediction::LikelyFail, "operation carries no desired spec".into());
        };
        let key = desired.natural_key();
        let replaced = self
            .plan
            .operations
            .iter()
            .any(|o| o.op_type == OperationType::Delete && o.kind == op.kind && o.name == op.name);
        if !replaced {
            if let Some(existing) = self.state.find_by_key(op.kind, &key) {
                return if diff_specs(desired, &existing.spec, false).is_empty() {
                    (
                        Prediction::LikelySucceed,
                        "an identical resource already exists and will be adopted".into(),
                    )
                } else {
                    (
                        Prediction::LikelyFail,
                        format!("{} '{key}' already exists with different settings", op.kind),
                    )
                };
            }
        }

        match desired {
            ResourceSpec::Cluster(cluster) => {
                let planned = self
                    .plan
                    .operations
                    .iter()
                    .filter(|o| o.kind == ResourceKind::Cluster && o.op_type == OperationType::Create)
                    .count();
                let deleted = self
                    .plan
                    .operations
                    .iter()
                    .filter(|o| o.kind == ResourceKind::Cluster && o.op_type == OperationType::Delete)
                    .count();
                let total = (self.state.of_kind(ResourceKind::Cluster).len() + planned)
                    .saturating_sub(deleted);
                if total > MAX_CLUSTERS_PER_PROJECT {
                    return (
                        Prediction::LikelyFail,
                        format!(
                            "project would hold {total} clusters; Atlas allows {MAX_CLUSTERS_PER_PROJECT}"
                        ),
                    );
                }
                match cluster.provider.parse::<Provider>() {
                    Err(err) => (Prediction::LikelyFail, err),
                    Ok(provider) => match instance_size_availability(
                        provider,
                        &cluster.region,
                        &cluster.instance_size,
                    ) {
                        Availability::Available => (
                            Prediction::LikelySucceed,
                            "name is free and the tier is offered in the region".into(),
                        ),
                        Availability::Restricted(why) => (Prediction::Uncertain, why),
                        Availability::UnknownSize => (
                            Prediction::LikelyFail,
                            format!("unknown instance size '{}'", cluster.instance_size),
                        ),
                    },
                }
            }
            ResourceSpec::SearchIndex(index) => {
                let cluster_exists = self
                    .state
                    .find_by_key(ResourceKind::Cluster, &index.cluster_name)
                    .is_some()
                    || self.plan.operations.iter().any(|o| {
                        o.kind == ResourceKind::Cluster
                            && o.op_type == OperationType::Create
                            && o.desired.as_ref().is_some_and(|d| d.natural_key() == index.cluster_name)
                    });
                if cluster_exists {
                    (
                        Prediction::Uncertain,
                        format!(
                            "collection {}.{} will be prepared with a temporary user first",
                            index.database_name, index.collection_name
                        ),
                    )
                } else {
                    (
                        Prediction::LikelyFail,
                        format!("cluster '{}' does not exist", index.cluster_name),
                    )
                }
            }
            _ => (Prediction::LikelySucceed, format!("{} '{key}' is free", op.kind)),
        }
    }
}
