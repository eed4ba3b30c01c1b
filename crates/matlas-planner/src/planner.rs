//! Desired vs observed reconciliation into a staged plan.

use crate::dag::assign_stages;
use crate::diff::diff_specs;
use crate::error::PlanError;
use matlas_core::manifest::Resource;
use matlas_core::state::suggested_name;
use matlas_core::{
    ApplyDocument, ObservedResource, OperationType, Plan, PlanMode, PlannedOperation,
    ProjectState, Replacement, ResourceId, ResourceKind,
};
use matlas_validate::{DependencyGraph, EdgeOrigin};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Label the temp-user manager puts on the users it mints.
const TEMPORARY_LABEL: &str = "temporary";

/// Planning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    pub mode: PlanMode,
    /// Never delete observed resources the document does not declare.
    #[serde(default)]
    pub preserve_existing: bool,
    /// Overrides the document's authoritative annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authoritative: Option<bool>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            mode: PlanMode::Apply,
            preserve_existing: false,
            authoritative: None,
        }
    }
}

impl PlanOptions {
    pub fn destroy() -> Self {
        Self {
            mode: PlanMode::Destroy,
            ..Default::default()
        }
    }
}

type Subject = (ResourceKind, String);

/// An operation under construction, with what dependency resolution needs.
struct Draft<'a> {
    op: PlannedOperation,
    key: String,
    resource: Option<&'a Resource>,
}

/// Computes plans.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    options: PlanOptions,
}

impl Planner {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Plan the changes that converge `observed` to `desired`.
    ///
    /// The output depends only on the inputs: two runs over the same
    /// document and snapshot serialize identically.
    pub fn plan(&self, desired: &ApplyDocument, observed: &ProjectState) -> Result<Plan, PlanError> {
        let authoritative = self
            .options
            .authoritative
            .unwrap_or_else(|| desired.is_authoritative());
        check_discovered(desired, observed)?;

        let mut drafts = self.classify_desired(desired, observed, authoritative)?;
        let claimed: BTreeSet<Subject> = desired
            .resources
            .iter()
            .map(|r| (r.kind(), r.natural_key()))
            .collect();

        let delete_leftovers = match self.options.mode {
            PlanMode::Destroy => true,
            PlanMode::Apply => authoritative && !self.options.preserve_existing,
        };
        if delete_leftovers {
            self.classify_leftovers(desired, observed, &claimed, &mut drafts);
        }

        link_dependencies(desired, &mut drafts);

        let (mut mutating, noops): (Vec<PlannedOperation>, Vec<PlannedOperation>) = drafts
            .into_iter()
            .map(|d| d.op)
            .partition(|op| op.op_type.is_mutation());
        let stages = assign_stages(&mut mutating)?;

        let mut plan = Plan::new(observed.project_id.clone(), self.options.mode);
        plan.operations = mutating.into_iter().chain(noops).collect();
        plan.operations
            .sort_by(|a, b| (a.stage, a.priority, &a.id).cmp(&(b.stage, b.priority, &b.id)));
        let mut seen = BTreeSet::new();
        plan.warnings = plan
            .operations
            .iter()
            .flat_map(|op| op.warnings.iter())
            .filter(|w| seen.insert((*w).clone()))
            .cloned()
            .collect();
        plan.summarize();

        info!(
            project_id = %plan.project_id,
            mode = ?plan.mode,
            create = plan.summary.create,
            update = plan.summary.update,
            delete = plan.summary.delete,
            noop = plan.summary.noop,
            stages,
            "plan computed"
        );
        Ok(plan)
    }

    fn classify_desired<'a>(
        &self,
        desired: &'a ApplyDocument,
        observed: &ProjectState,
        authoritative: bool,
    ) -> Result<Vec<Draft<'a>>, PlanError> {
        let mut drafts = Vec::new();
        let mut declared: BTreeMap<Subject, &str> = BTreeMap::new();

        for resource in &desired.resources {
            let kind = resource.kind();
            let key = resource.natural_key();
            if let Some(first) = declared.insert((kind, key.clone()), resource.name()) {
                return Err(PlanError::DuplicateResource {
                    kind,
                    key,
                    first: first.to_string(),
                    second: resource.name().to_string(),
                });
            }
            let found = observed.find_by_key(kind, &key);
            let draft = |op| Draft {
                op,
                key: key.clone(),
                resource: Some(resource),
            };

            match (self.options.mode, found) {
                (PlanMode::Apply, None) => drafts.push(draft(create_op(resource))),
                (PlanMode::Apply, Some(obs)) => {
                    let diff = diff_specs(&resource.spec, &obs.spec, authoritative);
                    if diff.is_empty() {
                        let mut op =
                            PlannedOperation::new(kind, resource.name(), OperationType::NoOp);
                        op.desired = Some(resource.spec.clone());
                        op.observed = Some(obs.clone());
                        drafts.push(draft(op));
                    } else if diff.touches_immutable() {
                        let warning = format!(
                            "{} {}: {} cannot change in place; it will be deleted and recreated",
                            kind,
                            resource.name(),
                            diff.immutable_paths().join(", ")
                        );
                        debug!(kind = %kind, name = resource.name(), "immutable change, replacing");
                        let mut teardown = delete_op(kind, resource.name(), obs);
                        teardown.replacement = Some(Replacement::Teardown);
                        teardown.warnings.push(warning.clone());

                        let mut recreate = create_op(resource);
                        recreate.replacement = Some(Replacement::Recreate);
                        recreate.observed = Some(obs.clone());
                        recreate.diff = diff;
                        recreate.dependencies.push(teardown.id.clone());
                        recreate.warnings.push(warning);

                        drafts.push(draft(teardown));
                        drafts.push(draft(recreate));
                    } else {
                        let mut op =
                            PlannedOperation::new(kind, resource.name(), OperationType::Update);
                        op.desired = Some(resource.spec.clone());
                        op.observed = Some(obs.clone());
                        op.diff = diff;
                        drafts.push(draft(op));
                    }
                }
                (PlanMode::Destroy, Some(obs)) => {
                    let mut op = delete_op(kind, resource.name(), obs);
                    op.desired = Some(resource.spec.clone());
                    drafts.push(draft(op));
                }
                (PlanMode::Destroy, None) => {
                    debug!(kind = %kind, name = resource.name(), "already absent");
                }
            }
        }
        Ok(drafts)
    }

    fn classify_leftovers<'a>(
        &self,
        desired: &ApplyDocument,
        observed: &ProjectState,
        claimed: &BTreeSet<Subject>,
        drafts: &mut Vec<Draft<'a>>,
    ) {
        let mut names: BTreeSet<(ResourceKind, String)> = desired
            .resources
            .iter()
            .map(|r| (r.kind(), r.name().to_string()))
            .collect();

        for (kind, items) in &observed.resources {
            // The project is the scope of the run, not a member of it.
            if *kind == ResourceKind::Project {
                continue;
            }
            for item in items {
                let key = item.natural_key();
                if claimed.contains(&(*kind, key.clone())) || is_temporary(item) {
                    continue;
                }
                let base = suggested_name(*kind, &item.spec);
                let mut name = base.clone();
                let mut n = 2;
                while !names.insert((*kind, name.clone())) {
                    name = format!("{base}-{n}");
                    n += 1;
                }
                debug!(kind = %kind, name = %name, id = %item.id, "undeclared resource will be deleted");
                drafts.push(Draft {
                    op: delete_op(*kind, &name, item),
                    key,
                    resource: None,
                });
            }
        }
    }
}

fn check_discovered(desired: &ApplyDocument, observed: &ProjectState) -> Result<(), PlanError> {
    for kind in desired.kinds() {
        if !observed.is_discovered(kind) {
            let reason = observed
                .errors
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| "not requested".to_string());
            return Err(PlanError::KindNotDiscovered { kind, reason });
        }
    }
    Ok(())
}

fn is_temporary(item: &ObservedResource) -> bool {
    match &item.spec {
        matlas_core::ResourceSpec::DatabaseUser(user) => user
            .labels
            .get(TEMPORARY_LABEL)
            .is_some_and(|v| v == "true"),
        _ => false,
    }
}

fn create_op(resource: &Resource) -> PlannedOperation {
    let mut op = PlannedOperation::new(resource.kind(), resource.name(), OperationType::Create);
    op.desired = Some(resource.spec.clone());
    op
}

fn delete_op(kind: ResourceKind, name: &str, observed: &ObservedResource) -> PlannedOperation {
    let mut op = PlannedOperation::new(kind, name, OperationType::Delete);
    op.observed = Some(observed.clone());
    op.priority = delete_priority(kind);
    op
}

/// Deletes run dependents first, so their tie-break order is reversed.
fn delete_priority(kind: ResourceKind) -> u32 {
    (ResourceKind::ALL.len() as u32 - 1) - kind.rank()
}

/// Fill `dependencies` on every mutating draft.
///
/// - A create or update of X waits for the create of anything X references
///   and of the project it lives in; explicit `dependsOn` also waits for
///   updates.
/// - The delete of Y waits for the delete of every X referencing Y; a
///   project delete waits for every other delete.
fn link_dependencies(desired: &ApplyDocument, drafts: &mut [Draft<'_>]) {
    let graph = DependencyGraph::build(desired);
    let key_of = |id: &ResourceId| desired.find(id.kind, &id.name).map(|r| r.natural_key());

    let mut creates: BTreeMap<Subject, String> = BTreeMap::new();
    let mut updates: BTreeMap<Subject, String> = BTreeMap::new();
    let mut deletes: BTreeMap<Subject, usize> = BTreeMap::new();
    for (i, d) in drafts.iter().enumerate() {
        let subject = (d.op.kind, d.key.clone());
        match d.op.op_type {
            OperationType::Create => {
                creates.insert(subject, d.op.id.clone());
            }
            OperationType::Update => {
                updates.insert(subject, d.op.id.clone());
            }
            OperationType::Delete => {
                deletes.insert(subject, i);
            }
            OperationType::NoOp => {}
        }
    }

    // (op index, dependency id)
    let mut links: Vec<(usize, String)> = Vec::new();
    for (i, d) in drafts.iter().enumerate() {
        match d.op.op_type {
            OperationType::NoOp => {}
            OperationType::Create | OperationType::Update => {
                let Some(resource) = d.resource else { continue };
                let from = resource.id();
                for edge in graph.edges.iter().filter(|e| e.from == from) {
                    let Some(key) = key_of(&edge.to) else { continue };
                    let subject = (edge.to.kind, key);
                    let dep = match edge.origin {
                        EdgeOrigin::Reference | EdgeOrigin::Project => creates.get(&subject),
                        EdgeOrigin::Explicit => {
                            creates.get(&subject).or_else(|| updates.get(&subject))
                        }
                    };
                    if let Some(dep) = dep {
                        links.push((i, dep.clone()));
                    }
                }
            }
            OperationType::Delete => {
                let spec = d
                    .op
                    .observed
                    .as_ref()
                    .map(|o| &o.spec)
                    .or(d.op.desired.as_ref());
                let mut targets: Vec<Subject> = spec
                    .map(|s| s.references())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|r| {
                        let key = desired
                            .resolve(r.kind, &r.name)
                            .map(|t| t.natural_key())
                            .unwrap_or(r.name);
                        (r.kind, key)
                    })
                    .collect();
                if let Some(resource) = d.resource {
                    let from = resource.id();
                    targets.extend(
                        graph
                            .edges
                            .iter()
                            .filter(|e| e.from == from && e.origin == EdgeOrigin::Explicit)
                            .filter_map(|e| key_of(&e.to).map(|k| (e.to.kind, k))),
                    );
                }
                if d.op.kind != ResourceKind::Project {
                    targets.extend(
                        deletes
                            .keys()
                            .filter(|(kind, _)| *kind == ResourceKind::Project)
                            .cloned(),
                    );
                }
                for target in targets {
                    if let Some(&t) = deletes.get(&target) {
                        if t != i {
                            links.push((t, d.op.id.clone()));
                        }
                    }
                }
            }
        }
    }

    for (i, dep) in links {
        drafts[i].op.dependencies.push(dep);
    }
    for d in drafts.iter_mut() {
        d.op.dependencies.sort();
        d.op.dependencies.dedup();
    }
}
