//! Stage assignment over the operation DAG.

use crate::error::PlanError;
use matlas_core::{Plan, PlannedOperation};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Assign `stage` to every operation with Kahn's algorithm.
///
/// An operation with no dependencies is in stage 0; otherwise its stage is
/// one more than the highest stage among its dependencies. Dependencies
/// that name no operation in `ops` are ignored. Returns the number of
/// stages.
pub fn assign_stages(ops: &mut [PlannedOperation]) -> Result<usize, PlanError> {
    let index: BTreeMap<String, usize> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id.clone(), i))
        .collect();

    let mut indegree = vec![0usize; ops.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ops.len()];
    for (i, op) in ops.iter().enumerate() {
        let deps: BTreeSet<usize> = op
            .dependencies
            .iter()
            .filter_map(|d| index.get(d).copied())
            .filter(|&d| d != i)
            .collect();
        indegree[i] = deps.len();
        for d in deps {
            dependents[d].insert(i);
        }
    }

    let mut stage = vec![0usize; ops.len()];
    let mut ready: VecDeque<usize> = (0..ops.len()).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = ready.pop_front() {
        visited += 1;
        for &next in &dependents[i] {
            stage[next] = stage[next].max(stage[i] + 1);
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if visited != ops.len() {
        let mut stuck: Vec<String> = (0..ops.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| ops[i].id.clone())
            .collect();
        stuck.sort();
        return Err(PlanError::Cycle { ops: stuck });
    }

    for (op, s) in ops.iter_mut().zip(stage) {
        op.stage = s;
    }
    Ok(ops.iter().map(|op| op.stage + 1).max().unwrap_or(0))
}

/// Every dependency names an operation in an earlier stage.
pub fn is_topologically_consistent(plan: &Plan) -> bool {
    plan.operations.iter().all(|op| {
        op.dependencies.iter().all(|dep| match plan.get(dep) {
            Some(d) => d.stage < op.stage,
            None => false,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlas_core::{OperationType, ResourceKind};

    fn op(kind: ResourceKind, name: &str, deps: &[&str]) -> PlannedOperation {
        let mut op = PlannedOperation::new(kind, name, OperationType::Create);
        op.dependencies = deps.iter().map(|d| d.to_string()).collect();
        op
    }

    #[test]
    fn test_stage_is_one_past_deepest_dependency() {
        let mut ops = vec![
            op(ResourceKind::DatabaseUser, "u1", &["cluster:c1:create", "project:p1:create"]),
            op(ResourceKind::Cluster, "c1", &["project:p1:create"]),
            op(ResourceKind::Project, "p1", &[]),
        ];
        assert_eq!(assign_stages(&mut ops).unwrap(), 3);
        let stages: Vec<usize> = ops.iter().map(|o| o.stage).collect();
        assert_eq!(stages, vec![2, 1, 0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut ops = vec![
            op(ResourceKind::Cluster, "a", &["cluster:b:create"]),
            op(ResourceKind::Cluster, "b", &["cluster:a:create"]),
            op(ResourceKind::Cluster, "c", &[]),
        ];
        match assign_stages(&mut ops) {
            Err(PlanError::Cycle { ops }) => {
                assert_eq!(ops, vec!["cluster:a:create", "cluster:b:create"])
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let mut ops = vec![op(ResourceKind::Cluster, "a", &["cluster:zz:create"])];
        assert_eq!(assign_stages(&mut ops).unwrap(), 1);
        assert_eq!(ops[0].stage, 0);
    }
}
