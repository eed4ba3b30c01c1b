//! Human-readable plan and diff output.

use matlas_core::{ChangeType, OperationType, Plan, PlannedOperation};
use serde_json::Value;
use std::fmt::Write;

fn symbol(op: &PlannedOperation) -> &'static str {
    match op.op_type {
        OperationType::Create => "+",
        OperationType::Update => "~",
        OperationType::Delete => "-",
        OperationType::NoOp => "=",
    }
}

fn short(value: &Option<Value>) -> String {
    match value {
        None => "(unset)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Stage-by-stage listing of a plan. NoOps are counted, not listed.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Plan for project {} ({:?})", plan.project_id, plan.mode);
    if !plan.has_changes() {
        let _ = writeln!(
            out,
            "✔ No changes. {} resource(s) up to date.",
            plan.summary.noop
        );
        return out;
    }
    for (stage, ops) in plan.stages() {
        let ops: Vec<&&PlannedOperation> =
            ops.iter().filter(|op| op.op_type.is_mutation()).collect();
        if ops.is_empty() {
            continue;
        }
        let _ = writeln!(out, "Stage {stage}:");
        for op in ops {
            let _ = write!(out, "  {} {} {}", symbol(op), op.kind, op.name);
            if let Some(replacement) = op.replacement {
                let _ = write!(out, " ({replacement:?})");
            }
            if !op.dependencies.is_empty() {
                let _ = write!(out, "  after {}", op.dependencies.join(", "));
            }
            let _ = writeln!(out);
            for change in &op.diff.changes {
                let _ = writeln!(
                    out,
                    "      {}: {} -> {}{}",
                    change.path,
                    short(&change.before),
                    short(&change.after),
                    if change.immutable { "  [forces replacement]" } else { "" }
                );
            }
        }
    }
    for warning in &plan.warnings {
        let _ = writeln!(out, "  (warning) {warning}");
    }
    let s = &plan.summary;
    let _ = writeln!(
        out,
        "Plan: {} to create, {} to update, {} to delete, {} unchanged, {} stage(s).",
        s.create, s.update, s.delete, s.noop, s.stages
    );
    out
}

/// Field-level diff of every changing resource.
pub fn render_diff(plan: &Plan) -> String {
    let mut out = String::new();
    for op in plan.operations.iter().filter(|op| op.op_type.is_mutation()) {
        let _ = writeln!(out, "{} {}/{}", symbol(op), op.kind, op.name);
        match op.op_type {
            OperationType::Create if op.replacement.is_none() => {
                let _ = writeln!(out, "    (new resource)");
            }
            OperationType::Delete => {
                let _ = writeln!(out, "    (resource will be deleted)");
            }
            _ => {}
        }
        for change in &op.diff.changes {
            let marker = match change.change {
                ChangeType::Added => "+",
                ChangeType::Removed => "-",
                ChangeType::Modified => "~",
            };
            let _ = writeln!(
                out,
                "    {marker} {}: {} -> {}",
                change.path,
                short(&change.before),
                short(&change.after)
            );
        }
    }
    if out.is_empty() {
        out.push_str("No differences.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlas_core::{Diff, FieldChange, PlanMode, ResourceKind};

    #[test]
    fn test_no_changes_message() {
        let mut plan = Plan::new("p", PlanMode::Apply);
        plan.operations
            .push(PlannedOperation::new(ResourceKind::Cluster, "c1", OperationType::NoOp));
        plan.summarize();
        assert!(render_plan(&plan).contains("No changes. 1 resource(s) up to date."));
        assert_eq!(render_diff(&plan), "No differences.\n");
    }

    #[test]
    fn test_update_lists_field_changes() {
        let mut op = PlannedOperation::new(ResourceKind::Cluster, "c1", OperationType::Update);
        op.diff = Diff {
            changes: vec![FieldChange {
                path: "instanceSize".into(),
                before: Some(Value::String("M10".into())),
                after: Some(Value::String("M20".into())),
                change: ChangeType::Modified,
                immutable: false,
            }],
        };
        let mut plan = Plan::new("p", PlanMode::Apply);
        plan.operations.push(op);
        plan.summarize();
        let text = render_plan(&plan);
        assert!(text.contains("~ Cluster c1"));
        assert!(text.contains("instanceSize: M10 -> M20"));
        assert!(text.contains("1 to update"));
        assert!(render_diff(&plan).contains("~ instanceSize: M10 -> M20"));
    }
}
