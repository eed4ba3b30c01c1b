//! Console rendering for command results.
//!
//! Human output goes to stdout; logs go to stderr through `tracing`.

use crate::exit;
use matlas_core::{ExecutionResult, OperationStatus, ProjectState, ResourceKind, RunStatus};
use matlas_runtime::{
    OpenAlert, Prediction, ProgressEvent, ProgressSink, SimulationReport,
    TracingProgressSink,
};
use matlas_validate::{IssueSet, Severity};
use std::io::Write;

pub fn issues(set: &IssueSet) {
    for issue in &set.issues {
        let mark = match issue.severity {
            Severity::Error => "✖",
            Severity::Warning => "⚠",
            Severity::Info => "ℹ",
        };
        println!("{mark} {} {issue}", issue.severity);
        if let Some(path) = &issue.path {
            println!("    at {path}");
        }
        if let Some(suggestion) = &issue.suggestion {
            println!("    hint: {suggestion}");
        }
    }
    let errors = set.count(Severity::Error);
    if errors == 0 {
        println!(
            "✔ Manifests are valid ({} warning(s)).",
            set.count(Severity::Warning)
        );
    } else {
        println!("✖ Manifests are invalid ({errors} error(s)).");
    }
}

pub fn discovery_warnings(state: &ProjectState) {
    for (kind, err) in &state.errors {
        println!("⚠ Could not discover {kind}: {err}");
    }
}

pub fn simulation(report: &SimulationReport) {
    println!("Dry run ({}) for project {}", report.mode, report.project_id);
    for (kind, n) in &report.by_kind {
        println!("  {kind}: {n}");
    }
    for op_id in &report.destructive {
        println!("  ⚠ destructive: {op_id}");
    }
    for u in &report.unsatisfied {
        println!("  ✖ {} needs {}: {}", u.op_id, u.dependency, u.reason);
    }
    for p in &report.predictions {
        let mark = match p.prediction {
            Prediction::LikelySucceed => "✔",
            Prediction::LikelyFail => "✖",
            Prediction::Uncertain => "?",
        };
        println!("  {mark} {}: {}", p.op_id, p.reason);
    }
    for w in &report.warnings {
        println!("  ⚠ {w}");
    }
    if report.looks_clean() {
        println!("✔ Dry run found no blocking problems.");
    } else {
        println!("✖ Dry run found problems; apply would likely fail.");
    }
}

pub fn execution(result: &ExecutionResult) {
    let s = &result.summary;
    for op in &result.operations {
        for w in &op.warnings {
            println!("  ⚠ {}: {w}", op.op_id);
        }
        if let Some(err) = &op.error {
            println!("  ✖ {}: [{}] {}", op.op_id, err.code, err.message);
            if let Some(suggestion) = &err.suggestion {
                println!("      hint: {suggestion}");
            }
        }
    }
    for err in &result.errors {
        println!("  ✖ {err}");
    }
    let headline = match result.status {
        RunStatus::Succeeded => "✔ Apply complete.",
        RunStatus::Failed => "✖ Apply failed.",
        RunStatus::Cancelled => "✖ Apply cancelled.",
    };
    println!(
        "{headline} {} completed ({} unchanged), {} failed, {} skipped, {} cancelled.",
        s.completed, s.unchanged, s.failed, s.skipped, s.cancelled
    );
    if let Some(reason) = &result.cancel_reason {
        println!("  reason: {reason}");
    }
}

pub fn state_summary(state: &ProjectState, alerts: Option<&[OpenAlert]>) {
    println!("Project {} ({} resource(s))", state.project_id, state.total());
    for kind in ResourceKind::ALL {
        match state.resources.get(&kind) {
            Some(items) if !items.is_empty() => {
                println!("  {kind}: {}", items.len());
                for item in items {
                    println!("    - {} [{}] {}", item.natural_key(), item.state, item.id);
                }
            }
            Some(_) => {}
            None => println!("  {kind}: not discovered"),
        }
    }
    match alerts {
        Some([]) => println!("✔ No open alerts."),
        Some(alerts) => {
            println!("⚠ {} open alert(s):", alerts.len());
            for a in alerts {
                let cluster = a.cluster_name.as_deref().unwrap_or("-");
                println!("    - {} {} cluster={cluster} since {}", a.id, a.event_type_name, a.created);
            }
        }
        None => println!("⚠ Open alerts unavailable."),
    }
}

pub fn error(err: &anyhow::Error) {
    let (code, suggestion) = exit::describe(err);
    match code {
        Some(code) => eprintln!("✖ [{code}] {err:#}"),
        None => eprintln!("✖ {err:#}"),
    }
    if let Some(suggestion) = suggestion {
        eprintln!("    hint: {suggestion}");
    }
}

/// Prints stage and operation lines, and logs every event.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn record(&self, event: ProgressEvent) {
        TracingProgressSink.record(event.clone());
        let line = match event {
            ProgressEvent::StageStarted { stage, operations } => {
                format!("Stage {stage} ({operations} operation(s))")
            }
            ProgressEvent::OperationRetrying { op_id, attempt, delay_ms, error } => {
                format!("  ↻ {op_id}: attempt {attempt} failed ({error}), retrying in {delay_ms}ms")
            }
            ProgressEvent::OperationFinished { op_id, status, detail } => {
                let mark = match status {
                    OperationStatus::Completed => "✔",
                    OperationStatus::Failed => "✖",
                    _ => "·",
                };
                match detail {
                    Some(detail) => format!("  {mark} {op_id} {status}: {detail}"),
                    None => format!("  {mark} {op_id} {status}"),
                }
            }
            _ => return,
        };
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }
}
