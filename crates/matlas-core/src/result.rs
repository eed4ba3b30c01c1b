//! Outcome of executing a plan.

use crate::kind::ResourceKind;
use crate::plan::{OperationStatus, OperationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Error attached to a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub op_id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub op_type: OperationType,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub retry_count: u32,
    /// Atlas id assigned to (or already held by) the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Why the operation was skipped or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OperationResult {
    pub fn pending(op_id: &str, kind: ResourceKind, name: &str, op_type: OperationType) -> Self {
        Self {
            op_id: op_id.to_string(),
            kind,
            name: name.to_string(),
            op_type,
            status: OperationStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            resource_id: None,
            warnings: Vec::new(),
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    /// No-ops, counted within `completed` as well.
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub operations: Vec<OperationResult>,
    pub summary: ExecutionSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl ExecutionResult {
    pub fn operation(&self, op_id: &str) -> Option<&OperationResult> {
        self.operations.iter().find(|o| o.op_id == op_id)
    }

    pub fn status_of(&self, op_id: &str) -> Option<OperationStatus> {
        self.operation(op_id).map(|o| o.status)
    }

    /// Recount the summary; every operation lands in exactly one bucket.
    pub fn summarize(&mut self) {
        let mut summary = ExecutionSummary {
            total: self.operations.len(),
            ..Default::default()
        };
        for op in &self.operations {
            match op.status {
                OperationStatus::Completed => {
                    summary.completed += 1;
                    if op.op_type == OperationType::NoOp {
                        summary.unchanged += 1;
                    }
                }
                OperationStatus::Failed => summary.failed += 1,
                // Never started before the run ended.
                OperationStatus::Cancelled | OperationStatus::Pending | OperationStatus::Running => {
                    summary.cancelled += 1
                }
                OperationStatus::Skipped => summary.skipped += 1,
            }
        }
        self.summary = summary;
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_buckets_sum_to_total() {
        let now = Utc::now();
        let mut result = ExecutionResult {
            run_id: "r".into(),
            project_id: "p".into(),
            status: RunStatus::Failed,
            started_at: now,
            finished_at: now,
            operations: Vec::new(),
            summary: ExecutionSummary::default(),
            errors: Vec::new(),
            cancel_reason: None,
        };
        for (i, status) in [
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Skipped,
            OperationStatus::Cancelled,
        ]
        .into_iter()
        .enumerate()
        {
            let mut op = OperationResult::pending(
                &format!("cluster:c{i}:create"),
                ResourceKind::Cluster,
                &format!("c{i}"),
                OperationType::Create,
            );
            op.status = status;
            result.operations.push(op);
        }
        result.summarize();
        let s = &result.summary;
        assert_eq!(s.completed + s.failed + s.cancelled + s.skipped, s.total);
        assert_eq!(s.total, 4);
    }
}
