//! Execution progress events.

use matlas_core::{OperationStatus, ResourceKind, RunStatus};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressEvent {
    RunStarted {
        run_id: String,
        project_id: String,
        operations: usize,
    },
    StageStarted {
        stage: usize,
        operations: usize,
    },
    OperationStarted {
        op_id: String,
        kind: ResourceKind,
        name: String,
        stage: usize,
    },
    OperationRetrying {
        op_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    OperationFinished {
        op_id: String,
        status: OperationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    RunFinished {
        status: RunStatus,
    },
}

impl ProgressEvent {
    pub(crate) fn retrying(op_id: &str, attempt: u32, delay: Duration, error: &str) -> Self {
        ProgressEvent::OperationRetrying {
            op_id: op_id.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
        }
    }
}

/// Receives progress events, serialized in completion order.
pub trait ProgressSink: Send + Sync {
    fn record(&self, event: ProgressEvent);
}

/// Logs every event through `tracing`.
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn record(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                run_id,
                project_id,
                operations,
            } => info!(run_id = %run_id, project_id = %project_id, operations, "run started"),
            ProgressEvent::StageStarted { stage, operations } => {
                info!(stage, operations, "stage started")
            }
            ProgressEvent::OperationStarted {
                op_id,
                kind,
                name,
                stage,
            } => info!(op_id = %op_id, kind = %kind, name = %name, stage, "operation started"),
            ProgressEvent::OperationRetrying {
                op_id,
                attempt,
                delay_ms,
                error,
            } => warn!(op_id = %op_id, attempt, delay_ms, error = %error, "retrying operation"),
            ProgressEvent::OperationFinished {
                op_id,
                status,
                detail,
            } => match status {
                OperationStatus::Failed => {
                    warn!(op_id = %op_id, status = %status, detail = ?detail, "operation finished")
                }
                _ => info!(op_id = %op_id, status = %status, detail = ?detail, "operation finished"),
            },
            ProgressEvent::RunFinished { status } => info!(status = ?status, "run finished"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Ids of operations in the order they finished.
    pub fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::OperationFinished { op_id, .. } => Some(op_id),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn record(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
