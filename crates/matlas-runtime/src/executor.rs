//! Plan execution.
//!
//! Stages run in order. Within a stage, operations run as independent tasks
//! bounded by a semaphore; the executor joins every task before the next
//! stage starts. An operation runs only when all of its dependencies
//! completed, otherwise it is skipped. Nothing is rolled back: the result
//! describes exactly what happened and a later apply converges the rest.

use crate::cancel::CancelToken;
use crate::dispatch;
use crate::error::{ExecuteError, ServiceError, ServiceErrorKind, TempUserError};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::retry::CallPolicy;
use crate::services::Services;
use crate::tempuser::{AccessTier, TempUserManager, TempUserRequest};
use chrono::Utc;
use futures::FutureExt;
use matlas_core::config::{ExecutionConfig, TempUsersConfig, MAX_PAGE_SIZE};
use matlas_core::resources::SearchIndexSpec;
use matlas_core::{
    ExecutionResult, ExecutionSummary, ObservedResource, OperationError, OperationResult,
    OperationStatus, OperationType, Plan, PlannedOperation, ProvisioningState, ResourceKind,
    ResourceSpec, RunStatus,
};
use matlas_planner::{diff_specs, is_topologically_consistent};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Executor
// =============================================================================

/// Executes plans for one project.
pub struct Executor {
    services: Services,
    project_id: String,
    config: ExecutionConfig,
    temp_users: TempUsersConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    run_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(services: Services, project_id: impl Into<String>) -> Self {
        Self {
            services,
            project_id: project_id.into(),
            config: ExecutionConfig::default(),
            temp_users: TempUsersConfig::default(),
            progress: Arc::new(TracingProgressSink),
            cancel: CancelToken::new(),
            run_timeout: None,
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temp_users(mut self, config: TempUsersConfig) -> Self {
        self.temp_users = config;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancel the run with reason `run-deadline` once `timeout` elapses.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute `plan`. Errors only when the plan cannot be started; every
    /// per-operation outcome is reported in the result.
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionResult, ExecuteError> {
        if !plan.project_id.is_empty() && plan.project_id != self.project_id {
            return Err(ExecuteError::ProjectMismatch {
                plan: plan.project_id.clone(),
                run: self.project_id.clone(),
            });
        }
        if !is_topologically_consistent(plan) {
            return Err(ExecuteError::InconsistentPlan);
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let run = Arc::new(Run {
            services: self.services.clone(),
            config: self.config.clone(),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
            temp_users: TempUserManager::new(
                self.services.clone(),
                self.project_id.clone(),
                self.temp_users.clone(),
            )
            .with_execution(self.config.clone()),
            project_id: RwLock::new(self.project_id.clone()),
            fatal: Mutex::new(None),
        });
        let deadline = self.run_timeout.map(|t| self.cancel.cancel_after(t));

        info!(run_id = %run_id, project_id = %self.project_id, operations = plan.operations.len(), "executing plan");
        self.progress.record(ProgressEvent::RunStarted {
            run_id: run_id.clone(),
            project_id: self.project_id.clone(),
            operations: plan.operations.len(),
        });

        let mut results: Vec<OperationResult> = plan
            .operations
            .iter()
            .map(|op| OperationResult::pending(&op.id, op.kind, &op.name, op.op_type))
            .collect();
        let index: HashMap<String, usize> = plan
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| (op.id.clone(), i))
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_operations.max(1)));

        // No-ops finish without running.
        for op in plan.operations.iter().filter(|op| !op.op_type.is_mutation()) {
            let result = &mut results[index[&op.id]];
            set_status(result, OperationStatus::Completed);
            result.resource_id = op.target_id().map(str::to_string);
        }

        for (stage, ops) in plan.stages() {
            let mutations: Vec<&PlannedOperation> =
                ops.into_iter().filter(|op| op.op_type.is_mutation()).collect();
            if mutations.is_empty() {
                continue;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            debug!(stage, operations = mutations.len(), "stage started");
            self.progress.record(ProgressEvent::StageStarted {
                stage,
                operations: mutations.len(),
            });

            let mut tasks = JoinSet::new();
            for op in mutations {
                let unmet = op.dependencies.iter().find_map(|dep| {
                    let status = results[index[dep]].status;
                    (status != OperationStatus::Completed).then_some((dep, status))
                });
                if let Some((dep, status)) = unmet {
                    let reason = format!("dependency {dep} {status}");
                    let result = &mut results[index[&op.id]];
                    set_status(result, OperationStatus::Skipped);
                    result.reason = Some(reason.clone());
                    info!(op_id = %op.id, reason = %reason, "operation skipped");
                    self.progress.record(ProgressEvent::OperationFinished {
                        op_id: op.id.clone(),
                        status: OperationStatus::Skipped,
                        detail: Some(reason),
                    });
                    continue;
                }
                tasks.spawn(Arc::clone(&run).execute(op.clone(), Arc::clone(&semaphore)));
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => {
                        self.progress.record(ProgressEvent::OperationFinished {
                            op_id: outcome.op_id.clone(),
                            status: outcome.status,
                            detail: detail(&outcome),
                        });
                        if let Some(&i) = index.get(&outcome.op_id) {
                            results[i] = outcome;
                        }
                    }
                    Err(err) => warn!(error = %err, "operation task ended abnormally"),
                }
            }
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        let cancel_reason = self.cancel.reason();
        for result in results.iter_mut().filter(|r| r.status == OperationStatus::Pending) {
            set_status(result, OperationStatus::Cancelled);
            result.reason = Some(
                cancel_reason
                    .clone()
                    .unwrap_or_else(|| "run ended before the operation started".into()),
            );
        }

        let mut errors: Vec<String> = results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: [{}] {}", r.op_id, e.code, e.message))
            })
            .collect();
        if let Err(err) = run.temp_users.release_all().await {
            warn!(error = %err, "temporary users left behind");
            errors.push(format!("[{}] {err}", err.code()));
        }

        let fatal = run.fatal.lock().ok().and_then(|f| f.clone());
        let any_cancelled = results.iter().any(|r| r.status == OperationStatus::Cancelled);
        let any_failed = results
            .iter()
            .any(|r| matches!(r.status, OperationStatus::Failed | OperationStatus::Skipped));
        let status = if fatal.is_some() || (any_failed && !any_cancelled) {
            RunStatus::Failed
        } else if any_cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };

        let mut result = ExecutionResult {
            run_id,
            project_id: run.project_id(),
            status,
            started_at,
            finished_at: Utc::now(),
            operations: results,
            summary: ExecutionSummary::default(),
            errors,
            cancel_reason: if status == RunStatus::Succeeded {
                None
            } else {
                fatal.or(cancel_reason)
            },
        };
        result.summarize();
        info!(
            status = ?result.status,
            completed = result.summary.completed,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            cancelled = result.summary.cancelled,
            "plan executed"
        );
        self.progress.record(ProgressEvent::RunFinished { status });
        Ok(result)
    }
}

/// Copy per-operation outcomes back onto the plan.
pub fn record_statuses(plan: &mut Plan, result: &ExecutionResult) {
    for outcome in &result.operations {
        if let Some(op) = plan.get_mut(&outcome.op_id) {
            op.status = outcome.status;
        }
    }
}

fn set_status(result: &mut OperationResult, next: OperationStatus) {
    if result.status.can_transition_to(next) {
        result.status = next;
        if next.is_terminal() {
            result.completed_at = Some(Utc::now());
        }
    } else {
        warn!(op_id = %result.op_id, from = %result.status, to = %next, "illegal status transition ignored");
    }
}

fn detail(result: &OperationResult) -> Option<String> {
    if let Some(err) = &result.error {
        return Some(err.message.clone());
    }
    if let Some(reason) = &result.reason {
        return Some(reason.clone());
    }
    (!result.warnings.is_empty()).then(|| result.warnings.join("; "))
}

// =============================================================================
// Operations
// =============================================================================

enum Failure {
    Service(ServiceError),
    TempUser(TempUserError),
    Malformed(String),
}

impl From<ServiceError> for Failure {
    fn from(err: ServiceError) -> Self {
        Failure::Service(err)
    }
}

impl From<TempUserError> for Failure {
    fn from(err: TempUserError) -> Self {
        Failure::TempUser(err)
    }
}

impl Failure {
    fn to_error(&self) -> OperationError {
        match self {
            Failure::Service(err) => OperationError {
                code: err.code().to_string(),
                message: err.to_string(),
                suggestion: err.suggestion().map(str::to_string),
            },
            Failure::TempUser(err) => OperationError {
                code: err.code().to_string(),
                message: err.to_string(),
                suggestion: Some("check that temporary database users can be created in the project".into()),
            },
            Failure::Malformed(message) => OperationError {
                code: "MATLAS-EXEC-100".into(),
                message: message.clone(),
                suggestion: Some("re-run plan to regenerate the plan file".into()),
            },
        }
    }
}

/// State shared by the tasks of one run.
struct Run {
    services: Services,
    config: ExecutionConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    temp_users: TempUserManager,
    /// Replaced when the plan creates the project under a different id.
    project_id: RwLock<String>,
    /// Set by a run-fatal failure.
    fatal: Mutex<Option<String>>,
}

impl Run {
    fn project_id(&self) -> String {
        self.project_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_default()
    }

    fn adopt_project(&self, id: &str) {
        if let Ok(mut current) = self.project_id.write() {
            if *current != id {
                info!(from = %current, to = %id, "project created under a new id");
                *current = id.to_string();
            }
        }
    }

    fn cancelled(&self, result: &mut OperationResult) {
        set_status(result, OperationStatus::Cancelled);
        result.reason = Some(self.cancel.reason().unwrap_or_else(|| "cancelled".into()));
    }

    async fn execute(self: Arc<Self>, op: PlannedOperation, slots: Arc<Semaphore>) -> OperationResult {
        let mut result = OperationResult::pending(&op.id, op.kind, &op.name, op.op_type);
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = slots.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.cancelled(&mut result);
            return result;
        };
        if self.cancel.is_cancelled() {
            self.cancelled(&mut result);
            return result;
        }

        set_status(&mut result, OperationStatus::Running);
        result.started_at = Some(Utc::now());
        info!(op_id = %op.id, kind = %op.kind, name = %op.name, stage = op.stage, "operation started");
        self.progress.record(ProgressEvent::OperationStarted {
            op_id: op.id.clone(),
            kind: op.kind,
            name: op.name.clone(),
            stage: op.stage,
        });

        let outcome = AssertUnwindSafe(self.perform(&op, &mut result))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => set_status(&mut result, OperationStatus::Completed),
            Ok(Err(Failure::Service(err))) if err.kind == ServiceErrorKind::Cancelled => {
                self.cancelled(&mut result)
            }
            Ok(Err(failure)) => {
                if let Failure::Service(err) = &failure {
                    if err.kind == ServiceErrorKind::AuthN {
                        let reason = format!("authentication failed: {}", err.message);
                        if let Ok(mut fatal) = self.fatal.lock() {
                            fatal.get_or_insert(reason.clone());
                        }
                        self.cancel.cancel(reason);
                    }
                }
                let error = failure.to_error();
                warn!(op_id = %op.id, code = %error.code, error = %error.message, "operation failed");
                result.error = Some(error);
                set_status(&mut result, OperationStatus::Failed);
            }
            Err(_) => {
                result.error = Some(OperationError {
                    code: "MATLAS-EXEC-100".into(),
                    message: "operation panicked".into(),
                    suggestion: None,
                });
                set_status(&mut result, OperationStatus::Failed);
            }
        }
        result
    }

    async fn perform(&self, op: &PlannedOperation, result: &mut OperationResult) -> Result<(), Failure> {
        let deadline = Instant::now() + self.config.operation_timeout_for(op.kind);
        let policy = CallPolicy {
            retry: &self.config.retry,
            call_timeout: self.config.call_timeout,
            deadline,
            cancel: &self.cancel,
        };
        let on_retry = |attempt: u32, err: &ServiceError, delay: Duration| {
            self.progress
                .record(ProgressEvent::retrying(&op.id, attempt, delay, &err.to_string()));
        };
        let project_id = self.project_id();
        let services = &self.services;

        match op.op_type {
            OperationType::NoOp => {
                result.resource_id = op.target_id().map(str::to_string);
                Ok(())
            }
            OperationType::Create => {
                let desired = op
                    .desired
                    .as_ref()
                    .ok_or_else(|| Failure::Malformed(format!("{} carries no desired spec", op.id)))?;
                if let ResourceSpec::SearchIndex(index) = desired {
                    self.prepare_collection(&project_id, index, &policy, result)
                        .await?;
                }
                let attempted = policy
                    .run(|| dispatch::create(services, &project_id, desired), on_retry)
                    .await;
                result.retry_count += attempted.retries;
                let observed = match attempted.result {
                    Ok(observed) => observed,
                    Err(err) if err.kind == ServiceErrorKind::Conflict => {
                        self.adopt_existing(&project_id, desired, &policy, result)
                            .await?
                    }
                    Err(err) => return Err(err.into()),
                };
                result.resource_id = Some(observed.id.clone());
                if op.kind == ResourceKind::Project {
                    self.adopt_project(&observed.id);
                }
                if op.kind.is_async_provisioned() && observed.state != ProvisioningState::Available {
                    self.await_ready(&project_id, op, &observed.id, deadline, result)
                        .await?;
                }
                Ok(())
            }
            OperationType::Update => {
                let desired = op
                    .desired
                    .as_ref()
                    .ok_or_else(|| Failure::Malformed(format!("{} carries no desired spec", op.id)))?;
                let id = op
                    .target_id()
                    .ok_or_else(|| Failure::Malformed(format!("{} has no target id", op.id)))?;
                let attempted = policy
                    .run(|| dispatch::update(services, &project_id, id, desired), on_retry)
                    .await;
                result.retry_count += attempted.retries;
                let observed = attempted.result?;
                result.resource_id = Some(observed.id.clone());
                if op.kind.is_async_provisioned() && observed.state != ProvisioningState::Available {
                    self.await_ready(&project_id, op, &observed.id, deadline, result)
                        .await?;
                }
                Ok(())
            }
            OperationType::Delete => {
                let id = op
                    .target_id()
                    .ok_or_else(|| Failure::Malformed(format!("{} has no target id", op.id)))?;
                let attempted = policy
                    .run(|| dispatch::delete(services, op.kind, &project_id, id), on_retry)
                    .await;
                result.retry_count += attempted.retries;
                result.resource_id = Some(id.to_string());
                match attempted.result {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind == ServiceErrorKind::NotFound => {
                        result
                            .warnings
                            .push(format!("{} {} was already deleted", op.kind, op.name));
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// A create hit an existing resource: succeed only if it already matches.
    async fn adopt_existing(
        &self,
        project_id: &str,
        desired: &ResourceSpec,
        policy: &CallPolicy<'_>,
        result: &mut OperationResult,
    ) -> Result<ObservedResource, Failure> {
        let kind = desired.kind();
        let key = desired.natural_key();
        let existing = policy
            .run(
                || dispatch::list(&self.services, kind, project_id, MAX_PAGE_SIZE),
                |_, _, _| {},
            )
            .await
            .result?
            .into_iter()
            .find(|o| o.natural_key() == key);
        let Some(existing) = existing else {
            return Err(ServiceError::conflict(format!(
                "{kind} '{key}' conflicts with a resource that cannot be listed"
            ))
            .into());
        };
        let diff = diff_specs(desired, &existing.spec, false);
        if diff.is_empty() {
            info!(kind = %kind, key = %key, "create found an identical resource; adopting it");
            result
                .warnings
                .push(format!("{kind} '{key}' already existed with matching settings"));
            Ok(existing)
        } else {
            let paths: Vec<&str> = diff.changes.iter().map(|c| c.path.as_str()).collect();
            Err(ServiceError::conflict(format!(
                "{kind} '{key}' already exists with different settings ({})",
                paths.join(", ")
            ))
            .into())
        }
    }

    /// Poll readiness until `AVAILABLE`, `FAILED`, or the post-condition
    /// window closes. A closed window or a cancellation downgrades to a
    /// warning.
    async fn await_ready(
        &self,
        project_id: &str,
        op: &PlannedOperation,
        id: &str,
        deadline: Instant,
        result: &mut OperationResult,
    ) -> Result<(), Failure> {
        let limit = (Instant::now() + self.config.post_condition_timeout).min(deadline);
        let policy = CallPolicy {
            retry: &self.config.retry,
            call_timeout: self.config.call_timeout,
            deadline: limit,
            cancel: &self.cancel,
        };
        let verb = if op.op_type == OperationType::Create { "created" } else { "updated" };
        let mut last = ProvisioningState::Unknown;
        loop {
            match policy
                .once(dispatch::readiness(&self.services, op.kind, project_id, id))
                .await
            {
                Ok(ProvisioningState::Available) => {
                    debug!(op_id = %op.id, "resource is available");
                    return Ok(());
                }
                Ok(ProvisioningState::Failed) => {
                    return Err(ServiceError::fatal(format!(
                        "{} {} entered FAILED while provisioning",
                        op.kind, op.name
                    ))
                    .into());
                }
                Ok(state) => last = state,
                Err(err) if err.kind == ServiceErrorKind::Cancelled => {
                    result
                        .warnings
                        .push(format!("{verb}, cancelled before AVAILABLE (last state {last})"));
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    debug!(op_id = %op.id, error = %err, "readiness poll failed");
                }
                Err(err) => return Err(err.into()),
            }
            if Instant::now() + self.config.poll_interval >= limit {
                warn!(op_id = %op.id, state = %last, "post-condition window closed");
                result
                    .warnings
                    .push(format!("{verb}, not yet AVAILABLE (last state {last})"));
                return Ok(());
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                () = self.cancel.cancelled() => {
                    result
                        .warnings
                        .push(format!("{verb}, cancelled before AVAILABLE (last state {last})"));
                    return Ok(());
                }
            }
        }
    }

    /// Make sure the index's collection exists, through a maintenance user
    /// scoped to the index's cluster.
    async fn prepare_collection(
        &self,
        project_id: &str,
        index: &SearchIndexSpec,
        policy: &CallPolicy<'_>,
        result: &mut OperationResult,
    ) -> Result<(), Failure> {
        let request = TempUserRequest::new(
            "search-index",
            AccessTier::Maintenance,
            index.cluster_name.clone(),
        );
        let guard = self.temp_users.acquire(&request).await?;
        let credentials = guard.credentials(&index.cluster_name);
        let attempted = policy
            .run(
                || {
                    self.services.mongo.ensure_collection(
                        project_id,
                        &credentials,
                        &index.database_name,
                        &index.collection_name,
                    )
                },
                |_, _, _| {},
            )
            .await;
        let released = guard.release().await;
        result.retry_count += attempted.retries;
        let created = attempted.result?;
        if let Err(err) = released {
            result
                .warnings
                .push(format!("temporary user cleanup deferred: {err}"));
        }
        if created {
            info!(
                cluster = %index.cluster_name,
                collection = %format!("{}.{}", index.database_name, index.collection_name),
                "collection created for search index"
            );
        }
        Ok(())
    }
}
