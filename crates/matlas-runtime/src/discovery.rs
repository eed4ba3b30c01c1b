//! Project discovery: list every requested kind concurrently into a
//! [`ProjectState`] snapshot.
//!
//! A kind that fails to load is recorded on the snapshot and the rest still
//! load; callers decide whether a partial snapshot is good enough.

use crate::cancel::CancelToken;
use crate::dispatch;
use crate::error::{ServiceError, ServiceErrorKind};
use crate::retry::CallPolicy;
use crate::services::{OpenAlert, Services};
use futures::stream::{self, StreamExt};
use matlas_core::config::{DiscoveryConfig, ExecutionConfig};
use matlas_core::{ObservedResource, ProjectState, ResourceKind};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// A snapshot plus the typed error behind every kind that failed to load.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub state: ProjectState,
    pub failures: BTreeMap<ResourceKind, ServiceError>,
}

impl Discovery {
    /// The first credential failure, if any kind hit one.
    pub fn auth_failure(&self) -> Option<&ServiceError> {
        self.failures
            .values()
            .find(|err| err.kind == ServiceErrorKind::AuthN)
    }
}

/// Lists project resources through [`Services`].
#[derive(Clone)]
pub struct Discoverer {
    services: Services,
    config: DiscoveryConfig,
    execution: ExecutionConfig,
    cancel: CancelToken,
}

impl Discoverer {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            config: DiscoveryConfig::default(),
            execution: ExecutionConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Call timeout and retry policy come from the executor settings.
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Snapshot every kind.
    pub async fn discover_all(&self, project_id: &str) -> ProjectState {
        self.discover(project_id, &ResourceKind::ALL).await
    }

    /// Snapshot the given kinds. Duplicates are ignored.
    pub async fn discover(&self, project_id: &str, kinds: &[ResourceKind]) -> ProjectState {
        self.discover_detailed(project_id, kinds).await.state
    }

    /// Like [`discover`], keeping the typed error of each failed kind.
    ///
    /// [`discover`]: Discoverer::discover
    pub async fn discover_detailed(&self, project_id: &str, kinds: &[ResourceKind]) -> Discovery {
        let started = Instant::now();
        let mut wanted = kinds.to_vec();
        wanted.sort();
        wanted.dedup();

        let page_size = self.config.effective_page_size();
        let outcomes: Vec<(ResourceKind, Result<Vec<ObservedResource>, ServiceError>)> =
            stream::iter(wanted)
                .map(|kind| async move { (kind, self.list_kind(kind, project_id, page_size).await) })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut state = ProjectState::new(project_id);
        let mut failures = BTreeMap::new();
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(items) => state.insert(kind, items),
                Err(err) => {
                    warn!(kind = %kind, error = %err, "discovery failed for kind");
                    state.mark_error(kind, err.to_string());
                    failures.insert(kind, err);
                }
            }
        }
        info!(
            project_id = %project_id,
            resources = state.total(),
            partial = state.partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "discovery complete"
        );
        Discovery { state, failures }
    }

    async fn list_kind(
        &self,
        kind: ResourceKind,
        project_id: &str,
        page_size: usize,
    ) -> Result<Vec<ObservedResource>, ServiceError> {
        let policy = CallPolicy {
            retry: &self.execution.retry,
            call_timeout: self.execution.call_timeout,
            deadline: tokio::time::Instant::now() + self.execution.operation_timeout,
            cancel: &self.cancel,
        };
        policy
            .run(
                || dispatch::list(&self.services, kind, project_id, page_size),
                |attempt, err, delay| {
                    warn!(kind = %kind, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying list")
                },
            )
            .await
            .result
    }

    /// Alerts currently open in the project.
    pub async fn open_alerts(&self, project_id: &str) -> Result<Vec<OpenAlert>, ServiceError> {
        let policy = CallPolicy {
            retry: &self.execution.retry,
            call_timeout: self.execution.call_timeout,
            deadline: tokio::time::Instant::now() + self.execution.operation_timeout,
            cancel: &self.cancel,
        };
        policy
            .run(|| self.services.alerts.open_alerts(project_id), |_, _, _| {})
            .await
            .result
    }
}
