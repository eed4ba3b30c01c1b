//! In-memory Atlas emulator.
//!
//! Implements every service contract over process-local state. Clusters and
//! network peerings provision asynchronously: they start `CREATING` and turn
//! `AVAILABLE` after a configurable number of readiness polls. Faults and
//! latency can be injected per call, and a write-forbidding mode turns every
//! mutating call into an error so dry runs can prove they never write.
//!
//! The state serializes to a JSON snapshot, which the CLI uses as a sandbox
//! backend between runs.

use crate::error::ServiceError;
use crate::services::{AlertsService, MongoAdminService, MongoCredentials, OpenAlert, ResourceService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matlas_core::resources::DatabaseUserSpec;
use matlas_core::{KindSpec, Observed, ObservedResource, ProvisioningState, ResourceKind, ResourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Calls and Faults
// =============================================================================

/// Service method, for fault matching and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    List,
    Get,
    Create,
    Update,
    Delete,
    Readiness,
    EnsureCollection,
    OpenAlerts,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::List => "list",
            Method::Get => "get",
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::Readiness => "readiness",
            Method::EnsureCollection => "ensure-collection",
            Method::OpenAlerts => "open-alerts",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Method::Create | Method::Update | Method::Delete | Method::EnsureCollection
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error the emulator returns instead of serving a matching call.
#[derive(Debug, Clone)]
pub struct Fault {
    pub method: Method,
    pub kind: Option<ResourceKind>,
    /// Natural key (create) or Atlas id (get/update/delete/readiness).
    pub target: Option<String>,
    pub error: ServiceError,
    /// How many matching calls fail; `None` means all of them.
    pub remaining: Option<u32>,
    /// Sleep before failing.
    pub delay: Duration,
}

impl Fault {
    pub fn new(method: Method, error: ServiceError) -> Self {
        Self {
            method,
            kind: None,
            target: None,
            error,
            remaining: None,
            delay: Duration::ZERO,
        }
    }

    pub fn on_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn on_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn matches(&self, method: Method, kind: Option<ResourceKind>, target: Option<&str>) -> bool {
        self.method == method
            && self.kind.is_none_or(|k| Some(k) == kind)
            && self
                .target
                .as_deref()
                .is_none_or(|t| Some(t) == target)
            && self.remaining != Some(0)
    }
}

/// Emulator tuning.
#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    /// Readiness polls before an asynchronously provisioned resource is
    /// `AVAILABLE`.
    pub provisioning_polls: u32,
    /// Added to every call.
    pub latency: Duration,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            provisioning_polls: 1,
            latency: Duration::ZERO,
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stored {
    observed: ObservedResource,
    #[serde(default)]
    pending_polls: u32,
    /// Database user password; never persisted or returned.
    #[serde(skip)]
    secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectData {
    #[serde(default)]
    resources: Vec<Stored>,
    #[serde(default)]
    alerts: Vec<OpenAlert>,
    /// `cluster/database.collection`
    #[serde(default)]
    collections: BTreeSet<String>,
}

impl ProjectData {
    fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Stored> {
        self.resources
            .iter()
            .filter(move |s| s.observed.kind() == kind)
    }

    fn position(&self, kind: ResourceKind, id: &str) -> Option<usize> {
        self.resources
            .iter()
            .position(|s| s.observed.kind() == kind && s.observed.id == id)
    }

    fn find_key(&self, kind: ResourceKind, key: &str) -> Option<&Stored> {
        self.of_kind(kind).find(|s| s.observed.natural_key() == key)
    }

    fn cluster(&self, name: &str) -> Option<&Stored> {
        self.find_key(ResourceKind::Cluster, name)
    }
}

/// Serialized form of the emulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    projects: BTreeMap<String, ProjectData>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot access state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not a valid snapshot: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("emulator state lock poisoned")]
    Poisoned,
}

// =============================================================================
// Emulator
// =============================================================================

/// An Atlas stand-in serving every contract from memory.
pub struct InMemoryAtlas {
    state: RwLock<Snapshot>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<String>>,
    options: EmulatorOptions,
    forbid_writes: AtomicBool,
    writes: AtomicUsize,
}

impl Default for InMemoryAtlas {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAtlas {
    pub fn new() -> Self {
        Self::with_options(EmulatorOptions::default())
    }

    pub fn with_options(options: EmulatorOptions) -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            options,
            forbid_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Load a snapshot file; a missing file yields an empty emulator.
    pub fn open(path: &Path, options: EmulatorOptions) -> Result<Self, StoreError> {
        let atlas = Self::with_options(options);
        if !path.exists() {
            return Ok(atlas);
        }
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: display.clone(),
            source,
        })?;
        let snapshot: Snapshot = if content.trim().is_empty() {
            Snapshot::default()
        } else {
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: display,
                source,
            })?
        };
        *atlas.state.write().map_err(|_| StoreError::Poisoned)? = snapshot;
        Ok(atlas)
    }

    /// Write the current state as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let display = path.display().to_string();
        let content = {
            let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
            serde_json::to_string_pretty(&*state).map_err(|source| StoreError::Json {
                path: display.clone(),
                source,
            })?
        };
        fs::write(path, content).map_err(|source| StoreError::Io {
            path: display,
            source,
        })
    }

    pub fn inject(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Reject every mutating call.
    pub fn forbid_writes(&self, forbid: bool) {
        self.forbid_writes.store(forbid, Ordering::SeqCst);
    }

    /// Mutating calls received, rejected ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every call received, e.g. `create Cluster c1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Insert an `AVAILABLE` resource without going through a service call.
    pub fn seed(&self, project_id: &str, spec: ResourceSpec) -> Result<ObservedResource, ServiceError> {
        self.write(|state| {
            let data = state.projects.entry(project_id.to_string()).or_default();
            let (spec, secret) = strip_secret(spec.normalized());
            let id = if spec.kind() == ResourceKind::Project {
                project_id.to_string()
            } else {
                new_id()
            };
            let observed = observe(id, spec, ProvisioningState::Available);
            data.resources.push(Stored {
                observed: observed.clone(),
                pending_polls: 0,
                secret,
            });
            Ok(observed)
        })
    }

    /// Open an alert in a project.
    pub fn raise_alert(&self, project_id: &str, alert: OpenAlert) -> Result<(), ServiceError> {
        self.write(|state| {
            state
                .projects
                .entry(project_id.to_string())
                .or_default()
                .alerts
                .push(alert);
            Ok(())
        })
    }

    /// Everything a project holds, in insertion order.
    pub fn resources(&self, project_id: &str) -> Vec<ObservedResource> {
        self.read(|state| {
            Ok(state
                .projects
                .get(project_id)
                .map(|d| d.resources.iter().map(|s| s.observed.clone()).collect())
                .unwrap_or_default())
        })
        .unwrap_or_default()
    }

    /// Collections created through the MongoDB admin contract.
    pub fn collections(&self, project_id: &str) -> Vec<String> {
        self.read(|state| {
            Ok(state
                .projects
                .get(project_id)
                .map(|d| d.collections.iter().cloned().collect())
                .unwrap_or_default())
        })
        .unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> Result<T, ServiceError>) -> Result<T, ServiceError> {
        let state = self
            .state
            .read()
            .map_err(|e| ServiceError::fatal(format!("failed to acquire read lock: {e}")))?;
        f(&state)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ServiceError::fatal(format!("failed to acquire write lock: {e}")))?;
        f(&mut state)
    }

    /// Log the call, apply latency, then any matching fault.
    async fn enter(
        &self,
        method: Method,
        kind: Option<ResourceKind>,
        target: Option<&str>,
    ) -> Result<(), ServiceError> {
        let label = match (kind, target) {
            (Some(kind), Some(target)) => format!("{method} {kind} {target}"),
            (Some(kind), None) => format!("{method} {kind}"),
            (None, Some(target)) => format!("{method} {target}"),
            (None, None) => method.to_string(),
        };
        debug!(call = %label, "emulator call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(label);
        }
        if method.is_write() {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.forbid_writes.load(Ordering::SeqCst) {
                return Err(ServiceError::fatal(format!(
                    "{method} called on a backend that forbids writes"
                )));
            }
        }
        if !self.options.latency.is_zero() {
            tokio::time::sleep(self.options.latency).await;
        }
        let fault = self.faults.lock().ok().and_then(|mut faults| {
            let fault = faults.iter_mut().find(|f| f.matches(method, kind, target))?;
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            Some((fault.error.clone(), fault.delay))
        });
        if let Some((error, delay)) = fault {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return Err(error);
        }
        Ok(())
    }

    fn list_kind(&self, project_id: &str, kind: ResourceKind) -> Result<Vec<ObservedResource>, ServiceError> {
        self.read(|state| {
            let mut items: Vec<ObservedResource> = state
                .projects
                .get(project_id)
                .map(|d| d.of_kind(kind).map(|s| s.observed.clone()).collect())
                .unwrap_or_default();
            items.sort_by_key(|o| o.natural_key());
            Ok(items)
        })
    }

    fn get_kind(&self, project_id: &str, kind: ResourceKind, id: &str) -> Result<ObservedResource, ServiceError> {
        self.read(|state| {
            state
                .projects
                .get(project_id)
                .and_then(|d| d.position(kind, id).map(|i| d.resources[i].observed.clone()))
                .ok_or_else(|| missing(kind, id))
        })
    }

    fn create_kind(&self, project_id: &str, desired: ResourceSpec) -> Result<ObservedResource, ServiceError> {
        let kind = desired.kind();
        let polls = self.options.provisioning_polls;
        self.write(|state| {
            let (spec, secret) = strip_secret(desired.normalized());
            let key = spec.natural_key();

            if kind == ResourceKind::Project {
                let taken = state
                    .projects
                    .get(project_id)
                    .is_some_and(|d| d.of_kind(ResourceKind::Project).next().is_some());
                let id = if project_id.is_empty() || taken {
                    new_id()
                } else {
                    project_id.to_string()
                };
                let observed = observe(id.clone(), spec, ProvisioningState::Available);
                state.projects.entry(id).or_default().resources.push(Stored {
                    observed: observed.clone(),
                    pending_polls: 0,
                    secret,
                });
                return Ok(observed);
            }

            let data = state.projects.entry(project_id.to_string()).or_default();
            if data.find_key(kind, &key).is_some() {
                return Err(ServiceError::conflict(format!("{kind} '{key}' already exists")));
            }
            if let ResourceSpec::SearchIndex(index) = &spec {
                if data.cluster(&index.cluster_name).is_none() {
                    return Err(ServiceError::not_found(format!(
                        "cluster '{}' not found",
                        index.cluster_name
                    )));
                }
                let collection = format!(
                    "{}/{}.{}",
                    index.cluster_name, index.database_name, index.collection_name
                );
                if !data.collections.contains(&collection) {
                    return Err(ServiceError::validation(format!(
                        "collection {}.{} does not exist on cluster '{}'",
                        index.database_name, index.collection_name, index.cluster_name
                    )));
                }
            }

            let (state_now, pending) = if kind.is_async_provisioned() && polls > 0 {
                (ProvisioningState::Creating, polls)
            } else {
                (ProvisioningState::Available, 0)
            };
            let observed = observe(new_id(), spec, state_now);
            data.resources.push(Stored {
                observed: observed.clone(),
                pending_polls: pending,
                secret,
            });
            Ok(observed)
        })
    }

    fn update_kind(
        &self,
        project_id: &str,
        id: &str,
        desired: ResourceSpec,
    ) -> Result<ObservedResource, ServiceError> {
        let kind = desired.kind();
        let polls = self.options.provisioning_polls;
        self.write(|state| {
            let data = state
                .projects
                .get_mut(project_id)
                .ok_or_else(|| missing(kind, id))?;
            let i = data.position(kind, id).ok_or_else(|| missing(kind, id))?;
            let (spec, secret) = strip_secret(desired.normalized());
            let stored = &mut data.resources[i];
            stored.observed.spec = spec;
            stored.observed.updated_at = Utc::now();
            if secret.is_some() {
                stored.secret = secret;
            }
            if kind.is_async_provisioned() && polls > 0 {
                stored.observed.state = ProvisioningState::Updating;
                stored.pending_polls = polls;
            }
            Ok(stored.observed.clone())
        })
    }

    fn delete_kind(&self, project_id: &str, kind: ResourceKind, id: &str) -> Result<(), ServiceError> {
        self.write(|state| {
            let data = state
                .projects
                .get_mut(project_id)
                .ok_or_else(|| missing(kind, id))?;
            let i = data.position(kind, id).ok_or_else(|| missing(kind, id))?;
            match &data.resources[i].observed.spec {
                ResourceSpec::Project(_) => {
                    if data.of_kind(ResourceKind::Cluster).next().is_some() {
                        return Err(ServiceError::conflict(
                            "project still has clusters; delete them first",
                        ));
                    }
                    state.projects.remove(project_id);
                    return Ok(());
                }
                ResourceSpec::Cluster(cluster) => {
                    let prefix = format!("{}/", cluster.name);
                    data.collections.retain(|c| !c.starts_with(&prefix));
                    let name = cluster.name.clone();
                    data.resources.retain(|s| match &s.observed.spec {
                        ResourceSpec::SearchIndex(index) => index.cluster_name != name,
                        _ => true,
                    });
                }
                _ => {}
            }
            if let Some(i) = data.position(kind, id) {
                data.resources.remove(i);
            }
            Ok(())
        })
    }

    /// One readiness poll: advances provisioning by a step.
    fn poll_kind(&self, project_id: &str, kind: ResourceKind, id: &str) -> Result<ProvisioningState, ServiceError> {
        self.write(|state| {
            let data = state
                .projects
                .get_mut(project_id)
                .ok_or_else(|| missing(kind, id))?;
            let i = data.position(kind, id).ok_or_else(|| missing(kind, id))?;
            let stored = &mut data.resources[i];
            if stored.pending_polls > 0 {
                stored.pending_polls -= 1;
                if stored.pending_polls == 0 {
                    stored.observed.state = ProvisioningState::Available;
                    stored.observed.updated_at = Utc::now();
                }
            }
            Ok(stored.observed.state)
        })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..24].to_string()
}

fn missing(kind: ResourceKind, id: &str) -> ServiceError {
    ServiceError::not_found(format!("{kind} '{id}' not found"))
}

fn observe(id: String, spec: ResourceSpec, state: ProvisioningState) -> ObservedResource {
    let now = Utc::now();
    let connection_string = match &spec {
        ResourceSpec::Cluster(c) => Some(format!(
            "mongodb+srv://{}.{}.mongodb.net",
            c.name.to_ascii_lowercase(),
            &id[..id.len().min(5)]
        )),
        _ => None,
    };
    Observed {
        id,
        spec,
        created_at: now,
        updated_at: now,
        state,
        connection_string,
    }
}

/// Atlas never returns passwords; keep them aside.
fn strip_secret(spec: ResourceSpec) -> (ResourceSpec, Option<String>) {
    match spec {
        ResourceSpec::DatabaseUser(mut user) => {
            let secret = user.password.take();
            (ResourceSpec::DatabaseUser(user), secret)
        }
        other => (other, None),
    }
}

fn typed<S: KindSpec>(observed: ObservedResource) -> Result<Observed<S>, ServiceError> {
    let kind = observed.kind();
    observed
        .typed::<S>()
        .ok_or_else(|| ServiceError::fatal(format!("stored {kind} is not a {}", S::KIND)))
}

#[async_trait]
impl<S: KindSpec> ResourceService<S> for InMemoryAtlas {
    async fn list_page(
        &self,
        project_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Observed<S>>, ServiceError> {
        self.enter(Method::List, Some(S::KIND), None).await?;
        let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
        self.list_kind(project_id, S::KIND)?
            .into_iter()
            .skip(start)
            .take(page_size)
            .map(typed::<S>)
            .collect()
    }

    async fn get(&self, project_id: &str, id: &str) -> Result<Observed<S>, ServiceError> {
        self.enter(Method::Get, Some(S::KIND), Some(id)).await?;
        typed(self.get_kind(project_id, S::KIND, id)?)
    }

    async fn create(&self, project_id: &str, desired: &S) -> Result<Observed<S>, ServiceError> {
        let key = desired.natural_key();
        self.enter(Method::Create, Some(S::KIND), Some(&key)).await?;
        typed(self.create_kind(project_id, desired.clone().into_spec())?)
    }

    async fn update(&self, project_id: &str, id: &str, desired: &S) -> Result<Observed<S>, ServiceError> {
        self.enter(Method::Update, Some(S::KIND), Some(id)).await?;
        typed(self.update_kind(project_id, id, desired.clone().into_spec())?)
    }

    async fn delete(&self, project_id: &str, id: &str) -> Result<(), ServiceError> {
        self.enter(Method::Delete, Some(S::KIND), Some(id)).await?;
        self.delete_kind(project_id, S::KIND, id)
    }

    async fn readiness(&self, project_id: &str, id: &str) -> Result<ProvisioningState, ServiceError> {
        self.enter(Method::Readiness, Some(S::KIND), Some(id)).await?;
        self.poll_kind(project_id, S::KIND, id)
    }
}

#[async_trait]
impl AlertsService for InMemoryAtlas {
    async fn open_alerts(&self, project_id: &str) -> Result<Vec<OpenAlert>, ServiceError> {
        self.enter(Method::OpenAlerts, None, None).await?;
        self.read(|state| {
            Ok(state
                .projects
                .get(project_id)
                .map(|d| {
                    d.alerts
                        .iter()
                        .filter(|a| a.status == "OPEN")
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

/// Roles that may create a collection in `database`.
fn can_create_collection(user: &DatabaseUserSpec, database: &str) -> bool {
    user.roles.iter().any(|r| match r.role_name.as_str() {
        "atlasAdmin" | "readWriteAnyDatabase" | "dbAdminAnyDatabase" => true,
        "readWrite" | "dbAdmin" | "dbOwner" => r.database_name == database,
        _ => false,
    })
}

#[async_trait]
impl MongoAdminService for InMemoryAtlas {
    async fn ensure_collection(
        &self,
        project_id: &str,
        credentials: &MongoCredentials,
        database: &str,
        collection: &str,
    ) -> Result<bool, ServiceError> {
        let target = format!("{}/{database}.{collection}", credentials.cluster);
        self.enter(Method::EnsureCollection, None, Some(&target)).await?;
        let now = Utc::now();
        self.write(|state| {
            let data = state
                .projects
                .get_mut(project_id)
                .ok_or_else(|| ServiceError::not_found(format!("project '{project_id}' not found")))?;
            let key = format!("{}/{}", credentials.auth_database, credentials.username);
            let stored = data
                .find_key(ResourceKind::DatabaseUser, &key)
                .ok_or_else(|| ServiceError::authn("authentication failed"))?;
            if stored.secret.as_deref() != Some(credentials.password.as_str()) {
                return Err(ServiceError::authn("authentication failed"));
            }
            let ResourceSpec::DatabaseUser(user) = &stored.observed.spec else {
                return Err(ServiceError::authn("authentication failed"));
            };
            let expired = user
                .delete_after_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .is_some_and(|d| d.with_timezone(&Utc) <= now);
            if expired {
                return Err(ServiceError::authn("user has expired"));
            }
            let in_scope = user.scopes.is_empty()
                || user
                    .scopes
                    .iter()
                    .any(|s| s.is_cluster() && s.name == credentials.cluster);
            if !in_scope {
                return Err(ServiceError::authn(format!(
                    "user is not scoped to cluster '{}'",
                    credentials.cluster
                )));
            }
            if !can_create_collection(user, database) {
                return Err(ServiceError::authn(format!(
                    "user is not authorized to create collections in '{database}'"
                )));
            }
            match data.cluster(&credentials.cluster) {
                None => {
                    return Err(ServiceError::not_found(format!(
                        "cluster '{}' not found",
                        credentials.cluster
                    )))
                }
                Some(c) if c.observed.state != ProvisioningState::Available => {
                    return Err(ServiceError::transient(format!(
                        "cluster '{}' is {}",
                        credentials.cluster, c.observed.state
                    )))
                }
                Some(_) => {}
            }
            let name = format!("{}/{database}.{collection}", credentials.cluster);
            Ok(data.collections.insert(name))
        })
    }
}
