//! Service contracts the engine consumes.
//!
//! Every resource kind is served by a [`ResourceService`] over its typed
//! spec. Implementations must be safe for concurrent calls; the executor and
//! discovery share one [`Services`] across tasks for the length of a run.

use crate::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use matlas_core::resources::{
    AlertConfigSpec, ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, NetworkAccessSpec,
    NetworkContainerSpec, NetworkPeeringSpec, ProjectSpec, SearchIndexSpec, VpcEndpointSpec,
};
use matlas_core::{KindSpec, Observed, ProvisioningState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// CRUD over one resource kind within a project.
#[async_trait]
pub trait ResourceService<S: KindSpec>: Send + Sync {
    /// Every resource in one call, when the backend supports it.
    ///
    /// `Ok(None)` means "not supported"; callers fall back to [`list_page`].
    ///
    /// [`list_page`]: ResourceService::list_page
    async fn list_all(&self, _project_id: &str) -> Result<Option<Vec<Observed<S>>>, ServiceError> {
        Ok(None)
    }

    /// One page of results. `page` starts at 1.
    async fn list_page(
        &self,
        project_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Observed<S>>, ServiceError>;

    async fn get(&self, project_id: &str, id: &str) -> Result<Observed<S>, ServiceError>;

    async fn create(&self, project_id: &str, desired: &S) -> Result<Observed<S>, ServiceError>;

    async fn update(
        &self,
        project_id: &str,
        id: &str,
        desired: &S,
    ) -> Result<Observed<S>, ServiceError>;

    async fn delete(&self, project_id: &str, id: &str) -> Result<(), ServiceError>;

    /// Provisioning state, for kinds whose create completes asynchronously.
    async fn readiness(&self, project_id: &str, id: &str) -> Result<ProvisioningState, ServiceError> {
        Ok(self.get(project_id, id).await?.state)
    }
}

/// An alert currently open in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAlert {
    pub id: String,
    pub event_type_name: String,
    pub status: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

#[async_trait]
pub trait AlertsService: Send + Sync {
    async fn open_alerts(&self, project_id: &str) -> Result<Vec<OpenAlert>, ServiceError>;
}

/// Database credentials for a MongoDB-level connection.
#[derive(Clone, PartialEq, Eq)]
pub struct MongoCredentials {
    pub cluster: String,
    pub username: String,
    pub password: String,
    pub auth_database: String,
}

impl std::fmt::Debug for MongoCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCredentials")
            .field("cluster", &self.cluster)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth_database", &self.auth_database)
            .finish()
    }
}

/// Operations that go through a MongoDB connection instead of the Atlas API.
#[async_trait]
pub trait MongoAdminService: Send + Sync {
    /// Create the collection unless it exists. Returns `true` when created.
    async fn ensure_collection(
        &self,
        project_id: &str,
        credentials: &MongoCredentials,
        database: &str,
        collection: &str,
    ) -> Result<bool, ServiceError>;
}

/// One backend that serves every contract, such as the in-memory emulator.
pub trait AtlasBackend:
    ResourceService<ProjectSpec>
    + ResourceService<ClusterSpec>
    + ResourceService<NetworkContainerSpec>
    + ResourceService<NetworkPeeringSpec>
    + ResourceService<VpcEndpointSpec>
    + ResourceService<NetworkAccessSpec>
    + ResourceService<DatabaseRoleSpec>
    + ResourceService<DatabaseUserSpec>
    + ResourceService<SearchIndexSpec>
    + ResourceService<AlertConfigSpec>
    + AlertsService
    + MongoAdminService
{
}

impl<T> AtlasBackend for T where
    T: ResourceService<ProjectSpec>
        + ResourceService<ClusterSpec>
        + ResourceService<NetworkContainerSpec>
        + ResourceService<NetworkPeeringSpec>
        + ResourceService<VpcEndpointSpec>
        + ResourceService<NetworkAccessSpec>
        + ResourceService<DatabaseRoleSpec>
        + ResourceService<DatabaseUserSpec>
        + ResourceService<SearchIndexSpec>
        + ResourceService<AlertConfigSpec>
        + AlertsService
        + MongoAdminService
{
}

/// Every service a run needs, passed explicitly and shared across tasks.
#[derive(Clone)]
pub struct Services {
    pub projects: Arc<dyn ResourceService<ProjectSpec>>,
    pub clusters: Arc<dyn ResourceService<ClusterSpec>>,
    pub network_containers: Arc<dyn ResourceService<NetworkContainerSpec>>,
    pub network_peerings: Arc<dyn ResourceService<NetworkPeeringSpec>>,
    pub vpc_endpoints: Arc<dyn ResourceService<VpcEndpointSpec>>,
    pub network_access: Arc<dyn ResourceService<NetworkAccessSpec>>,
    pub database_roles: Arc<dyn ResourceService<DatabaseRoleSpec>>,
    pub database_users: Arc<dyn ResourceService<DatabaseUserSpec>>,
    pub search_indexes: Arc<dyn ResourceService<SearchIndexSpec>>,
    pub alert_configs: Arc<dyn ResourceService<AlertConfigSpec>>,
    pub alerts: Arc<dyn AlertsService>,
    pub mongo: Arc<dyn MongoAdminService>,
}

impl Services {
    /// Bind every contract to one backend.
    pub fn from_backend<B: AtlasBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            projects: backend.clone(),
            clusters: backend.clone(),
            network_containers: backend.clone(),
            network_peerings: backend.clone(),
            vpc_endpoints: backend.clone(),
            network_access: backend.clone(),
            database_roles: backend.clone(),
            database_users: backend.clone(),
            search_indexes: backend.clone(),
            alert_configs: backend.clone(),
            alerts: backend.clone(),
            mongo: backend,
        }
    }
}

/// A spec type with a service in [`Services`].
pub trait Managed: KindSpec {
    fn service(services: &Services) -> &dyn ResourceService<Self>;
}

macro_rules! managed {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl Managed for $ty {
                fn service(services: &Services) -> &dyn ResourceService<Self> {
                    services.$field.as_ref()
                }
            }
        )*
    };
}

managed! {
    ProjectSpec => projects,
    ClusterSpec => clusters,
    NetworkContainerSpec => network_containers,
    NetworkPeeringSpec => network_peerings,
    VpcEndpointSpec => vpc_endpoints,
    NetworkAccessSpec => network_access,
    DatabaseRoleSpec => database_roles,
    DatabaseUserSpec => database_users,
    SearchIndexSpec => search_indexes,
    AlertConfigSpec => alert_configs,
}
