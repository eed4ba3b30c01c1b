//! Erased service calls: route a [`ResourceKind`] or [`ResourceSpec`] to the
//! typed service that owns it.

use crate::error::ServiceError;
use crate::services::{Managed, Services};
use matlas_core::resources::{
    AlertConfigSpec, ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, NetworkAccessSpec,
    NetworkContainerSpec, NetworkPeeringSpec, ProjectSpec, SearchIndexSpec, VpcEndpointSpec,
};
use matlas_core::{KindSpec, ObservedResource, ProvisioningState, ResourceKind, ResourceSpec};
use tracing::debug;

/// Bind `$S` to the spec type of `$kind` and evaluate `$body`.
macro_rules! by_kind {
    ($kind:expr, $S:ident => $body:expr) => {
        match $kind {
            ResourceKind::Project => { type $S = ProjectSpec; $body }
            ResourceKind::Cluster => { type $S = ClusterSpec; $body }
            ResourceKind::NetworkContainer => { type $S = NetworkContainerSpec; $body }
            ResourceKind::NetworkPeering => { type $S = NetworkPeeringSpec; $body }
            ResourceKind::VpcEndpoint => { type $S = VpcEndpointSpec; $body }
            ResourceKind::NetworkAccess => { type $S = NetworkAccessSpec; $body }
            ResourceKind::DatabaseRole => { type $S = DatabaseRoleSpec; $body }
            ResourceKind::DatabaseUser => { type $S = DatabaseUserSpec; $body }
            ResourceKind::SearchIndex => { type $S = SearchIndexSpec; $body }
            ResourceKind::AlertConfig => { type $S = AlertConfigSpec; $body }
        }
    };
}

fn typed<S: KindSpec>(spec: &ResourceSpec) -> Result<&S, ServiceError> {
    S::as_spec(spec).ok_or_else(|| {
        ServiceError::fatal(format!(
            "spec of kind {} routed to the {} service",
            spec.kind(),
            S::KIND
        ))
    })
}

/// Every resource of a kind, following pages until a short one.
pub async fn list(
    services: &Services,
    kind: ResourceKind,
    project_id: &str,
    page_size: usize,
) -> Result<Vec<ObservedResource>, ServiceError> {
    by_kind!(kind, S => list_typed::<S>(services, project_id, page_size).await)
}

async fn list_typed<S: Managed>(
    services: &Services,
    project_id: &str,
    page_size: usize,
) -> Result<Vec<ObservedResource>, ServiceError> {
    let svc = S::service(services);
    if let Some(all) = svc.list_all(project_id).await? {
        return Ok(all.into_iter().map(|o| o.erase()).collect());
    }
    let page_size = page_size.max(1);
    let mut out = Vec::new();
    let mut page = 1;
    loop {
        let items = svc.list_page(project_id, page, page_size).await?;
        let short = items.len() < page_size;
        debug!(kind = %S::KIND, page, items = items.len(), "listed page");
        out.extend(items.into_iter().map(|o| o.erase()));
        if short {
            return Ok(out);
        }
        page += 1;
    }
}

pub async fn get(
    services: &Services,
    kind: ResourceKind,
    project_id: &str,
    id: &str,
) -> Result<ObservedResource, ServiceError> {
    by_kind!(kind, S => Ok(S::service(services).get(project_id, id).await?.erase()))
}

pub async fn create(
    services: &Services,
    project_id: &str,
    spec: &ResourceSpec,
) -> Result<ObservedResource, ServiceError> {
    by_kind!(spec.kind(), S => {
        let desired = typed::<S>(spec)?;
        Ok(S::service(services).create(project_id, desired).await?.erase())
    })
}

pub async fn update(
    services: &Services,
    project_id: &str,
    id: &str,
    spec: &ResourceSpec,
) -> Result<ObservedResource, ServiceError> {
    by_kind!(spec.kind(), S => {
        let desired = typed::<S>(spec)?;
        Ok(S::service(services).update(project_id, id, desired).await?.erase())
    })
}

pub async fn delete(
    services: &Services,
    kind: ResourceKind,
    project_id: &str,
    id: &str,
) -> Result<(), ServiceError> {
    by_kind!(kind, S => S::service(services).delete(project_id, id).await)
}

pub async fn readiness(
    services: &Services,
    kind: ResourceKind,
    project_id: &str,
    id: &str,
) -> Result<ProvisioningState, ServiceError> {
    by_kind!(kind, S => S::service(services).readiness(project_id, id).await)
}
