//! Observed Atlas state.

use crate::kind::ResourceKind;
use crate::manifest::{ApplyDocument, Metadata, Resource, sanitize_name, DEFAULT_API_VERSION};
use crate::resources::{KindSpec, ResourceSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Atlas provisioning state of an observed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningState {
    Creating,
    Updating,
    #[serde(alias = "IDLE")]
    Available,
    Deleting,
    Failed,
    Unknown,
}

impl ProvisioningState {
    /// `Available` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Available | ProvisioningState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::Creating => "CREATING",
            ProvisioningState::Updating => "UPDATING",
            ProvisioningState::Available => "AVAILABLE",
            ProvisioningState::Deleting => "DELETING",
            ProvisioningState::Failed => "FAILED",
            ProvisioningState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource as Atlas reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observed<S> {
    /// Atlas-assigned identifier.
    pub id: String,
    pub spec: S,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ProvisioningState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

/// Observed resource of any kind.
pub type ObservedResource = Observed<ResourceSpec>;

impl<S: KindSpec> Observed<S> {
    /// Forget the concrete kind.
    pub fn erase(self) -> ObservedResource {
        Observed {
            id: self.id,
            spec: self.spec.into_spec(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: self.state,
            connection_string: self.connection_string,
        }
    }
}

impl ObservedResource {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn natural_key(&self) -> String {
        self.spec.natural_key()
    }

    /// Recover the concrete kind.
    pub fn typed<S: KindSpec>(self) -> Option<Observed<S>> {
        let spec = S::from_spec(self.spec)?;
        Some(Observed {
            id: self.id,
            spec,
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: self.state,
            connection_string: self.connection_string,
        })
    }
}

/// Snapshot of one project, built fresh per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub project_id: String,
    pub snapshot_time: DateTime<Utc>,
    /// Observed resources per kind; a kind missing here was not discovered.
    pub resources: BTreeMap<ResourceKind, Vec<ObservedResource>>,
    /// Set when at least one kind failed to load.
    pub partial: bool,
    /// Discovery failure per kind.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<ResourceKind, String>,
}

impl ProjectState {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            snapshot_time: Utc::now(),
            resources: BTreeMap::new(),
            partial: false,
            errors: BTreeMap::new(),
        }
    }

    /// An empty snapshot in which every kind counts as discovered.
    pub fn empty(project_id: impl Into<String>) -> Self {
        let mut state = Self::new(project_id);
        for kind in ResourceKind::ALL {
            state.resources.insert(kind, Vec::new());
        }
        state
    }

    /// Record the observed list for a kind, sorted by natural key.
    pub fn insert(&mut self, kind: ResourceKind, mut items: Vec<ObservedResource>) {
        items.sort_by_key(|o| o.natural_key());
        self.resources.insert(kind, items);
    }

    pub fn push(&mut self, item: ObservedResource) {
        let kind = item.kind();
        let list = self.resources.entry(kind).or_default();
        list.push(item);
        list.sort_by_key(|o| o.natural_key());
    }

    pub fn mark_error(&mut self, kind: ResourceKind, message: impl Into<String>) {
        self.partial = true;
        self.resources.remove(&kind);
        self.errors.insert(kind, message.into());
    }

    pub fn is_discovered(&self, kind: ResourceKind) -> bool {
        self.resources.contains_key(&kind)
    }

    pub fn discovered_kinds(&self) -> BTreeSet<ResourceKind> {
        self.resources.keys().copied().collect()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> &[ObservedResource] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_by_key(&self, kind: ResourceKind, key: &str) -> Option<&ObservedResource> {
        self.of_kind(kind).iter().find(|o| o.natural_key() == key)
    }

    pub fn find_by_id(&self, kind: ResourceKind, id: &str) -> Option<&ObservedResource> {
        self.of_kind(kind).iter().find(|o| o.id == id)
    }

    pub fn total(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    /// Kinds the document needs that discovery could not load.
    pub fn missing_kinds(&self, needed: &[ResourceKind]) -> Vec<ResourceKind> {
        needed
            .iter()
            .copied()
            .filter(|k| self.errors.contains_key(k))
            .collect()
    }

    /// Express the snapshot as an apply document whose plan is all no-ops.
    ///
    /// Write-only fields (passwords) are never observed and so never emitted.
    pub fn to_apply_document(&self, name: &str) -> ApplyDocument {
        let mut doc = ApplyDocument::new(name);
        for (kind, items) in &self.resources {
            let mut used = BTreeSet::new();
            for item in items {
                let base = suggested_name(*kind, &item.spec);
                let mut candidate = base.clone();
                let mut n = 2;
                while !used.insert(candidate.clone()) {
                    candidate = format!("{base}-{n}");
                    n += 1;
                }
                let spec = item.spec.clone();
                let raw_spec = spec.to_value();
                doc.resources.push(Resource {
                    api_version: DEFAULT_API_VERSION.to_string(),
                    metadata: Metadata::named(candidate),
                    spec,
                    depends_on: Vec::new(),
                    raw_spec,
                    origin: Some(format!("discovered:{}", item.id)),
                });
            }
        }
        doc.sort();
        doc
    }
}

/// A `metadata.name` for an observed resource, derived from its natural key.
pub fn suggested_name(kind: ResourceKind, spec: &ResourceSpec) -> String {
    match spec {
        ResourceSpec::DatabaseUser(user) if user.auth_database == "admin" => {
            sanitize_name(&user.username)
        }
        ResourceSpec::SearchIndex(index) => sanitize_name(&format!(
            "{}-{}-{}",
            index.cluster_name, index.collection_name, index.index_name
        )),
        _ => {
            let key = spec.natural_key();
            if key.is_empty() {
                kind.as_str().to_ascii_lowercase()
            } else {
                sanitize_name(&key.to_ascii_lowercase())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterSpec, DatabaseUserSpec, NetworkAccessSpec};

    fn observed<S: KindSpec>(id: &str, spec: S) -> ObservedResource {
        let now = Utc::now();
        Observed {
            id: id.to_string(),
            spec,
            created_at: now,
            updated_at: now,
            state: ProvisioningState::Available,
            connection_string: None,
        }
        .erase()
    }

    #[test]
    fn idle_is_available() {
        let state: ProvisioningState = serde_json::from_str("\"IDLE\"").unwrap();
        assert_eq!(state, ProvisioningState::Available);
        assert!(state.is_terminal());
    }

    #[test]
    fn mark_error_flags_partial() {
        let mut state = ProjectState::empty("p");
        state.mark_error(ResourceKind::Cluster, "boom");
        assert!(state.partial);
        assert!(!state.is_discovered(ResourceKind::Cluster));
        assert_eq!(
            state.missing_kinds(&[ResourceKind::Cluster, ResourceKind::Project]),
            vec![ResourceKind::Cluster]
        );
    }

    #[test]
    fn converts_to_apply_document_with_valid_names() {
        let mut state = ProjectState::empty("p");
        state.push(observed(
            "c-1",
            ClusterSpec {
                name: "Main".into(),
                ..Default::default()
            },
        ));
        state.push(observed(
            "u-1",
            DatabaseUserSpec {
                username: "app".into(),
                auth_database: "admin".into(),
                ..Default::default()
            },
        ));
        state.push(observed(
            "n-1",
            NetworkAccessSpec {
                cidr: Some("10.0.0.0/8".into()),
                ..Default::default()
            },
        ));
        let doc = state.to_apply_document("snapshot");
        let names: Vec<&str> = doc.resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["main", "10.0.0.0-8", "app"]);
    }

    #[test]
    fn typed_round_trip() {
        let item = observed("c-1", ClusterSpec::default());
        assert!(item.clone().typed::<ClusterSpec>().is_some());
        assert!(item.typed::<DatabaseUserSpec>().is_none());
    }
}
