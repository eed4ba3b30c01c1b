//! Typed specs for every resource kind.
//!
//! Each kind implements [`KindSpec`], the small capability set the planner,
//! validator and executor work through: a natural key for matching desired
//! against observed state, normalization before comparison, and the
//! references it makes to other resources. [`ResourceSpec`] is the tagged
//! variant over all kinds.

/// Implements the variant conversions of [`KindSpec`] for a spec type.
macro_rules! spec_variant {
    ($ty:ty, $variant:ident) => {
        fn into_spec(self) -> $crate::resources::ResourceSpec {
            $crate::resources::ResourceSpec::$variant(self)
        }

        fn from_spec(spec: $crate::resources::ResourceSpec) -> Option<Self> {
            match spec {
                $crate::resources::ResourceSpec::$variant(s) => Some(s),
                _ => None,
            }
        }

        fn as_spec(spec: &$crate::resources::ResourceSpec) -> Option<&Self> {
            match spec {
                $crate::resources::ResourceSpec::$variant(s) => Some(s),
                _ => None,
            }
        }
    };
}

mod alert;
mod cluster;
mod network;
mod project;
mod search;
mod user;

pub use alert::{AlertConfigSpec, AlertMatcher, AlertNotification, AlertThreshold};
pub use cluster::ClusterSpec;
pub use network::{NetworkAccessSpec, NetworkContainerSpec, NetworkPeeringSpec, VpcEndpointSpec};
pub use project::ProjectSpec;
pub use search::SearchIndexSpec;
pub use user::{
    DatabaseRoleSpec, DatabaseUserSpec, InheritedRole, Privilege, PrivilegeResource,
    RoleAssignment, UserScope, BUILTIN_ROLES, POWERFUL_ROLES,
};

use crate::kind::ResourceKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// How strongly a resource depends on the thing it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefStrength {
    /// The target must exist in the document (or, where allowed, in Atlas).
    Required,
    /// The target may be an Atlas built-in or pre-existing object.
    Optional,
    /// Ordering hint only; a missing target is not an issue.
    Soft,
}

/// A reference from one resource to another by kind and reference name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ResourceKind,
    pub name: String,
    /// Spec path the reference came from, for diagnostics.
    pub field: String,
    pub strength: RefStrength,
}

impl Reference {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        field: impl Into<String>,
        strength: RefStrength,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            field: field.into(),
            strength,
        }
    }
}

/// Capabilities every kind's spec provides.
pub trait KindSpec:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    /// Identity used to match a desired resource with its observed twin.
    fn natural_key(&self) -> String;

    /// Fill Atlas-side name fields from `metadata.name` when omitted.
    fn default_name(&mut self, _name: &str) {}

    /// Canonicalize values before comparison (case, trimming, defaults).
    fn normalize(&mut self) {}

    /// Other resources this spec names.
    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }

    fn into_spec(self) -> ResourceSpec;

    fn from_spec(spec: ResourceSpec) -> Option<Self>;

    fn as_spec(spec: &ResourceSpec) -> Option<&Self>;
}

/// Tagged variant over all resource specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ResourceSpec {
    Project(ProjectSpec),
    Cluster(ClusterSpec),
    NetworkContainer(NetworkContainerSpec),
    NetworkPeering(NetworkPeeringSpec),
    #[serde(rename = "VPCEndpoint")]
    VpcEndpoint(VpcEndpointSpec),
    NetworkAccess(NetworkAccessSpec),
    DatabaseRole(DatabaseRoleSpec),
    DatabaseUser(DatabaseUserSpec),
    SearchIndex(SearchIndexSpec),
    AlertConfig(AlertConfigSpec),
}

macro_rules! with_spec {
    ($value:expr, $spec:ident => $body:expr) => {
        match $value {
            ResourceSpec::Project($spec) => $body,
            ResourceSpec::Cluster($spec) => $body,
            ResourceSpec::NetworkContainer($spec) => $body,
            ResourceSpec::NetworkPeering($spec) => $body,
            ResourceSpec::VpcEndpoint($spec) => $body,
            ResourceSpec::NetworkAccess($spec) => $body,
            ResourceSpec::DatabaseRole($spec) => $body,
            ResourceSpec::DatabaseUser($spec) => $body,
            ResourceSpec::SearchIndex($spec) => $body,
            ResourceSpec::AlertConfig($spec) => $body,
        }
    };
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Project(_) => ResourceKind::Project,
            ResourceSpec::Cluster(_) => ResourceKind::Cluster,
            ResourceSpec::NetworkContainer(_) => ResourceKind::NetworkContainer,
            ResourceSpec::NetworkPeering(_) => ResourceKind::NetworkPeering,
            ResourceSpec::VpcEndpoint(_) => ResourceKind::VpcEndpoint,
            ResourceSpec::NetworkAccess(_) => ResourceKind::NetworkAccess,
            ResourceSpec::DatabaseRole(_) => ResourceKind::DatabaseRole,
            ResourceSpec::DatabaseUser(_) => ResourceKind::DatabaseUser,
            ResourceSpec::SearchIndex(_) => ResourceKind::SearchIndex,
            ResourceSpec::AlertConfig(_) => ResourceKind::AlertConfig,
        }
    }

    pub fn natural_key(&self) -> String {
        with_spec!(self, s => s.natural_key())
    }

    pub fn default_name(&mut self, name: &str) {
        with_spec!(self, s => s.default_name(name))
    }

    pub fn normalize(&mut self) {
        with_spec!(self, s => s.normalize())
    }

    /// A normalized copy, leaving `self` untouched.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }

    pub fn references(&self) -> Vec<Reference> {
        with_spec!(self, s => s.references())
    }

    /// The spec body as JSON (without the kind tag).
    pub fn to_value(&self) -> serde_json::Value {
        with_spec!(self, s => serde_json::to_value(s).unwrap_or(serde_json::Value::Null))
    }

    /// Parse a spec body for the given kind.
    pub fn from_value(
        kind: ResourceKind,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ResourceKind::Project => ResourceSpec::Project(serde_json::from_value(value)?),
            ResourceKind::Cluster => ResourceSpec::Cluster(serde_json::from_value(value)?),
            ResourceKind::NetworkContainer => {
                ResourceSpec::NetworkContainer(serde_json::from_value(value)?)
            }
            ResourceKind::NetworkPeering => {
                ResourceSpec::NetworkPeering(serde_json::from_value(value)?)
            }
            ResourceKind::VpcEndpoint => ResourceSpec::VpcEndpoint(serde_json::from_value(value)?),
            ResourceKind::NetworkAccess => {
                ResourceSpec::NetworkAccess(serde_json::from_value(value)?)
            }
            ResourceKind::DatabaseRole => ResourceSpec::DatabaseRole(serde_json::from_value(value)?),
            ResourceKind::DatabaseUser => ResourceSpec::DatabaseUser(serde_json::from_value(value)?),
            ResourceKind::SearchIndex => ResourceSpec::SearchIndex(serde_json::from_value(value)?),
            ResourceKind::AlertConfig => ResourceSpec::AlertConfig(serde_json::from_value(value)?),
        })
    }

    /// Borrow the typed spec when it is of kind `S`.
    pub fn downcast<S: KindSpec>(&self) -> Option<&S> {
        S::as_spec(self)
    }
}
/// Trimmed, upper-cased copy.
pub(crate) fn upper(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

/// Accepts `7.0` as well as `"7.0"` for version-like fields.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}
