//! Apply documents and the resources they contain.

use crate::kind::ResourceKind;
use crate::resources::{KindSpec, Reference, ResourceSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// apiVersions the loader accepts.
pub const API_VERSIONS: &[&str] = &[
    "matlas.mongodb.com/v1",
    "matlas.mongodb.com/v1alpha1",
    "matlas.mongodb.com/v1beta1",
];

/// apiVersion written by `discover --convert-to-apply`.
pub const DEFAULT_API_VERSION: &str = "matlas.mongodb.com/v1";

/// Annotation marking a document whose omissions mean deletion.
pub const AUTHORITATIVE_ANNOTATION: &str = "matlas.mongodb.com/authoritative";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Stable identity of a resource within a document: `Kind/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    /// Parses `Kind/name` as written in `dependsOn`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not of the form Kind/name"))?;
        let kind = kind.parse::<ResourceKind>().map_err(|e| e.to_string())?;
        if name.trim().is_empty() {
            return Err(format!("'{s}' has an empty name"));
        }
        Ok(Self::new(kind, name.trim()))
    }
}

/// One desired resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ResourceSpec,
    /// Explicit `dependsOn` entries, as written.
    pub depends_on: Vec<String>,
    /// Spec body exactly as loaded, before defaulting; checked by the schema layer.
    pub raw_spec: serde_json::Value,
    /// File (and document index) the resource came from.
    pub origin: Option<String>,
}

impl Resource {
    /// Build a resource from a typed spec, filling the Atlas-side name.
    pub fn new<S: KindSpec>(name: impl Into<String>, spec: S) -> Self {
        let name = name.into();
        let mut spec = spec.into_spec();
        spec.default_name(&name);
        let raw_spec = spec.to_value();
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            metadata: Metadata::named(name),
            spec,
            depends_on: Vec::new(),
            raw_spec,
            origin: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_depends_on(mut self, target: impl Into<String>) -> Self {
        self.depends_on.push(target.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind(), self.metadata.name.clone())
    }

    pub fn natural_key(&self) -> String {
        self.spec.natural_key()
    }

    pub fn references(&self) -> Vec<Reference> {
        self.spec.references()
    }

    /// Where the resource was defined, for messages.
    pub fn location(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{} ({origin})", self.id()),
            None => self.id().to_string(),
        }
    }

    /// Serializable manifest form.
    pub fn to_manifest(&self) -> ResourceManifest {
        ResourceManifest {
            api_version: self.api_version.clone(),
            kind: self.kind(),
            metadata: self.metadata.clone(),
            spec: self.spec.to_value(),
            depends_on: self.depends_on.clone(),
        }
    }
}

/// A resource as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceManifest {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: Metadata,
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyDocumentManifest {
    api_version: String,
    kind: String,
    metadata: Metadata,
    resources: Vec<ResourceManifest>,
}

/// The merged desired state of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyDocument {
    pub api_version: String,
    pub metadata: Metadata,
    /// Ordered by (kind rank, name).
    pub resources: Vec<Resource>,
}

impl ApplyDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            metadata: Metadata::named(name),
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.push(resource);
        self
    }

    /// Append a resource, keeping the (kind rank, name) order.
    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
        self.sort();
    }

    pub fn sort(&mut self) {
        self.resources
            .sort_by(|a, b| (a.kind(), a.name()).cmp(&(b.kind(), b.name())));
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether resources missing from this document should be deleted.
    pub fn is_authoritative(&self) -> bool {
        self.metadata
            .annotations
            .get(AUTHORITATIVE_ANNOTATION)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn set_authoritative(&mut self, value: bool) {
        if value {
            self.metadata
                .annotations
                .insert(AUTHORITATIVE_ANNOTATION.to_string(), "true".to_string());
        } else {
            self.metadata.annotations.remove(AUTHORITATIVE_ANNOTATION);
        }
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    /// Kinds present in the document, in rank order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.resources.iter().map(|r| r.kind()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.kind() == kind && r.name() == name)
    }

    /// Resolve a reference target by `metadata.name` first, then natural key.
    pub fn resolve(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.find(kind, name)
            .or_else(|| self.of_kind(kind).find(|r| r.natural_key() == name))
    }

    /// Render as a single multi-resource YAML document.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let manifest = ApplyDocumentManifest {
            api_version: self.api_version.clone(),
            kind: "ApplyDocument".to_string(),
            metadata: self.metadata.clone(),
            resources: self.resources.iter().map(Resource::to_manifest).collect(),
        };
        serde_yaml::to_string(&manifest)
    }
}

/// Turn an arbitrary identifier into a valid `metadata.name`.
pub fn sanitize_name(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterSpec, ProjectSpec};

    #[test]
    fn resource_id_parses_depends_on_syntax() {
        let id: ResourceId = "Cluster/c1".parse().unwrap();
        assert_eq!(id, ResourceId::new(ResourceKind::Cluster, "c1"));
        assert_eq!(id.to_string(), "Cluster/c1");
        assert!("c1".parse::<ResourceId>().is_err());
        assert!("Gadget/c1".parse::<ResourceId>().is_err());
    }

    #[test]
    fn push_keeps_rank_order() {
        let doc = ApplyDocument::new("demo")
            .with_resource(Resource::new("c1", ClusterSpec::default()))
            .with_resource(Resource::new("p1", ProjectSpec::default()));
        let kinds: Vec<_> = doc.resources.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![ResourceKind::Project, ResourceKind::Cluster]);
    }

    #[test]
    fn resource_new_defaults_atlas_name() {
        let r = Resource::new("c1", ClusterSpec::default());
        assert_eq!(r.natural_key(), "c1");
    }

    #[test]
    fn authoritative_annotation() {
        let mut doc = ApplyDocument::new("demo");
        assert!(!doc.is_authoritative());
        doc.set_authoritative(true);
        assert!(doc.is_authoritative());
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_name("10.0.0.0/8"), "10.0.0.0-8");
        assert_eq!(sanitize_name("admin/app"), "admin-app");
        assert_eq!(sanitize_name("//"), "unnamed");
    }
}
