//! Manifest loader.
//!
//! Reads one or more YAML files (explicit paths or glob patterns), splits
//! multi-document files, normalizes the short `Project` form, applies label
//! inheritance and merges everything into one [`ApplyDocument`] ordered by
//! (kind rank, name). Duplicates are kept; the validator reports them.

use crate::error::LoadError;
use crate::kind::ResourceKind;
use crate::manifest::{API_VERSIONS, ApplyDocument, Metadata, Resource, sanitize_name};
use crate::resources::ResourceSpec;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Project spec keys holding embedded child resources.
const EMBEDDED_CHILDREN: &[(&str, ResourceKind)] = &[
    ("clusters", ResourceKind::Cluster),
    ("databaseUsers", ResourceKind::DatabaseUser),
    ("networkAccess", ResourceKind::NetworkAccess),
];

/// Load and merge every manifest named by `inputs`.
pub fn load_files<S: AsRef<str>>(inputs: &[S]) -> Result<ApplyDocument, LoadError> {
    if inputs.is_empty() {
        return Err(LoadError::NoInput);
    }
    let paths = expand_inputs(inputs)?;
    let mut merged = Merged::default();
    for path in &paths {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "loading manifest");
        merged.add_str(&content, &path.display().to_string())?;
    }
    let fallback = paths
        .first()
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest".to_string());
    Ok(merged.finish(&fallback))
}

/// Load manifests from an in-memory string.
pub fn load_str(content: &str, origin: &str) -> Result<ApplyDocument, LoadError> {
    let mut merged = Merged::default();
    merged.add_str(content, origin)?;
    Ok(merged.finish("manifest"))
}

/// Resolve explicit paths and glob patterns into a de-duplicated file list.
pub fn expand_inputs<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PathBuf>, LoadError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for input in inputs {
        let input = input.as_ref().trim();
        let found = if is_glob(input) {
            let matches = glob_files(input)?;
            if matches.is_empty() {
                return Err(LoadError::NoMatch(input.to_string()));
            }
            matches
        } else {
            let path = PathBuf::from(input);
            if !path.is_file() {
                return Err(LoadError::NotFound(path));
            }
            vec![path]
        };
        for path in found {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    Ok(out)
}

fn is_glob(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

/// Files matching `pattern`, sorted. Unreadable entries are skipped.
fn glob_files(pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    let entries = glob::glob(pattern).map_err(|err| LoadError::BadPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;
    let mut matches = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => matches.push(path),
            Ok(_) => {}
            Err(err) => {
                warn!(path = %err.path().display(), error = %err.error(), "skipping unreadable path")
            }
        }
    }
    matches.sort();
    Ok(matches)
}

/// Documents accumulated across files.
#[derive(Default)]
struct Merged {
    header: Option<(String, Metadata)>,
    resources: Vec<Resource>,
}

impl Merged {
    fn add_str(&mut self, content: &str, origin: &str) -> Result<(), LoadError> {
        for (index, doc) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let doc_origin = format!("{origin}#{}", index + 1);
            let value = Value::deserialize(doc).map_err(|e| LoadError::Yaml {
                origin: doc_origin.clone(),
                message: e.to_string(),
            })?;
            if value.is_null() {
                continue;
            }
            self.add_document(value, &doc_origin)?;
        }
        Ok(())
    }

    fn add_document(&mut self, value: Value, origin: &str) -> Result<(), LoadError> {
        let obj = as_mapping(&value, origin)?;
        let api_version = api_version(obj, None, origin)?;
        let kind = required_str(obj, "kind", origin)?;

        if !kind.eq_ignore_ascii_case("ApplyDocument") {
            let parsed = parse_resource(&value, None, &BTreeMap::new(), origin)?;
            self.resources.extend(parsed);
            return Ok(());
        }

        let metadata = parse_metadata(obj.get("metadata"), origin)?;
        let children = obj
            .get("resources")
            .or_else(|| obj.get("spec").and_then(|s| s.get("resources")));
        let children = match children {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(LoadError::Malformed {
                    origin: origin.to_string(),
                    message: "'resources' must be a list".into(),
                });
            }
        };
        for (i, child) in children.iter().enumerate() {
            let child_origin = format!("{origin}/resources[{i}]");
            let parsed = parse_resource(child, Some(&api_version), &metadata.labels, &child_origin)?;
            self.resources.extend(parsed);
        }

        match &mut self.header {
            None => self.header = Some((api_version, metadata)),
            Some((_, existing)) => {
                for (k, v) in metadata.labels {
                    existing.labels.entry(k).or_insert(v);
                }
                for (k, v) in metadata.annotations {
                    existing.annotations.entry(k).or_insert(v);
                }
            }
        }
        Ok(())
    }

    fn finish(self, fallback_name: &str) -> ApplyDocument {
        let (api_version, metadata) = self.header.unwrap_or_else(|| {
            (
                crate::manifest::DEFAULT_API_VERSION.to_string(),
                Metadata::named(fallback_name),
            )
        });
        let mut doc = ApplyDocument {
            api_version,
            metadata,
            resources: self.resources,
        };
        doc.sort();
        doc
    }
}

fn parse_resource(
    value: &Value,
    parent_api: Option<&str>,
    inherited_labels: &BTreeMap<String, String>,
    origin: &str,
) -> Result<Vec<Resource>, LoadError> {
    let obj = as_mapping(value, origin)?;
    let api_version = api_version(obj, parent_api, origin)?;
    let kind_str = required_str(obj, "kind", origin)?;
    if kind_str.eq_ignore_ascii_case("ApplyDocument") {
        return Err(LoadError::Malformed {
            origin: origin.to_string(),
            message: "ApplyDocument cannot be nested".into(),
        });
    }
    let kind = kind_str
        .parse::<ResourceKind>()
        .map_err(|_| LoadError::UnknownKind {
            origin: origin.to_string(),
            kind: kind_str.clone(),
        })?;

    let mut metadata = parse_metadata(obj.get("metadata"), origin)?;
    if metadata.labels.is_empty() {
        metadata.labels = inherited_labels.clone();
    }
    let depends_on = parse_depends_on(obj.get("dependsOn"), origin)?;

    let mut spec = match obj.get("spec") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(LoadError::Malformed {
                origin: origin.to_string(),
                message: "'spec' must be a mapping".into(),
            });
        }
    };

    let mut out = Vec::new();
    if kind == ResourceKind::Project {
        for (key, child_kind) in EMBEDDED_CHILDREN {
            let Some(items) = spec.remove(*key) else {
                continue;
            };
            let Value::Array(items) = items else {
                return Err(LoadError::Malformed {
                    origin: origin.to_string(),
                    message: format!("Project spec '{key}' must be a list"),
                });
            };
            for (i, item) in items.iter().enumerate() {
                let child_origin = format!("{origin}/{key}[{i}]");
                let child = embedded_child(item, *child_kind, &api_version, &child_origin)?;
                out.extend(parse_resource(
                    &child,
                    Some(&api_version),
                    &metadata.labels,
                    &child_origin,
                )?);
            }
        }
    }

    let raw_spec = Value::Object(spec);
    let mut typed = ResourceSpec::from_value(kind, raw_spec.clone()).map_err(|e| {
        LoadError::InvalidSpec {
            origin: origin.to_string(),
            kind: kind.to_string(),
            name: metadata.name.clone(),
            message: e.to_string(),
        }
    })?;
    typed.default_name(&metadata.name);

    out.push(Resource {
        api_version,
        metadata,
        spec: typed,
        depends_on,
        raw_spec,
        origin: Some(origin.to_string()),
    });
    Ok(out)
}

/// Expand an embedded Project child into a full resource value.
///
/// Items may be full resources (with `metadata`/`spec`) or bare specs whose
/// name is taken from the kind's Atlas-side name field.
fn embedded_child(
    item: &Value,
    kind: ResourceKind,
    api_version: &str,
    origin: &str,
) -> Result<Value, LoadError> {
    let obj = as_mapping(item, origin)?;
    let mut child = Map::new();
    child.insert("apiVersion".into(), Value::String(api_version.to_string()));
    child.insert("kind".into(), Value::String(kind.as_str().to_string()));

    if obj.contains_key("metadata") || obj.contains_key("spec") {
        for (k, v) in obj {
            if k != "kind" && k != "apiVersion" {
                child.insert(k.clone(), v.clone());
            }
        }
        return Ok(Value::Object(child));
    }

    let name_field = |field: &str| obj.get(field).and_then(Value::as_str).map(str::to_string);
    let name = match kind {
        ResourceKind::Cluster => name_field("name"),
        ResourceKind::DatabaseUser => name_field("username"),
        ResourceKind::NetworkAccess => name_field("ipAddress")
            .or_else(|| name_field("cidr"))
            .or_else(|| name_field("awsSecurityGroup"))
            .map(|n| sanitize_name(&n)),
        _ => name_field("name"),
    }
    .ok_or_else(|| LoadError::MissingField {
        origin: origin.to_string(),
        field: "name",
    })?;

    let mut metadata = Map::new();
    metadata.insert("name".into(), Value::String(name));
    child.insert("metadata".into(), Value::Object(metadata));
    child.insert("spec".into(), Value::Object(obj.clone()));
    Ok(Value::Object(child))
}

fn as_mapping<'a>(value: &'a Value, origin: &str) -> Result<&'a Map<String, Value>, LoadError> {
    value.as_object().ok_or_else(|| LoadError::Malformed {
        origin: origin.to_string(),
        message: "document must be a mapping".into(),
    })
}

fn required_str(
    obj: &Map<String, Value>,
    field: &'static str,
    origin: &str,
) -> Result<String, LoadError> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(LoadError::MissingField {
            origin: origin.to_string(),
            field,
        }),
    }
}

fn api_version(
    obj: &Map<String, Value>,
    parent: Option<&str>,
    origin: &str,
) -> Result<String, LoadError> {
    let version = match (obj.get("apiVersion").and_then(Value::as_str), parent) {
        (Some(v), _) => v.trim().to_string(),
        (None, Some(parent)) => return Ok(parent.to_string()),
        (None, None) => {
            return Err(LoadError::MissingField {
                origin: origin.to_string(),
                field: "apiVersion",
            });
        }
    };
    if !API_VERSIONS.contains(&version.as_str()) {
        return Err(LoadError::UnsupportedApiVersion {
            origin: origin.to_string(),
            api_version: version,
        });
    }
    Ok(version)
}

fn parse_metadata(value: Option<&Value>, origin: &str) -> Result<Metadata, LoadError> {
    let missing = || LoadError::MissingField {
        origin: origin.to_string(),
        field: "metadata.name",
    };
    let obj = value.and_then(Value::as_object).ok_or_else(missing)?;
    let name = match obj.get("name").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => return Err(missing()),
    };
    Ok(Metadata {
        name,
        labels: string_map(obj.get("labels"), "metadata.labels", origin)?,
        annotations: string_map(obj.get("annotations"), "metadata.annotations", origin)?,
    })
}

fn string_map(
    value: Option<&Value>,
    field: &str,
    origin: &str,
) -> Result<BTreeMap<String, String>, LoadError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(BTreeMap::new());
    };
    let obj = value.as_object().ok_or_else(|| LoadError::Malformed {
        origin: origin.to_string(),
        message: format!("'{field}' must be a mapping"),
    })?;
    Ok(obj
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}

fn parse_depends_on(value: Option<&Value>, origin: &str) -> Result<Vec<String>, LoadError> {
    let malformed = || LoadError::Malformed {
        origin: origin.to_string(),
        message: "'dependsOn' must be a list of \"Kind/name\" strings".into(),
    };
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(|s| s.trim().to_string()).ok_or_else(malformed))
            .collect(),
        Some(_) => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterSpec, DatabaseUserSpec, NetworkAccessSpec};

    const APPLY_DOC: &str = r#"
apiVersion: matlas.mongodb.com/v1
kind: ApplyDocument
metadata:
  name: demo
  labels:
    team: data
resources:
  - kind: DatabaseUser
    metadata:
      name: u1
    spec:
      roles:
        - roleName: readWrite
          databaseName: admin
      scopes:
        - name: c1
          type: CLUSTER
  - kind: Cluster
    metadata:
      name: c1
      labels:
        tier: gold
    spec:
      provider: AWS
      region: US_EAST_1
      instanceSize: M10
  - apiVersion: matlas.mongodb.com/v1
    kind: Project
    metadata:
      name: p1
    spec:
      organizationId: 5f1a2b3c4d5e6f7a8b9c0d1e
"#;

    #[test]
    fn test_apply_document_is_sorted_and_defaulted() {
        let doc = load_str(APPLY_DOC, "inline").unwrap();
        let ids: Vec<String> = doc.resources.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["Project/p1", "Cluster/c1", "DatabaseUser/u1"]);

        let cluster = doc.resources[1].spec.downcast::<ClusterSpec>().unwrap();
        assert_eq!(cluster.name, "c1");
        let user = doc.resources[2].spec.downcast::<DatabaseUserSpec>().unwrap();
        assert_eq!(user.username, "u1");
        assert_eq!(user.auth_database, "admin");
        assert_eq!(doc.metadata.name, "demo");
    }

    #[test]
    fn test_labels_inherited_only_when_omitted() {
        let doc = load_str(APPLY_DOC, "inline").unwrap();
        let cluster = doc.find(ResourceKind::Cluster, "c1").unwrap();
        assert_eq!(cluster.metadata.labels.get("tier").map(String::as_str), Some("gold"));
        assert!(!cluster.metadata.labels.contains_key("team"));
        let user = doc.find(ResourceKind::DatabaseUser, "u1").unwrap();
        assert_eq!(user.metadata.labels.get("team").map(String::as_str), Some("data"));
    }

    #[test]
    fn test_multi_document_single_resources() {
        let content = r#"
apiVersion: matlas.mongodb.com/v1
kind: Cluster
metadata:
  name: c2
spec:
  provider: GCP
  region: CENTRAL_US
  instanceSize: M10
---
---
apiVersion: matlas.mongodb.com/v1beta1
kind: NetworkAccess
metadata:
  name: office
spec:
  cidr: 203.0.113.0/24
"#;
        let doc = load_str(content, "inline").unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.resources[0].kind(), ResourceKind::Cluster);
        assert_eq!(doc.resources[1].origin.as_deref(), Some("inline#3"));
    }

    #[test]
    fn test_project_short_form_flattens_children() {
        let content = r#"
apiVersion: matlas.mongodb.com/v1
kind: Project
metadata:
  name: p1
  labels:
    env: prod
spec:
  organizationId: org-1
  clusters:
    - name: c1
      provider: AWS
      region: US_EAST_1
      instanceSize: M10
  databaseUsers:
    - username: app
      roles:
        - roleName: read
          databaseName: sales
  networkAccess:
    - cidr: 10.0.0.0/16
"#;
        let doc = load_str(content, "inline").unwrap();
        assert_eq!(doc.len(), 4);
        let access = doc.of_kind(ResourceKind::NetworkAccess).next().unwrap();
        assert_eq!(access.name(), "10.0.0.0-16");
        assert_eq!(access.metadata.labels.get("env").map(String::as_str), Some("prod"));
        let spec = access.spec.downcast::<NetworkAccessSpec>().unwrap();
        assert_eq!(spec.cidr.as_deref(), Some("10.0.0.0/16"));
        let project = doc.find(ResourceKind::Project, "p1").unwrap();
        assert!(project.raw_spec.get("clusters").is_none());
    }

    #[test]
    fn test_unsupported_api_version() {
        let err = load_str(
            "apiVersion: v9\nkind: Cluster\nmetadata:\n  name: c1\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedApiVersion { .. }));
    }

    #[test]
    fn test_missing_kind_and_name() {
        let err = load_str(
            "apiVersion: matlas.mongodb.com/v1\nmetadata:\n  name: c1\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::MissingField { field: "kind", .. }));

        let err = load_str(
            "apiVersion: matlas.mongodb.com/v1\nkind: Cluster\nmetadata: {}\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::MissingField { field: "metadata.name", .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = load_str("kind: [unterminated", "inline").unwrap_err();
        assert_eq!(err.code(), "MATLAS-LOAD-005");
    }

    #[test]
    fn test_unknown_kind() {
        let err = load_str(
            "apiVersion: matlas.mongodb.com/v1\nkind: Gadget\nmetadata:\n  name: g\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnknownKind { .. }));
    }

    #[test]
    fn test_duplicates_are_kept_for_validation() {
        let content = r#"
apiVersion: matlas.mongodb.com/v1
kind: ApplyDocument
metadata:
  name: dup
resources:
  - kind: Cluster
    metadata: {name: c1}
    spec: {provider: AWS, region: US_EAST_1, instanceSize: M10}
  - kind: Cluster
    metadata: {name: c1}
    spec: {provider: AWS, region: US_EAST_1, instanceSize: M20}
"#;
        let doc = load_str(content, "inline").unwrap();
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_depends_on_is_read() {
        let content = r#"
apiVersion: matlas.mongodb.com/v1
kind: NetworkAccess
metadata:
  name: office
dependsOn: ["Cluster/c1"]
spec:
  ipAddress: 203.0.113.7
"#;
        let doc = load_str(content, "inline").unwrap();
        assert_eq!(doc.resources[0].depends_on, vec!["Cluster/c1".to_string()]);
    }

    #[test]
    fn test_empty_apply_document_loads() {
        let doc = load_str(
            "apiVersion: matlas.mongodb.com/v1\nkind: ApplyDocument\nmetadata:\n  name: empty\nresources: []\n",
            "inline",
        )
        .unwrap();
        assert!(doc.is_empty());
    }
}
