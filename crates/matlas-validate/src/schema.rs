//! Schema layer.
//!
//! Each kind's spec is checked against an embedded JSON Schema (draft
//! 2020-12). The schemas do not forbid additional properties; unknown
//! top-level properties are reported here as warnings instead, so newer
//! manifests still load with older binaries.

use crate::issue::{IssueSet, ValidationIssue};
use matlas_core::{ApplyDocument, Resource, ResourceKind};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ============================================================================
// Embedded JSON Schemas
// ============================================================================

/// Compiled into the binary so validation works without external files.
mod embedded_schemas {
    pub const PROJECT: &str = include_str!("../../../schemas/Project.schema.json");
    pub const CLUSTER: &str = include_str!("../../../schemas/Cluster.schema.json");
    pub const NETWORK_CONTAINER: &str =
        include_str!("../../../schemas/NetworkContainer.schema.json");
    pub const NETWORK_PEERING: &str = include_str!("../../../schemas/NetworkPeering.schema.json");
    pub const VPC_ENDPOINT: &str = include_str!("../../../schemas/VPCEndpoint.schema.json");
    pub const NETWORK_ACCESS: &str = include_str!("../../../schemas/NetworkAccess.schema.json");
    pub const DATABASE_ROLE: &str = include_str!("../../../schemas/DatabaseRole.schema.json");
    pub const DATABASE_USER: &str = include_str!("../../../schemas/DatabaseUser.schema.json");
    pub const SEARCH_INDEX: &str = include_str!("../../../schemas/SearchIndex.schema.json");
    pub const ALERT_CONFIG: &str = include_str!("../../../schemas/AlertConfig.schema.json");
}

fn schema_source(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Project => embedded_schemas::PROJECT,
        ResourceKind::Cluster => embedded_schemas::CLUSTER,
        ResourceKind::NetworkContainer => embedded_schemas::NETWORK_CONTAINER,
        ResourceKind::NetworkPeering => embedded_schemas::NETWORK_PEERING,
        ResourceKind::VpcEndpoint => embedded_schemas::VPC_ENDPOINT,
        ResourceKind::NetworkAccess => embedded_schemas::NETWORK_ACCESS,
        ResourceKind::DatabaseRole => embedded_schemas::DATABASE_ROLE,
        ResourceKind::DatabaseUser => embedded_schemas::DATABASE_USER,
        ResourceKind::SearchIndex => embedded_schemas::SEARCH_INDEX,
        ResourceKind::AlertConfig => embedded_schemas::ALERT_CONFIG,
    }
}

/// Allowed `metadata.name` shape.
const NAME_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$";

struct KindSchema {
    validator: Result<jsonschema::Validator, String>,
    properties: BTreeSet<String>,
}

/// Compiled schemas for every kind.
pub struct SchemaLayer {
    schemas: BTreeMap<ResourceKind, KindSchema>,
    name_pattern: Option<regex::Regex>,
}

impl SchemaLayer {
    pub fn new() -> Self {
        let schemas = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, compile(*kind)))
            .collect();
        Self {
            schemas,
            name_pattern: regex::Regex::new(NAME_PATTERN).ok(),
        }
    }

    /// Check every resource in the document.
    pub fn validate(&self, doc: &ApplyDocument) -> IssueSet {
        let mut issues = IssueSet::default();
        for resource in &doc.resources {
            issues.extend(self.validate_resource(resource));
        }
        issues
    }

    pub fn validate_resource(&self, resource: &Resource) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        let id = resource.id();
        out.extend(self.check_name(resource).map(|i| i.at(&id)));

        let Some(schema) = self.schemas.get(&resource.kind()) else {
            return out;
        };
        let validator = match &schema.validator {
            Ok(v) => v,
            Err(e) => {
                out.push(
                    ValidationIssue::schema_violation(format!(
                        "schema for {} failed to compile: {e}",
                        resource.kind()
                    ))
                    .at(&id),
                );
                return out;
            }
        };

        for error in validator.iter_errors(&resource.raw_spec) {
            let path_str = error.instance_path().to_string();
            let location = if path_str.is_empty() {
                "spec".to_string()
            } else {
                format!("spec{path_str}")
            };
            out.push(
                ValidationIssue::schema_violation(format!("{error}"))
                    .at(&id)
                    .with_path(location),
            );
        }

        if let JsonValue::Object(map) = &resource.raw_spec {
            for key in map.keys() {
                if !schema.properties.contains(key) {
                    debug!(resource = %id, field = %key, "unknown spec property");
                    out.push(ValidationIssue::unknown_field(resource.kind().as_str(), key).at(&id));
                }
            }
        }
        out
    }

    fn check_name(&self, resource: &Resource) -> Option<ValidationIssue> {
        let name = resource.name();
        let max = resource.kind().max_name_len();
        if name.len() > max {
            return Some(ValidationIssue::invalid_name(
                name,
                &format!("longer than {max} characters"),
            ));
        }
        match &self.name_pattern {
            Some(re) if !re.is_match(name) => Some(ValidationIssue::invalid_name(
                name,
                "contains characters outside [A-Za-z0-9._-]",
            )),
            _ => None,
        }
    }
}

impl Default for SchemaLayer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(kind: ResourceKind) -> KindSchema {
    let parsed: Result<JsonValue, String> =
        serde_json::from_str(schema_source(kind)).map_err(|e| e.to_string());
    let properties = parsed
        .as_ref()
        .ok()
        .and_then(|s| s.get("properties"))
        .and_then(JsonValue::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    let validator = parsed.and_then(|schema| {
        jsonschema::draft202012::options()
            .build(&schema)
            .map_err(|e| e.to_string())
    });
    KindSchema {
        validator,
        properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{IssueKind, Severity};
    use matlas_core::resources::{ClusterSpec, NetworkAccessSpec};
    use serde_json::json;

    fn cluster(raw: JsonValue) -> Resource {
        let mut r = Resource::new("c1", ClusterSpec::default());
        r.raw_spec = raw;
        r
    }

    #[test]
    fn test_all_schemas_compile() {
        let layer = SchemaLayer::new();
        for kind in ResourceKind::ALL {
            let schema = layer.schemas.get(&kind).unwrap();
            assert!(schema.validator.is_ok(), "{kind} schema: {:?}", schema.validator.as_ref().err());
            assert!(!schema.properties.is_empty());
        }
    }

    #[test]
    fn test_valid_cluster_has_no_issues() {
        let layer = SchemaLayer::new();
        let issues = layer.validate_resource(&cluster(
            json!({"provider": "AWS", "region": "US_EAST_1", "instanceSize": "M10"}),
        ));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_enum_and_required_violations() {
        let layer = SchemaLayer::new();
        let issues = layer.validate_resource(&cluster(
            json!({"provider": "IBM", "instanceSize": "M10"}),
        ));
        let schema_errors: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::Schema)
            .collect();
        assert_eq!(schema_errors.len(), 2, "{issues:?}");
        assert!(schema_errors.iter().all(|i| i.severity == Severity::Error));
        assert!(schema_errors.iter().any(|i| i.path.as_deref() == Some("spec/provider")));
    }

    #[test]
    fn test_unknown_top_level_property_is_warning() {
        let layer = SchemaLayer::new();
        let issues = layer.validate_resource(&cluster(json!({
            "provider": "AWS",
            "region": "US_EAST_1",
            "instanceSize": "M10",
            "autoScaling": {"enabled": true}
        })));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnknownField);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_network_access_needs_exactly_one_source() {
        let layer = SchemaLayer::new();
        let mut r = Resource::new("office", NetworkAccessSpec::default());
        r.raw_spec = json!({"ipAddress": "203.0.113.7", "cidr": "10.0.0.0/8"});
        let issues = layer.validate_resource(&r);
        assert!(issues.iter().any(|i| i.kind == IssueKind::Schema));
    }

    #[test]
    fn test_name_rule() {
        let layer = SchemaLayer::new();
        let mut r = cluster(json!({"provider": "AWS", "region": "US_EAST_1", "instanceSize": "M10"}));
        r.metadata.name = "bad name!".into();
        let issues = layer.validate_resource(&r);
        assert!(issues.iter().any(|i| i.kind == IssueKind::InvalidName));
    }
}
