//! Field-level diff between a desired and an observed spec.
//!
//! Both sides are normalized and rendered to JSON, then compared field by
//! field under the kind's [`DiffRules`]. Nested objects are compared
//! recursively with dotted paths; arrays are compared whole, or as sets for
//! set-valued fields.

use matlas_core::{ChangeType, Diff, DiffRules, FieldChange, ResourceSpec};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Computes diffs for one kind's rules.
pub struct DiffEngine {
    rules: &'static DiffRules,
    /// Desired-side omissions remove observed values.
    authoritative: bool,
}

impl DiffEngine {
    pub fn new(rules: &'static DiffRules, authoritative: bool) -> Self {
        Self {
            rules,
            authoritative,
        }
    }

    /// Diff two specs of the same kind. `before` is observed, `after` desired.
    pub fn diff(&self, desired: &ResourceSpec, observed: &ResourceSpec) -> Diff {
        let want = desired.normalized().to_value();
        let have = observed.normalized().to_value();
        let mut changes = Vec::new();
        match (&want, &have) {
            (Value::Object(want), Value::Object(have)) => {
                self.diff_objects("", want, have, false, &mut changes)
            }
            _ => {
                if want != have {
                    changes.push(FieldChange {
                        path: String::new(),
                        before: Some(have.clone()),
                        after: Some(want.clone()),
                        change: ChangeType::Modified,
                        immutable: self.rules.replace_on_any_change,
                    });
                }
            }
        }
        Diff { changes }
    }

    fn diff_objects(
        &self,
        prefix: &str,
        want: &Map<String, Value>,
        have: &Map<String, Value>,
        parent_immutable: bool,
        changes: &mut Vec<FieldChange>,
    ) {
        let keys: BTreeSet<&String> = want.keys().chain(have.keys()).collect();
        for key in keys {
            let top_level = prefix.is_empty();
            if top_level && self.rules.is_write_only(key) {
                continue;
            }
            let path = if top_level {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            let immutable = parent_immutable || (top_level && self.rules.is_immutable(key));
            let w = want.get(key).filter(|v| !is_blank(v));
            let h = have.get(key).filter(|v| !is_blank(v));
            match (w, h) {
                (None, None) => {}
                (None, Some(h)) => {
                    if self.authoritative {
                        changes.push(FieldChange {
                            path,
                            before: Some(h.clone()),
                            after: None,
                            change: ChangeType::Removed,
                            immutable,
                        });
                    }
                }
                (Some(w), None) => changes.push(FieldChange {
                    path,
                    before: None,
                    after: Some(w.clone()),
                    change: ChangeType::Added,
                    immutable,
                }),
                (Some(w), Some(h)) => {
                    let field = if top_level { key.as_str() } else { "" };
                    match (w, h) {
                        (Value::Object(wo), Value::Object(ho))
                            if !self.rules.is_set_valued(field) =>
                        {
                            self.diff_objects(&path, wo, ho, immutable, changes)
                        }
                        _ => {
                            if !self.values_equal(field, w, h) {
                                changes.push(FieldChange {
                                    path,
                                    before: Some(h.clone()),
                                    after: Some(w.clone()),
                                    change: ChangeType::Modified,
                                    immutable,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    fn values_equal(&self, field: &str, want: &Value, have: &Value) -> bool {
        match (want, have) {
            (Value::Array(w), Value::Array(h)) if self.rules.is_set_valued(field) => {
                as_set(w) == as_set(h)
            }
            (Value::String(w), Value::String(h)) if self.rules.is_case_insensitive(field) => {
                w.trim().eq_ignore_ascii_case(h.trim())
            }
            (Value::String(w), Value::String(h)) => w.trim() == h.trim(),
            (Value::Number(w), Value::Number(h)) => match (w.as_f64(), h.as_f64()) {
                (Some(w), Some(h)) => w == h,
                _ => w == h,
            },
            _ => want == have,
        }
    }
}

/// Null, empty strings and empty containers all mean "not set".
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn as_set(items: &[Value]) -> BTreeSet<String> {
    items.iter().map(Value::to_string).collect()
}

/// Diff under the spec kind's own rules.
pub fn diff_specs(desired: &ResourceSpec, observed: &ResourceSpec, authoritative: bool) -> Diff {
    DiffEngine::new(desired.kind().diff_rules(), authoritative).diff(desired, observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlas_core::resources::{ClusterSpec, DatabaseUserSpec, NetworkAccessSpec, RoleAssignment};
    use matlas_core::KindSpec;
    use std::collections::BTreeMap;

    fn cluster(provider: &str, size: &str) -> ResourceSpec {
        ClusterSpec {
            name: "c1".into(),
            provider: provider.into(),
            region: "US_EAST_1".into(),
            instance_size: size.into(),
            ..Default::default()
        }
        .into_spec()
    }

    #[test]
    fn test_identical_specs_have_no_changes() {
        assert!(diff_specs(&cluster("AWS", "M10"), &cluster("AWS", "M10"), false).is_empty());
    }

    #[test]
    fn test_case_and_spelling_are_normalized() {
        let desired = ClusterSpec {
            name: "c1".into(),
            provider: "aws".into(),
            region: "us-east-1".into(),
            instance_size: "m10".into(),
            ..Default::default()
        }
        .into_spec();
        assert!(diff_specs(&desired, &cluster("AWS", "M10"), false).is_empty());
    }

    #[test]
    fn test_mutable_change_is_not_immutable() {
        let diff = diff_specs(&cluster("AWS", "M20"), &cluster("AWS", "M10"), false);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].path, "instanceSize");
        assert_eq!(diff.changes[0].change, ChangeType::Modified);
        assert!(!diff.touches_immutable());
    }

    #[test]
    fn test_provider_change_is_immutable() {
        let diff = diff_specs(&cluster("GCP", "M10"), &cluster("AWS", "M10"), false);
        assert!(diff.touches_immutable());
        assert_eq!(diff.immutable_paths(), vec!["provider"]);
    }

    #[test]
    fn test_absent_optional_field_is_left_alone_unless_authoritative() {
        let observed = ClusterSpec {
            mongodb_version: Some("7.0".into()),
            ..ClusterSpec::from_spec(cluster("AWS", "M10")).unwrap_or_default()
        }
        .into_spec();
        let desired = cluster("AWS", "M10");
        assert!(diff_specs(&desired, &observed, false).is_empty());

        let diff = diff_specs(&desired, &observed, true);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].change, ChangeType::Removed);
        assert_eq!(diff.changes[0].path, "mongoDBVersion");
    }

    #[test]
    fn test_roles_compare_as_sets_and_password_is_ignored() {
        let desired = DatabaseUserSpec {
            username: "app".into(),
            auth_database: "admin".into(),
            password: Some("hunter22hunter22".into()),
            roles: vec![
                RoleAssignment::new("readWrite", "orders"),
                RoleAssignment::new("read", "reports"),
            ],
            ..Default::default()
        }
        .into_spec();
        let observed = DatabaseUserSpec {
            username: "app".into(),
            auth_database: "admin".into(),
            roles: vec![
                RoleAssignment::new("read", "reports"),
                RoleAssignment::new("readWrite", "orders"),
            ],
            ..Default::default()
        }
        .into_spec();
        assert!(diff_specs(&desired, &observed, true).is_empty());
    }

    #[test]
    fn test_cidr_forms_are_equivalent() {
        let desired = NetworkAccessSpec {
            cidr: Some("10.0.0.0/08".into()),
            ..Default::default()
        }
        .into_spec();
        let observed = NetworkAccessSpec {
            cidr: Some("10.0.0.0/8".into()),
            ..Default::default()
        }
        .into_spec();
        assert!(diff_specs(&desired, &observed, false).is_empty());
    }

    #[test]
    fn test_nested_tags_use_dotted_paths() {
        let mut want_tags = BTreeMap::new();
        want_tags.insert("env".to_string(), "prod".to_string());
        let mut have_tags = BTreeMap::new();
        have_tags.insert("env".to_string(), "staging".to_string());
        let desired = ClusterSpec {
            tags: want_tags,
            ..ClusterSpec::from_spec(cluster("AWS", "M10")).unwrap_or_default()
        }
        .into_spec();
        let observed = ClusterSpec {
            tags: have_tags,
            ..ClusterSpec::from_spec(cluster("AWS", "M10")).unwrap_or_default()
        }
        .into_spec();
        let diff = diff_specs(&desired, &observed, false);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].path, "tags.env");
    }
}
