//! Database users and custom database roles.

use super::{upper, KindSpec, RefStrength, Reference};
use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Roles MongoDB and Atlas provide out of the box.
pub const BUILTIN_ROLES: &[&str] = &[
    "read",
    "readWrite",
    "dbAdmin",
    "dbOwner",
    "userAdmin",
    "clusterAdmin",
    "clusterManager",
    "clusterMonitor",
    "hostManager",
    "backup",
    "restore",
    "readAnyDatabase",
    "readWriteAnyDatabase",
    "userAdminAnyDatabase",
    "dbAdminAnyDatabase",
    "root",
    "atlasAdmin",
    "enableSharding",
    "directShardOperations",
];

/// Built-in roles that grant project-wide reach when left unscoped.
pub const POWERFUL_ROLES: &[&str] = &[
    "atlasAdmin",
    "root",
    "readWriteAnyDatabase",
    "dbAdminAnyDatabase",
    "userAdminAnyDatabase",
    "clusterAdmin",
];

fn default_admin() -> String {
    "admin".to_string()
}

fn default_scope_type() -> String {
    "CLUSTER".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub role_name: String,
    #[serde(default = "default_admin")]
    pub database_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

impl RoleAssignment {
    pub fn new(role: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            role_name: role.into(),
            database_name: database.into(),
            collection_name: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        BUILTIN_ROLES.contains(&self.role_name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserScope {
    pub name: String,
    #[serde(rename = "type", default = "default_scope_type")]
    pub scope_type: String,
}

impl UserScope {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_type: default_scope_type(),
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.scope_type.eq_ignore_ascii_case("CLUSTER")
    }
}

/// A database user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserSpec {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_admin")]
    pub auth_database: String,
    /// Write-only; never returned by Atlas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleAssignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<UserScope>,
    /// Atlas-side labels (distinct from manifest metadata labels).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// RFC 3339 expiry after which Atlas deletes the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_date: Option<String>,
}

impl KindSpec for DatabaseUserSpec {
    const KIND: ResourceKind = ResourceKind::DatabaseUser;

    fn natural_key(&self) -> String {
        let db = if self.auth_database.trim().is_empty() {
            "admin"
        } else {
            self.auth_database.trim()
        };
        format!("{}/{}", db, self.username.trim())
    }

    fn default_name(&mut self, name: &str) {
        if self.username.trim().is_empty() {
            self.username = name.to_string();
        }
    }

    fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.auth_database = self.auth_database.trim().to_string();
        if self.auth_database.is_empty() {
            self.auth_database = default_admin();
        }
        for role in &mut self.roles {
            role.role_name = role.role_name.trim().to_string();
            role.database_name = role.database_name.trim().to_string();
        }
        self.roles.sort();
        self.roles.dedup();
        for scope in &mut self.scopes {
            scope.name = scope.name.trim().to_string();
            scope.scope_type = upper(&scope.scope_type);
        }
        self.scopes.sort();
        self.scopes.dedup();
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs: Vec<Reference> = self
            .scopes
            .iter()
            .filter(|s| s.is_cluster())
            .map(|s| {
                Reference::new(
                    ResourceKind::Cluster,
                    s.name.trim(),
                    "scopes",
                    RefStrength::Required,
                )
            })
            .collect();
        refs.extend(self.roles.iter().filter(|r| !r.is_builtin()).map(|r| {
            Reference::new(
                ResourceKind::DatabaseRole,
                r.role_name.trim(),
                "roles",
                RefStrength::Optional,
            )
        }));
        refs
    }

    spec_variant!(DatabaseUserSpec, DatabaseUser);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeResource {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub collection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Privilege {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resource: PrivilegeResource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedRole {
    pub role_name: String,
    #[serde(default = "default_admin")]
    pub database_name: String,
}

impl InheritedRole {
    pub fn is_builtin(&self) -> bool {
        BUILTIN_ROLES.contains(&self.role_name.as_str())
    }
}

/// A custom database role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRoleSpec {
    #[serde(default)]
    pub role_name: String,
    #[serde(default = "default_admin")]
    pub database_name: String,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherited_roles: Vec<InheritedRole>,
}

impl KindSpec for DatabaseRoleSpec {
    const KIND: ResourceKind = ResourceKind::DatabaseRole;

    fn natural_key(&self) -> String {
        self.role_name.trim().to_string()
    }

    fn default_name(&mut self, name: &str) {
        if self.role_name.trim().is_empty() {
            self.role_name = name.to_string();
        }
    }

    fn normalize(&mut self) {
        self.role_name = self.role_name.trim().to_string();
        self.database_name = self.database_name.trim().to_string();
        for privilege in &mut self.privileges {
            for action in &mut privilege.actions {
                *action = upper(action);
            }
            privilege.actions.sort();
            privilege.actions.dedup();
        }
        self.privileges.sort();
        self.inherited_roles.sort();
        self.inherited_roles.dedup();
    }

    fn references(&self) -> Vec<Reference> {
        self.inherited_roles
            .iter()
            .filter(|r| !r.is_builtin())
            .map(|r| {
                Reference::new(
                    ResourceKind::DatabaseRole,
                    r.role_name.trim(),
                    "inheritedRoles",
                    RefStrength::Optional,
                )
            })
            .collect()
    }

    spec_variant!(DatabaseRoleSpec, DatabaseRole);
}
