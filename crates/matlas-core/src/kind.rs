//! Resource kinds and the per-kind rules the planner and validator share.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every resource kind an apply document may contain.
///
/// Variant order is the planning rank: when two operations land in the same
/// stage, the lower-ranked kind is scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Project,
    Cluster,
    NetworkContainer,
    NetworkPeering,
    #[serde(rename = "VPCEndpoint")]
    VpcEndpoint,
    NetworkAccess,
    DatabaseRole,
    DatabaseUser,
    SearchIndex,
    AlertConfig,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Project,
        ResourceKind::Cluster,
        ResourceKind::NetworkContainer,
        ResourceKind::NetworkPeering,
        ResourceKind::VpcEndpoint,
        ResourceKind::NetworkAccess,
        ResourceKind::DatabaseRole,
        ResourceKind::DatabaseUser,
        ResourceKind::SearchIndex,
        ResourceKind::AlertConfig,
    ];

    /// Manifest spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "Project",
            ResourceKind::Cluster => "Cluster",
            ResourceKind::NetworkContainer => "NetworkContainer",
            ResourceKind::NetworkPeering => "NetworkPeering",
            ResourceKind::VpcEndpoint => "VPCEndpoint",
            ResourceKind::NetworkAccess => "NetworkAccess",
            ResourceKind::DatabaseRole => "DatabaseRole",
            ResourceKind::DatabaseUser => "DatabaseUser",
            ResourceKind::SearchIndex => "SearchIndex",
            ResourceKind::AlertConfig => "AlertConfig",
        }
    }

    /// Deterministic tie-break rank within a stage.
    pub fn rank(&self) -> u32 {
        *self as u32
    }

    /// Whether an Atlas create for this kind returns before the resource is usable.
    pub fn is_async_provisioned(&self) -> bool {
        matches!(self, ResourceKind::Cluster | ResourceKind::NetworkPeering)
    }

    /// Field-level comparison rules used by the diff engine.
    pub fn diff_rules(&self) -> &'static DiffRules {
        match self {
            ResourceKind::Project => &PROJECT_RULES,
            ResourceKind::Cluster => &CLUSTER_RULES,
            ResourceKind::NetworkContainer => &CONTAINER_RULES,
            ResourceKind::NetworkPeering => &PEERING_RULES,
            ResourceKind::VpcEndpoint => &VPC_ENDPOINT_RULES,
            ResourceKind::NetworkAccess => &NETWORK_ACCESS_RULES,
            ResourceKind::DatabaseRole => &ROLE_RULES,
            ResourceKind::DatabaseUser => &USER_RULES,
            ResourceKind::SearchIndex => &SEARCH_INDEX_RULES,
            ResourceKind::AlertConfig => &ALERT_CONFIG_RULES,
        }
    }

    /// Maximum length of `metadata.name` for the kind.
    pub fn max_name_len(&self) -> usize {
        match self {
            ResourceKind::Cluster => 64,
            ResourceKind::Project => 64,
            _ => 128,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    /// Accepts the manifest spelling, case-insensitively, plus the plural
    /// forms used by `discover --include`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        let kind = match folded.as_str() {
            "project" | "projects" => ResourceKind::Project,
            "cluster" | "clusters" => ResourceKind::Cluster,
            "networkcontainer" | "networkcontainers" | "containers" => {
                ResourceKind::NetworkContainer
            }
            "networkpeering" | "networkpeerings" | "peerings" => ResourceKind::NetworkPeering,
            "vpcendpoint" | "vpcendpoints" => ResourceKind::VpcEndpoint,
            "networkaccess" | "network" => ResourceKind::NetworkAccess,
            "databaserole" | "databaseroles" | "roles" => ResourceKind::DatabaseRole,
            "databaseuser" | "databaseusers" | "users" => ResourceKind::DatabaseUser,
            "searchindex" | "searchindexes" | "search" => ResourceKind::SearchIndex,
            "alertconfig" | "alertconfigs" | "alertconfiguration" | "alerts" => {
                ResourceKind::AlertConfig
            }
            _ => return Err(UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

/// Returned when a string does not name a resource kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

/// How the diff engine treats individual top-level spec fields.
#[derive(Debug)]
pub struct DiffRules {
    /// Changing any of these forces Delete+Create.
    pub immutable: &'static [&'static str],
    /// Arrays compared as sets.
    pub set_valued: &'static [&'static str],
    /// Strings compared case-insensitively.
    pub case_insensitive: &'static [&'static str],
    /// Never readable from Atlas; excluded from comparison.
    pub write_only: &'static [&'static str],
    /// When true, every field change requires replacement (no in-place update).
    pub replace_on_any_change: bool,
}

impl DiffRules {
    pub fn is_immutable(&self, field: &str) -> bool {
        self.replace_on_any_change || self.immutable.contains(&field)
    }

    pub fn is_set_valued(&self, field: &str) -> bool {
        self.set_valued.contains(&field)
    }

    pub fn is_case_insensitive(&self, field: &str) -> bool {
        self.case_insensitive.contains(&field)
    }

    pub fn is_write_only(&self, field: &str) -> bool {
        self.write_only.contains(&field)
    }
}

static PROJECT_RULES: DiffRules = DiffRules {
    immutable: &["organizationId"],
    set_valued: &[],
    case_insensitive: &[],
    write_only: &[],
    replace_on_any_change: false,
};

static CLUSTER_RULES: DiffRules = DiffRules {
    immutable: &["name", "provider", "region"],
    set_valued: &[],
    case_insensitive: &["provider", "region", "instanceSize", "clusterType"],
    write_only: &[],
    replace_on_any_change: false,
};

static CONTAINER_RULES: DiffRules = DiffRules {
    immutable: &["provider", "region", "cidrBlock"],
    set_valued: &[],
    case_insensitive: &["provider", "region"],
    write_only: &[],
    replace_on_any_change: false,
};

static PEERING_RULES: DiffRules = DiffRules {
    immutable: &["provider", "vpcId", "region", "containerRef", "awsAccountId"],
    set_valued: &[],
    case_insensitive: &["provider", "region"],
    write_only: &[],
    replace_on_any_change: false,
};

static VPC_ENDPOINT_RULES: DiffRules = DiffRules {
    immutable: &["provider", "region"],
    set_valued: &[],
    case_insensitive: &["provider", "region"],
    write_only: &[],
    replace_on_any_change: false,
};

static NETWORK_ACCESS_RULES: DiffRules = DiffRules {
    immutable: &["ipAddress", "cidr", "awsSecurityGroup"],
    set_valued: &[],
    case_insensitive: &[],
    write_only: &[],
    replace_on_any_change: false,
};

static ROLE_RULES: DiffRules = DiffRules {
    immutable: &["roleName"],
    set_valued: &["privileges", "inheritedRoles"],
    case_insensitive: &[],
    write_only: &[],
    replace_on_any_change: false,
};

static USER_RULES: DiffRules = DiffRules {
    immutable: &["username", "authDatabase"],
    set_valued: &["roles", "scopes"],
    case_insensitive: &[],
    write_only: &["password"],
    replace_on_any_change: false,
};

// Atlas exposes no in-place search index update we rely on.
static SEARCH_INDEX_RULES: DiffRules = DiffRules {
    immutable: &["clusterName", "databaseName", "collectionName", "indexName"],
    set_valued: &[],
    case_insensitive: &[],
    write_only: &[],
    replace_on_any_change: true,
};

static ALERT_CONFIG_RULES: DiffRules = DiffRules {
    immutable: &["eventTypeName"],
    set_valued: &["matchers", "notifications"],
    case_insensitive: &[],
    write_only: &[],
    replace_on_any_change: false,
};
