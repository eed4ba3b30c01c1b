use super::{upper, KindSpec, RefStrength, Reference};
use crate::kind::ResourceKind;
use crate::provider::normalize_region;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An Atlas cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Atlas cluster name; defaults to `metadata.name`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub instance_size: String,
    #[serde(
        default,
        rename = "mongoDBVersion",
        deserialize_with = "super::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub mongodb_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
    #[serde(default, rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl KindSpec for ClusterSpec {
    const KIND: ResourceKind = ResourceKind::Cluster;

    fn natural_key(&self) -> String {
        self.name.trim().to_string()
    }

    fn default_name(&mut self, name: &str) {
        if self.name.trim().is_empty() {
            self.name = name.to_string();
        }
    }

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.provider = upper(&self.provider);
        self.region = normalize_region(&self.region);
        self.instance_size = upper(&self.instance_size);
        self.cluster_type = self.cluster_type.as_deref().map(upper);
        self.mongodb_version = self
            .mongodb_version
            .as_deref()
            .map(|v| v.trim().to_string());
    }

    fn references(&self) -> Vec<Reference> {
        // A container declared for the same provider region must exist first.
        vec![Reference::new(
            ResourceKind::NetworkContainer,
            format!("{}:{}", upper(&self.provider), normalize_region(&self.region)),
            "region",
            RefStrength::Soft,
        )]
    }

    spec_variant!(ClusterSpec, Cluster);
}
