use super::KindSpec;
use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An Atlas project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_default_alerts_settings: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl KindSpec for ProjectSpec {
    const KIND: ResourceKind = ResourceKind::Project;

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
        self.organization_id = self.organization_id.trim().to_string();
    }

    spec_variant!(ProjectSpec, Project);
}
