use super::{KindSpec, RefStrength, Reference};
use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};

fn default_index_type() -> String {
    "search".to_string()
}

/// An Atlas Search or Vector Search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexSpec {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub collection_name: String,
    #[serde(default)]
    pub index_name: String,
    /// `search` or `vectorSearch`.
    #[serde(default = "default_index_type")]
    pub index_type: String,
    #[serde(default)]
    pub definition: serde_json::Value,
}

impl Default for SearchIndexSpec {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            database_name: String::new(),
            collection_name: String::new(),
            index_name: String::new(),
            index_type: default_index_type(),
            definition: serde_json::Value::Null,
        }
    }
}

impl KindSpec for SearchIndexSpec {
    const KIND: ResourceKind = ResourceKind::SearchIndex;

    fn natural_key(&self) -> String {
        format!(
            "{}/{}.{}/{}",
            self.cluster_name.trim(),
            self.database_name.trim(),
            self.collection_name.trim(),
            self.index_name.trim()
        )
    }

    fn default_name(&mut self, name: &str) {
        if self.index_name.trim().is_empty() {
            self.index_name = name.to_string();
        }
    }

    fn normalize(&mut self) {
        self.cluster_name = self.cluster_name.trim().to_string();
        self.database_name = self.database_name.trim().to_string();
        self.collection_name = self.collection_name.trim().to_string();
        self.index_name = self.index_name.trim().to_string();
        if self.index_type.eq_ignore_ascii_case("vectorsearch") {
            self.index_type = "vectorSearch".to_string();
        } else if self.index_type.trim().is_empty() || self.index_type.eq_ignore_ascii_case("search")
        {
            self.index_type = default_index_type();
        }
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(
            ResourceKind::Cluster,
            self.cluster_name.trim(),
            "clusterName",
            RefStrength::Required,
        )]
    }

    spec_variant!(SearchIndexSpec, SearchIndex);
}
