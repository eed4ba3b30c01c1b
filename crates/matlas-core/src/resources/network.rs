//! Network access list entries, peering containers, peerings and private endpoints.

use super::{upper, KindSpec, RefStrength, Reference};
use crate::cidr::canonicalize;
use crate::kind::ResourceKind;
use crate::provider::normalize_region;
use serde::{Deserialize, Serialize};

/// One IP access list entry. Exactly one of the three sources is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAccessSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_security_group: Option<String>,
    /// RFC 3339 expiry; Atlas removes the entry afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl NetworkAccessSpec {
    /// Which source fields are populated.
    pub fn sources(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.ip_address.is_some() {
            out.push("ipAddress");
        }
        if self.cidr.is_some() {
            out.push("cidr");
        }
        if self.aws_security_group.is_some() {
            out.push("awsSecurityGroup");
        }
        out
    }

    /// The entry as a canonical CIDR, when it is IP-based.
    pub fn canonical_cidr(&self) -> Option<String> {
        self.cidr
            .as_deref()
            .or(self.ip_address.as_deref())
            .map(canonicalize)
    }
}

impl KindSpec for NetworkAccessSpec {
    const KIND: ResourceKind = ResourceKind::NetworkAccess;

    fn natural_key(&self) -> String {
        if let Some(cidr) = self.canonical_cidr() {
            return cidr;
        }
        self.aws_security_group
            .as_deref()
            .map(|sg| sg.trim().to_string())
            .unwrap_or_default()
    }

    fn normalize(&mut self) {
        // An address and its /32 are the same entry; prefer the address form.
        let ip = self.ip_address.as_deref().map(|v| v.trim().to_string());
        let cidr = self.cidr.as_deref().map(canonicalize);
        match (ip, cidr) {
            (Some(ip), Some(cidr)) if canonicalize(&ip) == cidr => {
                self.ip_address = Some(ip);
                self.cidr = None;
            }
            (None, Some(cidr)) if cidr.ends_with("/32") => {
                self.ip_address = Some(cidr.trim_end_matches("/32").to_string());
                self.cidr = None;
            }
            (ip, cidr) => {
                self.ip_address = ip;
                self.cidr = cidr;
            }
        }
        self.aws_security_group = self
            .aws_security_group
            .as_deref()
            .map(|v| v.trim().to_string());
        self.comment = self.comment.as_deref().map(|v| v.trim().to_string());
    }

    spec_variant!(NetworkAccessSpec, NetworkAccess);
}

/// A provider network container (Atlas-side VPC/VNet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkContainerSpec {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub cidr_block: String,
}

impl KindSpec for NetworkContainerSpec {
    const KIND: ResourceKind = ResourceKind::NetworkContainer;

    fn natural_key(&self) -> String {
        format!("{}:{}", upper(&self.provider), normalize_region(&self.region))
    }

    fn normalize(&mut self) {
        self.provider = upper(&self.provider);
        self.region = normalize_region(&self.region);
        self.cidr_block = canonicalize(&self.cidr_block);
    }

    spec_variant!(NetworkContainerSpec, NetworkContainer);
}

/// A peering connection between an Atlas container and a customer network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPeeringSpec {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub region: String,
    /// Customer-side CIDR routed over the peering.
    #[serde(default)]
    pub cidr_block: String,
    /// `metadata.name` of the NetworkContainer to peer from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_account_id: Option<String>,
}

impl KindSpec for NetworkPeeringSpec {
    const KIND: ResourceKind = ResourceKind::NetworkPeering;

    fn natural_key(&self) -> String {
        format!("{}:{}", upper(&self.provider), self.vpc_id.trim())
    }

    fn normalize(&mut self) {
        self.provider = upper(&self.provider);
        self.vpc_id = self.vpc_id.trim().to_string();
        self.region = normalize_region(&self.region);
        self.cidr_block = canonicalize(&self.cidr_block);
    }

    fn references(&self) -> Vec<Reference> {
        match &self.container_ref {
            Some(container) => vec![Reference::new(
                ResourceKind::NetworkContainer,
                container.clone(),
                "containerRef",
                RefStrength::Required,
            )],
            None => vec![Reference::new(
                ResourceKind::NetworkContainer,
                format!("{}:{}", upper(&self.provider), normalize_region(&self.region)),
                "region",
                RefStrength::Soft,
            )],
        }
    }

    spec_variant!(NetworkPeeringSpec, NetworkPeering);
}

/// A private endpoint service for a provider region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcEndpointSpec {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub region: String,
}

impl KindSpec for VpcEndpointSpec {
    const KIND: ResourceKind = ResourceKind::VpcEndpoint;

    fn natural_key(&self) -> String {
        format!("{}:{}", upper(&self.provider), normalize_region(&self.region))
    }

    fn normalize(&mut self) {
        self.provider = upper(&self.provider);
        self.region = normalize_region(&self.region);
    }

    spec_variant!(VpcEndpointSpec, VpcEndpoint);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_entries_match_across_address_and_cidr_forms() {
        let by_ip = NetworkAccessSpec {
            ip_address: Some("203.0.113.7".into()),
            ..Default::default()
        };
        let by_cidr = NetworkAccessSpec {
            cidr: Some("203.0.113.7/32".into()),
            ..Default::default()
        };
        assert_eq!(by_ip.natural_key(), by_cidr.natural_key());
    }

    #[test]
    fn cidr_is_canonicalized_on_normalize() {
        let mut spec = NetworkAccessSpec {
            cidr: Some("10.0.0.0/08".into()),
            ..Default::default()
        };
        spec.normalize();
        assert_eq!(spec.cidr.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn host_cidr_normalizes_to_address_form() {
        let mut observed = NetworkAccessSpec {
            ip_address: Some("203.0.113.7".into()),
            cidr: Some("203.0.113.7/32".into()),
            ..Default::default()
        };
        let mut desired = NetworkAccessSpec {
            cidr: Some("203.0.113.7/32".into()),
            ..Default::default()
        };
        observed.normalize();
        desired.normalize();
        assert_eq!(observed, desired);
        assert_eq!(desired.ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn peering_without_container_ref_soft_links_by_region() {
        let spec = NetworkPeeringSpec {
            provider: "aws".into(),
            vpc_id: "vpc-123".into(),
            region: "us-east-1".into(),
            cidr_block: "172.31.0.0/16".into(),
            ..Default::default()
        };
        let refs = spec.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "AWS:US_EAST_1");
        assert_eq!(refs[0].strength, RefStrength::Soft);
    }
}
