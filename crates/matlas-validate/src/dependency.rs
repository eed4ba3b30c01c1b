//! Dependency layer.
//!
//! Cross-resource rules evaluated over the whole document and its
//! [`DependencyGraph`]: uniqueness, reference integrity, the provider
//! catalog, address ranges, expiry timestamps and cycles.

use crate::graph::DependencyGraph;
use crate::issue::{IssueSet, Severity, ValidationIssue};
use crate::validator::ValidationOptions;
use chrono::{DateTime, Duration, Utc};
use matlas_core::cidr::Ipv4Cidr;
use matlas_core::provider::{instance_size_availability, Availability};
use matlas_core::resources::{
    ClusterSpec, DatabaseUserSpec, NetworkAccessSpec, NetworkContainerSpec, NetworkPeeringSpec,
    VpcEndpointSpec, POWERFUL_ROLES,
};
use matlas_core::{ApplyDocument, ProjectState, Provider, RefStrength, Resource, ResourceKind};
use std::collections::BTreeMap;
use tracing::debug;

/// Expiry closer than this is flagged.
const EXPIRY_WARNING_WINDOW_HOURS: i64 = 24;

/// Runs every cross-resource rule.
pub struct DependencyLayer<'a> {
    doc: &'a ApplyDocument,
    graph: &'a DependencyGraph,
    options: &'a ValidationOptions,
    context: Option<&'a ProjectState>,
}

impl<'a> DependencyLayer<'a> {
    pub fn new(
        doc: &'a ApplyDocument,
        graph: &'a DependencyGraph,
        options: &'a ValidationOptions,
    ) -> Self {
        Self {
            doc,
            graph,
            options,
            context: None,
        }
    }

    /// Observed state that may satisfy references the document leaves open.
    pub fn with_context(mut self, context: Option<&'a ProjectState>) -> Self {
        self.context = context;
        self
    }

    pub fn check(&self) -> IssueSet {
        let mut issues = IssueSet::default();
        self.check_shape(&mut issues);
        self.check_duplicates(&mut issues);
        self.check_references(&mut issues);
        self.check_depends_on(&mut issues);
        self.check_provider_catalog(&mut issues);
        self.check_network(&mut issues);
        self.check_expiry(&mut issues);
        self.check_scopes(&mut issues);
        if !self.options.allow_cycles {
            self.check_cycles(&mut issues);
        }
        debug!(issues = issues.issues.len(), "dependency layer finished");
        issues
    }

    fn check_shape(&self, issues: &mut IssueSet) {
        if self.doc.is_empty() {
            issues.push(ValidationIssue::empty_document());
        }
        let projects = self.doc.of_kind(ResourceKind::Project).count();
        if projects > 1 {
            issues.push(ValidationIssue::multiple_projects(projects));
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn check_duplicates(&self, issues: &mut IssueSet) {
        for kind in self.doc.kinds() {
            let mut by_name: BTreeMap<&str, usize> = BTreeMap::new();
            let mut by_key: BTreeMap<String, &Resource> = BTreeMap::new();
            for resource in self.doc.of_kind(kind) {
                let seen = by_name.entry(resource.name()).or_insert(0);
                *seen += 1;
                if *seen == 2 {
                    issues.push(
                        ValidationIssue::duplicate_name(kind.as_str(), resource.name())
                            .at(resource.id()),
                    );
                }
                if *seen > 1 {
                    continue;
                }

                let key = resource.natural_key();
                if key.is_empty() {
                    continue;
                }
                match by_key.get(&key) {
                    Some(first) => issues.push(
                        ValidationIssue::duplicate_key(
                            kind.as_str(),
                            &key,
                            first.name(),
                            resource.name(),
                        )
                        .at(resource.id()),
                    ),
                    None => {
                        by_key.insert(key, resource);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    fn check_references(&self, issues: &mut IssueSet) {
        for missing in &self.graph.unresolved {
            let target_kind = missing.target_kind.as_str();
            let observed = self.observed(missing.target_kind, &missing.target);
            match missing.strength {
                RefStrength::Soft => {}
                RefStrength::Required => {
                    // A search index may target a cluster that already exists.
                    let satisfied = observed
                        && missing.from.kind == ResourceKind::SearchIndex
                        && missing.target_kind == ResourceKind::Cluster;
                    if !satisfied {
                        issues.push(
                            ValidationIssue::missing_reference(
                                target_kind,
                                &missing.target,
                                &missing.field,
                            )
                            .at(&missing.from),
                        );
                    }
                }
                RefStrength::Optional => {
                    if !observed {
                        issues.push(
                            ValidationIssue::unresolved_reference(
                                target_kind,
                                &missing.target,
                                &missing.field,
                            )
                            .at(&missing.from),
                        );
                    }
                }
            }
        }
    }

    fn observed(&self, kind: ResourceKind, key: &str) -> bool {
        self.context
            .is_some_and(|state| state.find_by_key(kind, key).is_some())
    }

    fn check_depends_on(&self, issues: &mut IssueSet) {
        for (from, entry, reason) in &self.graph.malformed {
            issues.push(ValidationIssue::invalid_depends_on(entry, reason).at(from));
        }
        for edge in self.graph.dangling_edges() {
            issues.push(
                ValidationIssue::invalid_depends_on(
                    &edge.to.to_string(),
                    "no such resource in the document",
                )
                .at(&edge.from),
            );
        }
    }

    // ------------------------------------------------------------------
    // Provider catalog
    // ------------------------------------------------------------------

    fn check_provider_catalog(&self, issues: &mut IssueSet) {
        for resource in &self.doc.resources {
            let placement = match resource.kind() {
                ResourceKind::Cluster => resource
                    .spec
                    .downcast::<ClusterSpec>()
                    .map(|s| (s.provider.as_str(), s.region.as_str())),
                ResourceKind::NetworkContainer => resource
                    .spec
                    .downcast::<NetworkContainerSpec>()
                    .map(|s| (s.provider.as_str(), s.region.as_str())),
                ResourceKind::NetworkPeering => resource
                    .spec
                    .downcast::<NetworkPeeringSpec>()
                    .map(|s| (s.provider.as_str(), s.region.as_str())),
                ResourceKind::VpcEndpoint => resource
                    .spec
                    .downcast::<VpcEndpointSpec>()
                    .map(|s| (s.provider.as_str(), s.region.as_str())),
                _ => None,
            };
            let Some((provider, region)) = placement else {
                continue;
            };
            // Unknown providers and empty regions are schema errors.
            let Ok(provider) = provider.parse::<Provider>() else {
                continue;
            };
            if region.trim().is_empty() {
                continue;
            }
            if !provider.has_region(region) {
                issues.push(
                    ValidationIssue::provider_region(provider.as_str(), region).at(resource.id()),
                );
                continue;
            }

            if let Some(cluster) = resource.spec.downcast::<ClusterSpec>() {
                if let Availability::Restricted(reason) =
                    instance_size_availability(provider, region, &cluster.instance_size)
                {
                    issues.push(ValidationIssue::instance_size(&reason).at(resource.id()));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    fn check_network(&self, issues: &mut IssueSet) {
        let mut containers: Vec<(&Resource, Ipv4Cidr)> = Vec::new();
        for resource in self.doc.of_kind(ResourceKind::NetworkContainer) {
            let Some(spec) = resource.spec.downcast::<NetworkContainerSpec>() else {
                continue;
            };
            if let Some(cidr) = parse_cidr(&spec.cidr_block, resource, "cidrBlock", issues) {
                containers.push((resource, cidr));
            }
        }
        for (i, (a, cidr_a)) in containers.iter().enumerate() {
            for (b, cidr_b) in &containers[i + 1..] {
                if cidr_a.overlaps(cidr_b) {
                    issues.push(
                        ValidationIssue::cidr_overlap(
                            Severity::Warning,
                            ResourceKind::NetworkContainer.as_str(),
                            &format!("{cidr_a} ({})", a.name()),
                            &format!("{cidr_b} ({})", b.name()),
                        )
                        .at(b.id())
                        .with_path("spec/cidrBlock"),
                    );
                }
            }
        }

        for resource in self.doc.of_kind(ResourceKind::NetworkPeering) {
            if let Some(spec) = resource.spec.downcast::<NetworkPeeringSpec>() {
                if !spec.cidr_block.trim().is_empty() {
                    parse_cidr(&spec.cidr_block, resource, "cidrBlock", issues);
                }
            }
        }

        let overlap_severity = if self.options.allow_network_overlap {
            Severity::Info
        } else {
            Severity::Warning
        };
        let mut entries: Vec<(&Resource, Ipv4Cidr)> = Vec::new();
        for resource in self.doc.of_kind(ResourceKind::NetworkAccess) {
            let Some(spec) = resource.spec.downcast::<NetworkAccessSpec>() else {
                continue;
            };
            if let Some(ip) = &spec.ip_address {
                if let Some(cidr) = parse_cidr(ip, resource, "ipAddress", issues) {
                    entries.push((resource, cidr));
                }
            }
            if let Some(raw) = &spec.cidr {
                if let Some(cidr) = parse_cidr(raw, resource, "cidr", issues) {
                    entries.push((resource, cidr));
                }
            }
        }
        for (i, (a, cidr_a)) in entries.iter().enumerate() {
            for (b, cidr_b) in &entries[i + 1..] {
                // Identical ranges are duplicate keys, reported elsewhere.
                if a.id() == b.id() || cidr_a == cidr_b {
                    continue;
                }
                if cidr_a.overlaps(cidr_b) {
                    issues.push(
                        ValidationIssue::cidr_overlap(
                            overlap_severity,
                            ResourceKind::NetworkAccess.as_str(),
                            &format!("{cidr_a} ({})", a.name()),
                            &format!("{cidr_b} ({})", b.name()),
                        )
                        .at(b.id()),
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    fn check_expiry(&self, issues: &mut IssueSet) {
        let now = self.options.now.unwrap_or_else(Utc::now);
        for resource in &self.doc.resources {
            let expiry = match resource.kind() {
                ResourceKind::NetworkAccess => resource
                    .spec
                    .downcast::<NetworkAccessSpec>()
                    .and_then(|s| s.delete_after.as_deref())
                    .map(|v| ("deleteAfter", v)),
                ResourceKind::DatabaseUser => resource
                    .spec
                    .downcast::<DatabaseUserSpec>()
                    .and_then(|s| s.delete_after_date.as_deref())
                    .map(|v| ("deleteAfterDate", v)),
                _ => None,
            };
            let Some((field, value)) = expiry else {
                continue;
            };
            let issue = match DateTime::parse_from_rfc3339(value.trim()) {
                Err(_) => Some(ValidationIssue::invalid_timestamp(field, value)),
                Ok(at) => {
                    let at = at.with_timezone(&Utc);
                    if at <= now {
                        Some(ValidationIssue::expiry_in_past(field, value))
                    } else if at - now < Duration::hours(EXPIRY_WARNING_WINDOW_HOURS) {
                        Some(ValidationIssue::expiry_soon(field, value))
                    } else {
                        None
                    }
                }
            };
            if let Some(issue) = issue {
                issues.push(issue.at(resource.id()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn check_scopes(&self, issues: &mut IssueSet) {
        for resource in self.doc.of_kind(ResourceKind::DatabaseUser) {
            let Some(user) = resource.spec.downcast::<DatabaseUserSpec>() else {
                continue;
            };
            if !user.scopes.is_empty() {
                continue;
            }
            if let Some(role) = user
                .roles
                .iter()
                .find(|r| POWERFUL_ROLES.contains(&r.role_name.as_str()))
            {
                issues.push(
                    ValidationIssue::loose_scope(&user.username, &role.role_name)
                        .at(resource.id()),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------

    fn check_cycles(&self, issues: &mut IssueSet) {
        for cycle in self.graph.find_cycles() {
            let path: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
            let mut issue = ValidationIssue::circular(&path);
            if let Some(first) = cycle.first() {
                issue = issue.at(first);
            }
            issues.push(issue);
        }
    }
}

fn parse_cidr(
    value: &str,
    resource: &Resource,
    field: &str,
    issues: &mut IssueSet,
) -> Option<Ipv4Cidr> {
    match value.parse::<Ipv4Cidr>() {
        Ok(cidr) => Some(cidr),
        Err(e) => {
            issues.push(
                ValidationIssue::invalid_cidr(value, e.reason)
                    .at(resource.id())
                    .with_path(format!("spec/{field}")),
            );
            None
        }
    }
}
