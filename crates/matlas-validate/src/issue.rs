//! Validation issue types.
//!
//! Issues are data, not errors: a validation run collects every issue it
//! finds and the caller decides what blocks. Each rule has a named
//! constructor so messages and codes stay consistent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message.
    Info,
    /// May indicate a problem; blocks only in strict mode.
    Warning,
    /// The document cannot be planned.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Categories of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    // =========================================================================
    // Schema layer
    // =========================================================================
    /// Spec does not satisfy the kind's schema.
    Schema,
    /// Top-level spec property the schema does not know.
    UnknownField,
    /// `metadata.name` breaks the naming rule.
    InvalidName,

    // =========================================================================
    // Dependency layer
    // =========================================================================
    /// Two resources of a kind share a name or natural key.
    Duplicate,
    /// A required reference names nothing.
    MissingReference,
    /// An optional reference is not in the document.
    UnresolvedReference,
    /// `dependsOn` entry is malformed.
    InvalidDependsOn,
    /// Region is not offered by the provider.
    ProviderRegion,
    /// Instance size is probably not offered in the region.
    InstanceSize,
    /// Address ranges overlap.
    CidrOverlap,
    /// A CIDR or address does not parse.
    InvalidCidr,
    /// Expiry already passed.
    ExpiryInPast,
    /// Expiry within 24 hours.
    ExpirySoon,
    /// Expiry is not an RFC 3339 timestamp.
    InvalidTimestamp,
    /// Dependency cycle.
    Circular,
    /// Powerful role granted without cluster scopes.
    LooseScope,
    /// More than one Project in a document.
    MultipleProjects,
    /// Nothing declared.
    EmptyDocument,
}

impl IssueKind {
    /// Stable code for the category.
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::Schema => "MATLAS-VAL-001",
            IssueKind::UnknownField => "MATLAS-VAL-002",
            IssueKind::InvalidName => "MATLAS-VAL-003",
            IssueKind::Duplicate => "MATLAS-VAL-010",
            IssueKind::MissingReference => "MATLAS-VAL-011",
            IssueKind::UnresolvedReference => "MATLAS-VAL-012",
            IssueKind::InvalidDependsOn => "MATLAS-VAL-013",
            IssueKind::ProviderRegion => "MATLAS-VAL-020",
            IssueKind::InstanceSize => "MATLAS-VAL-021",
            IssueKind::CidrOverlap => "MATLAS-VAL-030",
            IssueKind::InvalidCidr => "MATLAS-VAL-031",
            IssueKind::ExpiryInPast => "MATLAS-VAL-040",
            IssueKind::ExpirySoon => "MATLAS-VAL-041",
            IssueKind::InvalidTimestamp => "MATLAS-VAL-042",
            IssueKind::Circular => "MATLAS-VAL-050",
            IssueKind::LooseScope => "MATLAS-VAL-060",
            IssueKind::MultipleProjects => "MATLAS-VAL-070",
            IssueKind::EmptyDocument => "MATLAS-VAL-071",
        }
    }

    /// Warnings of these kinds become errors in strict mode.
    pub fn is_strict_promotable(&self) -> bool {
        matches!(
            self,
            IssueKind::UnresolvedReference | IssueKind::LooseScope | IssueKind::CidrOverlap
        )
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub code: String,
    pub message: String,
    /// `Kind/name` of the resource the issue is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Path inside the resource, e.g. `spec/roles/0/roleName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            code: kind.code().to_string(),
            message: message.into(),
            resource: None,
            path: None,
            suggestion: None,
        }
    }

    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn info(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, message)
    }

    pub fn at(mut self, resource: impl fmt::Display) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    // =========================================================================
    // SCHEMA LAYER
    // =========================================================================

    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::error(IssueKind::Schema, message)
    }

    pub fn unknown_field(kind: &str, field: &str) -> Self {
        Self::warning(
            IssueKind::UnknownField,
            format!("{kind} spec has unknown property '{field}'; it will be ignored"),
        )
        .with_path(format!("spec/{field}"))
    }

    pub fn invalid_name(name: &str, reason: &str) -> Self {
        Self::error(
            IssueKind::InvalidName,
            format!("metadata.name '{name}' is invalid: {reason}"),
        )
        .with_path("metadata/name")
        .with_suggestion(
            "use letters, digits, '.', '_' or '-', starting and ending with a letter or digit",
        )
    }

    // =========================================================================
    // NAMES AND REFERENCES
    // =========================================================================

    pub fn duplicate_name(kind: &str, name: &str) -> Self {
        Self::error(
            IssueKind::Duplicate,
            format!("{kind} '{name}' is defined more than once"),
        )
        .with_path("metadata/name")
    }

    pub fn duplicate_key(kind: &str, key: &str, first: &str, second: &str) -> Self {
        Self::error(
            IssueKind::Duplicate,
            format!("{kind} resources '{first}' and '{second}' both identify '{key}' in Atlas"),
        )
        .with_suggestion("remove one of them or change its identifying fields")
    }

    pub fn missing_reference(target_kind: &str, target: &str, field: &str) -> Self {
        Self::error(
            IssueKind::MissingReference,
            format!("'{field}' references {target_kind} '{target}' which is not defined"),
        )
        .with_path(format!("spec/{field}"))
        .with_suggestion(format!("add a {target_kind} named '{target}' to the document"))
    }

    pub fn unresolved_reference(target_kind: &str, target: &str, field: &str) -> Self {
        Self::warning(
            IssueKind::UnresolvedReference,
            format!(
                "'{field}' references {target_kind} '{target}' which is not in this document; \
                 it must already exist in Atlas"
            ),
        )
        .with_path(format!("spec/{field}"))
    }

    pub fn invalid_depends_on(entry: &str, reason: &str) -> Self {
        Self::error(
            IssueKind::InvalidDependsOn,
            format!("dependsOn entry '{entry}' is invalid: {reason}"),
        )
        .with_path("dependsOn")
    }

    // =========================================================================
    // PROVIDER CATALOG
    // =========================================================================

    pub fn provider_region(provider: &str, region: &str) -> Self {
        Self::error(
            IssueKind::ProviderRegion,
            format!("region '{region}' is not offered by provider {provider}"),
        )
        .with_path("spec/region")
    }

    pub fn instance_size(reason: &str) -> Self {
        Self::warning(IssueKind::InstanceSize, reason.to_string()).with_path("spec/instanceSize")
    }

    // =========================================================================
    // NETWORK
    // =========================================================================

    pub fn cidr_overlap(severity: Severity, kind: &str, a: &str, b: &str) -> Self {
        Self::new(
            severity,
            IssueKind::CidrOverlap,
            format!("{kind} range {a} overlaps {b}"),
        )
    }

    pub fn invalid_cidr(value: &str, reason: &str) -> Self {
        Self::error(
            IssueKind::InvalidCidr,
            format!("'{value}' is not a valid IPv4 address or CIDR: {reason}"),
        )
    }

    // =========================================================================
    // TEMPORAL
    // =========================================================================

    pub fn expiry_in_past(field: &str, value: &str) -> Self {
        Self::error(
            IssueKind::ExpiryInPast,
            format!("{field} {value} is in the past"),
        )
        .with_path(format!("spec/{field}"))
    }

    pub fn expiry_soon(field: &str, value: &str) -> Self {
        Self::warning(
            IssueKind::ExpirySoon,
            format!("{field} {value} is less than 24 hours away"),
        )
        .with_path(format!("spec/{field}"))
    }

    pub fn invalid_timestamp(field: &str, value: &str) -> Self {
        Self::error(
            IssueKind::InvalidTimestamp,
            format!("{field} '{value}' is not an RFC 3339 timestamp"),
        )
        .with_path(format!("spec/{field}"))
        .with_suggestion("use a timestamp like 2030-01-31T12:00:00Z")
    }

    // =========================================================================
    // GRAPH
    // =========================================================================

    pub fn circular(path: &[String]) -> Self {
        Self::error(
            IssueKind::Circular,
            format!("circular dependency: {}", path.join(" -> ")),
        )
        .with_suggestion("break the cycle by removing one of the references")
    }

    // =========================================================================
    // SECURITY AND SHAPE
    // =========================================================================

    pub fn loose_scope(username: &str, role: &str) -> Self {
        Self::warning(
            IssueKind::LooseScope,
            format!("user '{username}' has role {role} on every cluster in the project"),
        )
        .with_path("spec/scopes")
        .with_suggestion("add scopes naming the clusters the user needs")
    }

    pub fn multiple_projects(count: usize) -> Self {
        Self::warning(
            IssueKind::MultipleProjects,
            format!("document declares {count} projects; a run targets a single project"),
        )
    }

    pub fn empty_document() -> Self {
        Self::info(IssueKind::EmptyDocument, "document declares no resources")
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(resource) = &self.resource {
            write!(f, " ({resource})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationIssue {}

/// All issues from one validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueSet {
    pub issues: Vec<ValidationIssue>,
}

impl IssueSet {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Warning)
    }

    pub fn infos(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(Severity::Info)
    }

    fn of(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_clean(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity >= Severity::Warning)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.of(severity).count()
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Turn strict-promotable warnings into errors.
    pub fn promote_strict(&mut self) {
        for issue in &mut self.issues {
            if issue.severity == Severity::Warning && issue.kind.is_strict_promotable() {
                issue.severity = Severity::Error;
            }
        }
    }

    /// Errors first, then by resource and code, for stable output.
    pub fn sort(&mut self) {
        self.issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.resource.cmp(&b.resource))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
    }
}
