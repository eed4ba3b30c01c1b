//! Validator entry point.

use crate::dependency::DependencyLayer;
use crate::graph::DependencyGraph;
use crate::issue::IssueSet;
use crate::schema::SchemaLayer;
use chrono::{DateTime, Utc};
use matlas_core::{ApplyDocument, ProjectState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Knobs for a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOptions {
    /// Promote unresolved references and loose scopes to errors.
    #[serde(default)]
    pub strict: bool,
    /// Skip cycle detection.
    #[serde(default)]
    pub allow_cycles: bool,
    /// Report overlapping access-list ranges as info instead of warnings.
    #[serde(default)]
    pub allow_network_overlap: bool,
    /// Clock used for expiry checks; the wall clock when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<DateTime<Utc>>,
}

impl ValidationOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

/// Schema and dependency validation of an apply document.
///
/// Validation has no side effects; the same document always yields the same
/// issues for the same options and context.
pub struct Validator {
    schema: SchemaLayer,
    options: ValidationOptions,
}

impl Validator {
    pub fn new(options: ValidationOptions) -> Self {
        Self {
            schema: SchemaLayer::new(),
            options,
        }
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    pub fn validate(&self, doc: &ApplyDocument) -> IssueSet {
        self.validate_with_context(doc, None)
    }

    /// Validate with observed state available to satisfy references that
    /// may point at pre-existing Atlas objects.
    pub fn validate_with_context(
        &self,
        doc: &ApplyDocument,
        context: Option<&ProjectState>,
    ) -> IssueSet {
        let mut issues = self.schema.validate(doc);
        let graph = DependencyGraph::build(doc);
        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "dependency graph built"
        );
        issues.extend(
            DependencyLayer::new(doc, &graph, &self.options)
                .with_context(context)
                .check()
                .issues,
        );
        if self.options.strict {
            issues.promote_strict();
        }
        issues.sort();
        info!(
            resources = doc.len(),
            errors = issues.count(crate::Severity::Error),
            warnings = issues.count(crate::Severity::Warning),
            "validation complete"
        );
        issues
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationOptions::default())
    }
}
