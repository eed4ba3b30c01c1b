//! Validation of matlas apply documents.
//!
//! Two layers run over a loaded [`matlas_core::ApplyDocument`]:
//!
//! - the schema layer checks each resource against its kind's embedded JSON
//!   Schema and naming rule;
//! - the dependency layer builds a [`DependencyGraph`] and checks
//!   uniqueness, references, provider regions, address ranges, expiry
//!   timestamps and cycles.
//!
//! Both report into an [`IssueSet`]; errors block planning.

pub mod dependency;
pub mod graph;
pub mod issue;
pub mod schema;
pub mod validator;

pub use dependency::DependencyLayer;
pub use graph::{DependencyGraph, Edge, EdgeOrigin, Unresolved};
pub use issue::{IssueKind, IssueSet, Severity, ValidationIssue};
pub use schema::SchemaLayer;
pub use validator::{ValidationOptions, Validator};
