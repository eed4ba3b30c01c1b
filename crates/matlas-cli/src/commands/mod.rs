//! Command implementations for the matlas CLI.

pub mod apply;
pub mod cleanup;
pub mod discover;
pub mod plan;
pub mod validate;

use crate::context::{Backend, Context, TargetArgs};
use crate::exit::Exit;
use crate::output;
use anyhow::Context as _;
use clap::Args;
use matlas_core::loader::load_files;
use matlas_core::{ApplyDocument, Plan, ProjectState, ResourceKind};
use matlas_planner::{PlanOptions, Planner};
use matlas_runtime::{CancelToken, Discoverer, Discovery};
use matlas_validate::{IssueSet, ValidationOptions, Validator};
use tracing::info;

/// Manifest inputs shared by every document-driven command.
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Manifest files or glob patterns (repeatable)
    #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
    pub files: Vec<String>,

    /// Treat unresolved references, loose scopes and overlapping ranges as errors
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

impl ManifestArgs {
    pub fn load(&self) -> anyhow::Result<ApplyDocument> {
        let doc = load_files(&self.files).context("loading manifests")?;
        info!(resources = doc.len(), files = self.files.len(), "manifests loaded");
        Ok(doc)
    }
}

pub fn validate_document(
    doc: &ApplyDocument,
    context: Option<&ProjectState>,
    strict: bool,
) -> IssueSet {
    let options = if strict {
        ValidationOptions::strict()
    } else {
        ValidationOptions::default()
    };
    let mut issues = Validator::new(options).validate_with_context(doc, context);
    issues.sort();
    issues
}

/// Rejected credentials end the command with the config exit code instead
/// of surfacing later as an incomplete snapshot.
pub fn check_credentials(discovery: &Discovery) -> Result<(), Exit> {
    match discovery.auth_failure() {
        Some(err) => Err(Exit::config(format!(
            "authentication failed during discovery: {}",
            err.message
        ))),
        None => Ok(()),
    }
}

/// Everything a plan-driven command needs after discovery.
pub struct Prepared {
    pub backend: Backend,
    pub project_id: String,
    pub discoverer: Discoverer,
    pub plan: Plan,
}

/// Load, discover, validate against the live project, then plan.
pub async fn prepare(
    ctx: &Context,
    manifests: &ManifestArgs,
    target: &TargetArgs,
    options: PlanOptions,
    cancel: &CancelToken,
) -> anyhow::Result<Prepared> {
    let doc = manifests.load()?;
    let project_id = ctx.project_id(target)?;
    let backend = ctx.backend(target)?;

    let discoverer = Discoverer::new(backend.services.clone())
        .with_config(ctx.config.discovery.clone())
        .with_execution(ctx.config.execution.clone())
        .with_cancel(cancel.clone());
    let discovery = discoverer
        .discover_detailed(&project_id, &ResourceKind::ALL)
        .await;
    check_credentials(&discovery)?;
    let state = discovery.state;
    output::discovery_warnings(&state);

    let issues = validate_document(&doc, Some(&state), manifests.strict);
    if !issues.issues.is_empty() {
        output::issues(&issues);
    }
    if issues.has_errors() {
        return Err(Exit::validation("manifests failed validation").into());
    }

    let plan = Planner::new(options)
        .plan(&doc, &state)
        .context("building plan")?;
    Ok(Prepared {
        backend,
        project_id,
        discoverer,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::ExitCode;
    use matlas_runtime::ServiceError;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn discovery(failures: Vec<(ResourceKind, ServiceError)>) -> Discovery {
        let mut state = ProjectState::new("proj-1");
        for (kind, err) in &failures {
            state.mark_error(*kind, err.to_string());
        }
        Discovery {
            state,
            failures: failures.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_auth_failure_maps_to_config_exit() {
        let err = check_credentials(&discovery(vec![
            (ResourceKind::Cluster, ServiceError::transient("503")),
            (ResourceKind::DatabaseUser, ServiceError::authn("API key revoked")),
        ]))
        .unwrap_err();
        assert_eq!(err.code, ExitCode::Config);
        assert!(err.message.contains("API key revoked"));
    }

    #[test]
    fn test_other_failures_pass_through() {
        assert!(check_credentials(&discovery(vec![(
            ResourceKind::Cluster,
            ServiceError::transient("503")
        )]))
        .is_ok());
        assert!(check_credentials(&discovery(Vec::new())).is_ok());
    }
}
