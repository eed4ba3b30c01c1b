//! `matlas discover` and `matlas show`.

use super::check_credentials;
use crate::context::{Context, TargetArgs};
use crate::exit::ExitCode;
use crate::output;
use anyhow::Context as _;
use clap::{Args, ValueEnum};
use matlas_core::{ProjectState, ResourceKind};
use matlas_runtime::{Discoverer, OpenAlert};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Kinds to discover, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<ResourceKind>,

    /// Write to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Emit an ApplyDocument manifest instead of the raw snapshot
    #[arg(long, default_value_t = false)]
    pub convert_to_apply: bool,

    /// metadata.name of the converted document
    #[arg(long, default_value = "discovered")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowFormat {
    Json,
    Yaml,
    Summary,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(short = 'o', long = "output", value_enum, default_value_t = ShowFormat::Summary)]
    pub format: ShowFormat,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowReport<'a> {
    #[serde(flatten)]
    state: &'a ProjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    open_alerts: Option<&'a [OpenAlert]>,
}

fn discoverer(ctx: &Context, target: &TargetArgs) -> anyhow::Result<(String, Discoverer)> {
    let project_id = ctx.project_id(target)?;
    let backend = ctx.backend(target)?;
    let discoverer = Discoverer::new(backend.services.clone())
        .with_config(ctx.config.discovery.clone())
        .with_execution(ctx.config.execution.clone());
    Ok((project_id, discoverer))
}

pub async fn discover(ctx: &Context, args: &DiscoverArgs) -> anyhow::Result<ExitCode> {
    let (project_id, discoverer) = discoverer(ctx, &args.target)?;
    let kinds: Vec<ResourceKind> = if args.include.is_empty() {
        ResourceKind::ALL.to_vec()
    } else {
        args.include.clone()
    };
    let discovery = discoverer.discover_detailed(&project_id, &kinds).await;
    check_credentials(&discovery)?;
    let state = discovery.state;
    output::discovery_warnings(&state);

    let rendered = if args.convert_to_apply {
        state.to_apply_document(&args.name).to_yaml()?
    } else {
        serde_yaml::to_string(&state)?
    };
    match &args.output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("writing discovery output to {}", path.display()))?;
            println!("✔ Discovered {} resource(s) into {}", state.total(), path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(if state.partial {
        ExitCode::Failure
    } else {
        ExitCode::Success
    })
}

pub async fn show(ctx: &Context, args: &ShowArgs) -> anyhow::Result<ExitCode> {
    let (project_id, discoverer) = discoverer(ctx, &args.target)?;
    let discovery = discoverer
        .discover_detailed(&project_id, &ResourceKind::ALL)
        .await;
    check_credentials(&discovery)?;
    let state = discovery.state;
    let alerts = match discoverer.open_alerts(&project_id).await {
        Ok(alerts) => Some(alerts),
        Err(err) => {
            warn!(error = %err, "could not read open alerts");
            None
        }
    };

    let report = ShowReport {
        state: &state,
        open_alerts: alerts.as_deref(),
    };
    match args.format {
        ShowFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ShowFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        ShowFormat::Summary => {
            output::discovery_warnings(&state);
            output::state_summary(&state, alerts.as_deref());
        }
    }
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlas_core::loader::load_str;
    use matlas_core::resources::ClusterSpec;
    use matlas_core::{KindSpec, MatlasConfig};
    use matlas_runtime::{EmulatorOptions, InMemoryAtlas};
    use pretty_assertions::assert_eq;

    fn seeded(dir: &tempfile::TempDir) -> TargetArgs {
        let path = dir.path().join("state.json");
        let atlas = InMemoryAtlas::with_options(EmulatorOptions::default());
        let spec = ClusterSpec {
            name: "c1".into(),
            provider: "AWS".into(),
            region: "US_EAST_1".into(),
            instance_size: "M10".into(),
            ..Default::default()
        };
        atlas.seed("proj-1", spec.into_spec()).unwrap();
        atlas.save(&path).unwrap();
        TargetArgs {
            project_id: Some("proj-1".into()),
            state_file: Some(path),
        }
    }

    #[tokio::test]
    async fn test_convert_to_apply_writes_loadable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("discovered.yaml");
        let args = DiscoverArgs {
            target: seeded(&dir),
            include: vec![ResourceKind::Cluster],
            output: Some(out.clone()),
            convert_to_apply: true,
            name: "discovered".into(),
        };
        let ctx = Context::with_config(MatlasConfig::default());

        assert_eq!(discover(&ctx, &args).await.unwrap(), ExitCode::Success);

        let yaml = fs::read_to_string(&out).unwrap();
        let doc = load_str(&yaml, "discovered.yaml").unwrap();
        assert_eq!(doc.of_kind(ResourceKind::Cluster).count(), 1);
    }

    #[tokio::test]
    async fn test_show_json_includes_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let args = ShowArgs {
            target: seeded(&dir),
            format: ShowFormat::Json,
        };
        let ctx = Context::with_config(MatlasConfig::default());
        assert_eq!(show(&ctx, &args).await.unwrap(), ExitCode::Success);
    }
}
