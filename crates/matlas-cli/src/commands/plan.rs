//! `matlas plan` and `matlas diff`.

use super::{prepare, ManifestArgs};
use crate::context::{Context, TargetArgs};
use crate::exit::ExitCode;
use anyhow::Context as _;
use clap::{Args, ValueEnum};
use matlas_planner::{render_diff, render_plan, PlanOptions};
use matlas_runtime::CancelToken;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Write the JSON plan to this file
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Never delete resources the manifests do not declare
    #[arg(long, default_value_t = false)]
    pub preserve_existing: bool,

    #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
    pub format: PlanFormat,
}

impl PlanArgs {
    fn options(&self) -> PlanOptions {
        PlanOptions {
            preserve_existing: self.preserve_existing,
            ..Default::default()
        }
    }
}

pub async fn plan(ctx: &Context, args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let prepared = prepare(ctx, &args.manifests, &args.target, args.options(), &CancelToken::new()).await?;
    let plan = &prepared.plan;
    match args.format {
        PlanFormat::Text => print!("{}", render_plan(plan)),
        PlanFormat::Json => println!("{}", plan.to_json()?),
    }
    if let Some(out) = &args.out {
        fs::write(out, plan.to_json()?)
            .with_context(|| format!("writing plan to {}", out.display()))?;
        println!("✔ Plan written to {}", out.display());
    }
    Ok(ExitCode::Success)
}

pub async fn diff(ctx: &Context, args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let prepared = prepare(ctx, &args.manifests, &args.target, args.options(), &CancelToken::new()).await?;
    print!("{}", render_diff(&prepared.plan));
    Ok(ExitCode::Success)
}
