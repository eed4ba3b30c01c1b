//! `matlas apply` and `matlas destroy`.

use super::{prepare, ManifestArgs, Prepared};
use crate::context::{Context, TargetArgs};
use crate::exit::{Exit, ExitCode};
use crate::output::{self, ConsoleProgress};
use clap::Args;
use matlas_core::{ExecutionResult, RunStatus};
use matlas_planner::{render_plan, PlanOptions};
use matlas_runtime::{simulate, CancelToken, DryRunMode, Executor};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Flags shared by apply and destroy.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Skip the confirmation prompt for destructive changes
    #[arg(long, default_value_t = false)]
    pub auto_approve: bool,

    /// Operations run in parallel within a stage
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Cancel the run after this long, e.g. `30m`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub run: RunArgs,

    /// Simulate instead of executing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value = "quick")]
    pub dry_run_mode: DryRunMode,

    /// Never delete resources the manifests do not declare
    #[arg(long, default_value_t = false)]
    pub preserve_existing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn apply(ctx: &Context, args: &ApplyArgs) -> anyhow::Result<ExitCode> {
    let cancel = CancelToken::new();
    let signals = cancel.cancel_on_signal();
    let options = PlanOptions {
        preserve_existing: args.preserve_existing,
        ..Default::default()
    };
    let outcome = async {
        let prepared = prepare(ctx, &args.manifests, &args.target, options, &cancel).await?;
        print!("{}", render_plan(&prepared.plan));
        if args.dry_run {
            let report = simulate(&prepared.plan, args.dry_run_mode, &prepared.discoverer).await;
            output::simulation(&report);
            return Ok(ExitCode::Success);
        }
        execute(ctx, prepared, &args.run, cancel.clone()).await
    }
    .await;
    signals.abort();
    outcome
}

pub async fn destroy(ctx: &Context, args: &DestroyArgs) -> anyhow::Result<ExitCode> {
    let cancel = CancelToken::new();
    let signals = cancel.cancel_on_signal();
    let outcome = async {
        let prepared =
            prepare(ctx, &args.manifests, &args.target, PlanOptions::destroy(), &cancel).await?;
        print!("{}", render_plan(&prepared.plan));
        execute(ctx, prepared, &args.run, cancel.clone()).await
    }
    .await;
    signals.abort();
    outcome
}

async fn execute(
    ctx: &Context,
    prepared: Prepared,
    run: &RunArgs,
    cancel: CancelToken,
) -> anyhow::Result<ExitCode> {
    let Prepared {
        backend,
        project_id,
        plan,
        ..
    } = prepared;
    if !plan.has_changes() {
        return Ok(ExitCode::Success);
    }

    let destructive = plan.destructive().len();
    if destructive > 0 && !run.auto_approve {
        let prompt = format!(
            "{destructive} operation(s) will delete or replace resources. Type 'yes' to continue: "
        );
        if !confirm(&prompt)? {
            return Err(Exit::cancelled("apply declined").into());
        }
    }

    let mut config = ctx.config.execution.clone();
    if let Some(n) = run.concurrency {
        config.max_concurrent_operations = usize::from(n);
    }
    let executor = Executor::new(backend.services.clone(), project_id)
        .with_config(config)
        .with_temp_users(ctx.config.temp_users.clone())
        .with_progress(Arc::new(ConsoleProgress))
        .with_cancel(cancel)
        .with_run_timeout(run.timeout);

    let result = executor.execute(&plan).await;
    // Whatever ran is real; persist it even when the run failed.
    backend.save()?;
    let result = result?;
    output::execution(&result);
    info!(run_id = %result.run_id, status = ?result.status, "run complete");
    Ok(exit_code(&result))
}

fn exit_code(result: &ExecutionResult) -> ExitCode {
    match result.status {
        RunStatus::Succeeded => ExitCode::Success,
        RunStatus::Cancelled => ExitCode::Cancelled,
        RunStatus::Failed
            if result
                .cancel_reason
                .as_deref()
                .is_some_and(|r| r.starts_with("authentication failed")) =>
        {
            ExitCode::Config
        }
        RunStatus::Failed => ExitCode::Failure,
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Err(Exit::cancelled(
            "destructive changes need --auto-approve when stdin is not a terminal",
        )
        .into());
    }
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
