//! `matlas cleanup-temp-users`: delete expired temporary database users.

use crate::context::{Context, TargetArgs};
use crate::exit::ExitCode;
use chrono::Utc;
use clap::Args;
use matlas_runtime::TempUserManager;

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub async fn run(ctx: &Context, args: &CleanupArgs) -> anyhow::Result<ExitCode> {
    let project_id = ctx.project_id(&args.target)?;
    let backend = ctx.backend(&args.target)?;
    let manager = TempUserManager::new(
        backend.services.clone(),
        project_id.clone(),
        ctx.config.temp_users.clone(),
    )
    .with_execution(ctx.config.execution.clone());

    let outcome = manager.cleanup_expired(Utc::now()).await;
    backend.save()?;
    let report = outcome?;

    for username in &report.deleted {
        println!("  ✔ deleted {username}");
    }
    for username in &report.kept {
        println!("  · kept {username} (not yet expired)");
    }
    println!(
        "✔ Scanned {} temporary user(s) in {project_id}: {} deleted, {} kept.",
        report.scanned,
        report.deleted.len(),
        report.kept.len()
    );
    Ok(ExitCode::Success)
}
