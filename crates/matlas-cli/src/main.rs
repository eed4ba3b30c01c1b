//! matlas: declarative apply for MongoDB Atlas projects.

mod commands;
mod context;
mod exit;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use commands::apply::{ApplyArgs, DestroyArgs};
use commands::cleanup::CleanupArgs;
use commands::discover::{DiscoverArgs, ShowArgs};
use commands::plan::PlanArgs;
use commands::ManifestArgs;
use context::Context;
use exit::ExitCode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "MATLAS_LOG";

#[derive(Parser, Debug)]
#[command(name = "matlas", version, about = "Declarative apply for MongoDB Atlas")]
struct Cli {
    /// Configuration file (default: $MATLAS_CONFIG or ~/.config/matlas/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check manifests against the schemas and each other
    Validate(ManifestArgs),

    /// Show the staged plan that converges the project to the manifests
    Plan(PlanArgs),

    /// Show field-level differences between the manifests and the project
    Diff(PlanArgs),

    /// Converge the project to the manifests
    Apply(ApplyArgs),

    /// Delete every resource the manifests declare
    Destroy(DestroyArgs),

    /// Snapshot the project's current resources
    Discover(DiscoverArgs),

    /// Summarize the project's resources and open alerts
    Show(ShowArgs),

    /// Delete expired temporary database users
    CleanupTempUsers(CleanupArgs),
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let load = || Context::load(cli.config.as_deref());
    match &cli.cmd {
        Command::Validate(manifests) => commands::validate::run(manifests),
        Command::Plan(args) => commands::plan::plan(&load()?, args).await,
        Command::Diff(args) => commands::plan::diff(&load()?, args).await,
        Command::Apply(args) => commands::apply::apply(&load()?, args).await,
        Command::Destroy(args) => commands::apply::destroy(&load()?, args).await,
        Command::Discover(args) => commands::discover::discover(&load()?, args).await,
        Command::Show(args) => commands::discover::show(&load()?, args).await,
        Command::CleanupTempUsers(args) => commands::cleanup::run(&load()?, args).await,
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => code.into(),
        Err(err) => {
            output::error(&err);
            exit::classify(&err).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags_parse() {
        let cli = Cli::try_parse_from([
            "matlas",
            "apply",
            "-f",
            "a.yaml",
            "b/*.yaml",
            "--project-id",
            "p1",
            "--dry-run",
            "--dry-run-mode",
            "thorough",
            "--concurrency",
            "3",
            "--timeout",
            "10m",
        ])
        .unwrap();
        let Command::Apply(args) = cli.cmd else {
            panic!("expected apply");
        };
        assert_eq!(args.manifests.files, vec!["a.yaml", "b/*.yaml"]);
        assert!(args.dry_run);
        assert_eq!(args.dry_run_mode, matlas_runtime::DryRunMode::Thorough);
        assert_eq!(args.run.concurrency, Some(3));
        assert_eq!(
            args.run.timeout,
            Some(std::time::Duration::from_secs(600))
        );
    }

    #[test]
    fn test_discover_include_accepts_plural_kinds() {
        let cli = Cli::try_parse_from([
            "matlas",
            "discover",
            "--project-id",
            "p1",
            "--include",
            "clusters,users",
            "--convert-to-apply",
        ])
        .unwrap();
        let Command::Discover(args) = cli.cmd else {
            panic!("expected discover");
        };
        assert_eq!(
            args.include,
            vec![
                matlas_core::ResourceKind::Cluster,
                matlas_core::ResourceKind::DatabaseUser
            ]
        );
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let parsed = Cli::try_parse_from([
            "matlas", "apply", "-f", "a.yaml", "--concurrency", "0",
        ]);
        assert!(parsed.is_err());
    }
}
