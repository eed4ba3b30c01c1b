//! Configuration, project and backend resolution shared by commands.

use crate::exit::Exit;
use anyhow::Context as _;
use clap::Args;
use matlas_core::MatlasConfig;
use matlas_runtime::{EmulatorOptions, InMemoryAtlas, Services};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a command runs: which project, against which backend.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Atlas project id
    #[arg(long = "project-id", env = "MATLAS_PROJECT_ID")]
    pub project_id: Option<String>,

    /// JSON snapshot backing the sandbox Atlas backend
    #[arg(long = "state-file", env = "MATLAS_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

/// Loaded configuration plus flag overrides.
pub struct Context {
    pub config: MatlasConfig,
}

impl Context {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = MatlasConfig::load(path).context("loading configuration")?;
        Ok(Self { config })
    }

    #[cfg(test)]
    pub fn with_config(config: MatlasConfig) -> Self {
        Self { config }
    }

    /// Flag or environment first, then the config file.
    pub fn project_id(&self, target: &TargetArgs) -> Result<String, Exit> {
        target
            .project_id
            .clone()
            .or_else(|| self.config.project_id.clone())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Exit::config("no project id; pass --project-id, set MATLAS_PROJECT_ID or projectId in the config")
            })
    }

    pub fn backend(&self, target: &TargetArgs) -> anyhow::Result<Backend> {
        let path = target
            .state_file
            .clone()
            .or_else(|| self.config.backend.state_file.clone())
            .ok_or_else(|| {
                Exit::config(
                    "no Atlas backend configured; pass --state-file, set MATLAS_STATE_FILE or backend.stateFile",
                )
            })?;
        Backend::open(path)
    }
}

/// The sandbox backend: an in-memory Atlas persisted to a JSON file.
pub struct Backend {
    atlas: Arc<InMemoryAtlas>,
    path: PathBuf,
    pub services: Services,
}

impl Backend {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        // Provisioning completes on creation in the sandbox.
        let options = EmulatorOptions {
            provisioning_polls: 0,
            ..Default::default()
        };
        let atlas = Arc::new(InMemoryAtlas::open(&path, options)?);
        debug!(path = %path.display(), "opened sandbox backend");
        let services = Services::from_backend(atlas.clone());
        Ok(Self {
            atlas,
            path,
            services,
        })
    }

    /// Persist the sandbox after a run that may have written.
    pub fn save(&self) -> anyhow::Result<()> {
        if self.atlas.writes() == 0 {
            return Ok(());
        }
        self.atlas.save(&self.path)?;
        info!(path = %self.path.display(), writes = self.atlas.writes(), "saved sandbox state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{classify, ExitCode};

    #[test]
    fn test_project_id_precedence() {
        let ctx = Context::with_config(MatlasConfig {
            project_id: Some("from-config".into()),
            ..Default::default()
        });
        let mut target = TargetArgs::default();
        assert_eq!(ctx.project_id(&target).unwrap(), "from-config");

        target.project_id = Some("from-flag".into());
        assert_eq!(ctx.project_id(&target).unwrap(), "from-flag");
    }

    #[test]
    fn test_missing_project_id_is_config_error() {
        let ctx = Context::with_config(MatlasConfig::default());
        let target = TargetArgs {
            project_id: Some("  ".into()),
            ..Default::default()
        };
        let err = ctx.project_id(&target).unwrap_err();
        assert_eq!(err.code, ExitCode::Config);
    }

    #[test]
    fn test_missing_backend_exits_with_config_code() {
        let ctx = Context::with_config(MatlasConfig::default());
        let err = ctx.backend(&TargetArgs::default()).err().unwrap();
        assert_eq!(classify(&err), ExitCode::Config);
    }

    #[test]
    fn test_backend_from_config_file_setting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MatlasConfig::default();
        config.backend.state_file = Some(dir.path().join("atlas.json"));
        let ctx = Context::with_config(config);

        let backend = ctx.backend(&TargetArgs::default()).unwrap();
        // Nothing written, nothing saved.
        backend.save().unwrap();
        assert!(!dir.path().join("atlas.json").exists());
    }
}
