//! Test-suite runner backed by shell commands.
//!
//! The local command runs against the checkout. The installed command is
//! expected to install `{name}=={version}` from `{endpoint}` and run the
//! suite against that copy.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::command::{run_command, CommandSpec};
use super::{CollaboratorError, VerificationRunner, VerificationTarget};

/// Verification runner using subprocess mode
pub struct CommandVerificationRunner {
    source_dir: PathBuf,
    local: CommandSpec,
    installed: CommandSpec,
}

impl CommandVerificationRunner {
    pub fn new(source_dir: impl Into<PathBuf>, local: CommandSpec, installed: CommandSpec) -> Self {
        Self {
            source_dir: source_dir.into(),
            local,
            installed,
        }
    }

    fn plan(&self, target: &VerificationTarget) -> (&'static str, &CommandSpec, Vec<String>) {
        match target {
            VerificationTarget::LocalSource { .. } => {
                ("local test suite", &self.local, self.local.render(&HashMap::new(), &[]))
            }
            VerificationTarget::InstalledPackage {
                name,
                version,
                registry_endpoint,
            } => {
                let vars = HashMap::from([
                    ("name", name.clone()),
                    ("version", version.clone()),
                    ("endpoint", registry_endpoint.clone()),
                ]);
                (
                    "installed package verification",
                    &self.installed,
                    self.installed.render(&vars, &[]),
                )
            }
        }
    }
}

#[async_trait]
impl VerificationRunner for CommandVerificationRunner {
    async fn run(&self, target: &VerificationTarget) -> Result<(), CollaboratorError> {
        let (operation, spec, argv) = self.plan(target);
        let base = match target {
            VerificationTarget::LocalSource { path } => path.as_path(),
            VerificationTarget::InstalledPackage { .. } => self.source_dir.as_path(),
        };
        let cwd = spec.resolve_dir(base);
        let env: Vec<(String, String)> = spec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        run_command(operation, &argv, &cwd, &env, spec.timeout()).await?;
        info!(%operation, "Test suite passed");
        Ok(())
    }
}
