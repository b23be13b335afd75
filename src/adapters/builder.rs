//! Artifact builder backed by a build command.
//!
//! Runs the configured build in the source tree, then collects the files it
//! left in the output directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::command::{run_command, CommandSpec};
use super::{ArtifactBuilder, CollaboratorError};
use crate::domain::Artifact;

/// Check that `output_dir` names a subdirectory strictly inside the source tree.
///
/// The builder deletes this directory before each build, so anything that
/// could resolve to the tree itself or escape it ("", ".", "..", absolute
/// paths, `a/../b`) is refused.
pub fn check_output_dir(output_dir: &Path) -> Result<(), String> {
    let mut normal = 0;
    for component in output_dir.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "output_dir '{}' must be a relative path inside the source tree",
                    output_dir.display()
                ))
            }
        }
    }
    if normal == 0 {
        return Err(format!(
            "output_dir '{}' must name a subdirectory of the source tree",
            output_dir.display()
        ));
    }
    Ok(())
}

/// Build via subprocess, collect from `output_dir`
pub struct CommandArtifactBuilder {
    command: CommandSpec,

    /// Output directory, relative to the source tree
    output_dir: PathBuf,

    /// Glob (relative to `output_dir`) selecting artifacts
    pattern: String,

    /// Remove stale output before building
    clean: bool,
}

impl CommandArtifactBuilder {
    pub fn new(command: CommandSpec, output_dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            pattern: pattern.into(),
            clean: true,
        }
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    async fn collect(&self, output_dir: &Path) -> Result<Vec<Artifact>, CollaboratorError> {
        let pattern = output_dir.join(&self.pattern);
        let pattern = pattern.to_string_lossy();

        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CollaboratorError::failed(format!("invalid artifact pattern '{}': {}", pattern, e)))?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut artifacts = Vec::with_capacity(paths.len());
        for path in paths {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = fs::read(&path).await.map_err(|e| {
                CollaboratorError::failed(format!("failed to read artifact {}: {}", path.display(), e))
            })?;
            debug!(%filename, bytes = content.len(), "Collected artifact");
            artifacts.push(Artifact::new(filename, content));
        }

        Ok(artifacts)
    }
}

#[async_trait]
impl ArtifactBuilder for CommandArtifactBuilder {
    async fn build(&self, source: &Path) -> Result<Vec<Artifact>, CollaboratorError> {
        check_output_dir(&self.output_dir).map_err(CollaboratorError::failed)?;
        let output_dir = source.join(&self.output_dir);

        if self.clean {
            match fs::remove_dir_all(&output_dir).await {
                Ok(()) => debug!(dir = %output_dir.display(), "Removed stale build output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CollaboratorError::failed(format!(
                        "failed to clean {}: {}",
                        output_dir.display(),
                        e
                    )))
                }
            }
        }

        let argv = self.command.render(&Default::default(), &[]);
        let cwd = self.command.resolve_dir(source);
        let env: Vec<(String, String)> = self
            .command
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        run_command("build", &argv, &cwd, &env, self.command.timeout()).await?;

        let artifacts = self.collect(&output_dir).await?;
        info!(count = artifacts.len(), "Build finished");
        Ok(artifacts)
    }
}
