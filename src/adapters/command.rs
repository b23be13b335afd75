//! Subprocess execution for command-backed collaborators.
//!
//! Every command runs under a timeout; a timed-out child is killed when its
//! handle is dropped. Environment values are passed to the child but never
//! logged.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::CollaboratorError;

/// Placeholder that expands to one argument per artifact path
pub const ARTIFACTS_PLACEHOLDER: &str = "{artifacts}";

/// Lines of stderr kept in failure diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// A command line from the release definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program followed by its arguments
    pub run: Vec<String>,

    /// Extra environment for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory (defaults to the source directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Per-invocation timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    1800
} // 30 min

impl CommandSpec {
    pub fn new<I, S>(run: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run: run.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout_seconds: default_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Substitute `{key}` placeholders; `{artifacts}` as a whole argument
    /// expands to `artifact_paths`
    pub fn render(&self, vars: &HashMap<&str, String>, artifact_paths: &[PathBuf]) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.run.len() + artifact_paths.len());

        for arg in &self.run {
            if arg == ARTIFACTS_PLACEHOLDER {
                argv.extend(artifact_paths.iter().map(|p| p.display().to_string()));
                continue;
            }

            let mut rendered = arg.clone();
            for (key, value) in vars {
                rendered = rendered.replace(&format!("{{{}}}", key), value);
            }
            argv.push(rendered);
        }

        argv
    }

    /// Resolve the working directory against a base directory
    pub fn resolve_dir(&self, base: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        }
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` to completion under `limit`.
///
/// `operation` names the call in diagnostics. Non-zero exit maps to
/// `CollaboratorError::Failed` carrying the tail of stderr.
pub async fn run_command(
    operation: &str,
    argv: &[String],
    cwd: &Path,
    env: &[(String, String)],
    limit: Duration,
) -> Result<CommandOutput, CollaboratorError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CollaboratorError::failed(format!("{}: empty command", operation)))?;

    debug!(%operation, %program, cwd = %cwd.display(), "Spawning command");

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let child = command.spawn().map_err(|e| {
        CollaboratorError::failed(format!("{}: failed to spawn '{}': {}", operation, program, e))
    })?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| CollaboratorError::TimedOut {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        })?
        .map_err(|e| CollaboratorError::failed(format!("{}: failed to wait: {}", operation, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(CollaboratorError::failed(format!(
            "{} failed with exit code {}: {}",
            operation,
            exit_code,
            stderr_tail(&stderr)
        )));
    }

    Ok(CommandOutput { stdout, stderr })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
