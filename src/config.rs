//! Configuration for relgate paths.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable (RELGATE_HOME)
//! 2. Config file (.relgate/config.yaml)
//! 3. Defaults (~/.relgate)
//!
//! Config file discovery:
//! - Searches current directory and parents for .relgate/config.yaml
//! - `paths.home` is relative to the .relgate/ directory
//! - `definition` is relative to the project root (parent of .relgate/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Release definition looked up when `--file` is not given
pub const DEFAULT_DEFINITION: &str = "release.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Default release definition
    #[serde(default)]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Run state directory (relative to .relgate/)
    pub home: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to relgate home (run logs)
    pub home: PathBuf,
    /// Release definition used when none is given
    pub definition: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".relgate").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Resolve configuration starting the file search at `start`
fn load_config_from(start: &Path, env_home: Option<PathBuf>) -> Result<ResolvedConfig> {
    let config_file = find_config_file(start);

    let (home, definition) = match config_file {
        Some(ref config_path) => {
            let config = load_config_file(config_path)?;
            let relgate_dir = config_path.parent().unwrap_or(Path::new("."));
            let project_root = relgate_dir.parent().unwrap_or(Path::new("."));

            let home = match (env_home, config.paths.home.as_deref()) {
                (Some(home), _) => home,
                (None, Some(home)) => resolve_path(relgate_dir, home),
                (None, None) => default_home()?,
            };
            let definition = resolve_path(
                project_root,
                config.definition.as_deref().unwrap_or(DEFAULT_DEFINITION),
            );
            (home, definition)
        }
        None => {
            let home = match env_home {
                Some(home) => home,
                None => default_home()?,
            };
            (home, start.join(DEFAULT_DEFINITION))
        }
    };

    Ok(ResolvedConfig {
        home,
        definition,
        config_file,
    })
}

fn default_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".relgate"))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let env_home = std::env::var_os("RELGATE_HOME").map(PathBuf::from);
    load_config_from(&cwd, env_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the runs directory ($RELGATE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}
