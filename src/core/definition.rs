//! Release definitions and loading.
//!
//! A release is described in YAML (`release.yaml` by default): the package,
//! where its version comes from, how to test and build it, and the two
//! registries it is published to.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::builder::check_output_dir;
use crate::adapters::{
    CommandArtifactBuilder, CommandRegistryClient, CommandSpec, CommandVerificationRunner,
    CredentialEnv, EnvCredentialSource, GitTagService,
};
use crate::domain::{RegistryTarget, DEFAULT_TAG_PREFIX};

use super::pipeline::{Collaborators, TagConflictPolicy};

/// A complete release definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseDefinition {
    /// Package name as published on the registries
    pub package: String,

    /// Where the version string comes from
    #[serde(default)]
    pub version: VersionSource,

    /// Tagging options
    #[serde(default)]
    pub tag: TagSettings,

    /// Local test suite
    pub test: CommandSpec,

    /// Artifact build
    pub build: BuildSettings,

    /// Test suite against the package installed from staging
    pub verify: CommandSpec,

    /// Staging and production registries
    pub registries: Registries,
}

/// Source of the release version
///
/// Supports two YAML forms:
/// - Manifest: `version: { manifest: pyproject.toml, key: project.version }`
/// - Literal: `version: { literal: 1.2.0 }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionSource {
    /// Read a dotted key from a TOML manifest
    Manifest { manifest: PathBuf, key: String },

    /// Fixed version string
    Literal { literal: String },
}

impl Default for VersionSource {
    fn default() -> Self {
        Self::Manifest {
            manifest: PathBuf::from("pyproject.toml"),
            key: "project.version".to_string(),
        }
    }
}

impl VersionSource {
    /// Resolve the declared version relative to `source_dir`
    pub fn resolve(&self, source_dir: &Path) -> Result<String> {
        match self {
            VersionSource::Literal { literal } => Ok(literal.clone()),
            VersionSource::Manifest { manifest, key } => {
                let manifest_path = source_dir.join(manifest);
                let content = std::fs::read_to_string(&manifest_path)
                    .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
                version_from_toml(&content, key)
                    .with_context(|| format!("Failed to read '{}' from {}", key, manifest_path.display()))
            }
        }
    }
}

/// Look up a dotted key (e.g. `project.version`) in TOML content
pub fn version_from_toml(content: &str, key: &str) -> Result<String> {
    let document: toml::Value = toml::from_str(content).context("Failed to parse TOML")?;

    let mut node = &document;
    for part in key.split('.') {
        node = node
            .get(part)
            .with_context(|| format!("Key '{}' not found", key))?;
    }

    node.as_str()
        .map(str::to_string)
        .with_context(|| format!("Key '{}' is not a string", key))
}

/// Tagging options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSettings {
    /// Prepended to the version to form the tag name
    #[serde(default = "default_tag_prefix")]
    pub prefix: String,

    /// Remote the tag is pushed to (None = local only)
    #[serde(default = "default_remote")]
    pub remote: Option<String>,

    /// Handling of a pre-existing tag
    #[serde(default)]
    pub on_existing: TagConflictPolicy,

    /// Limit for each git invocation
    #[serde(default = "default_git_timeout")]
    pub timeout_seconds: u64,
}

fn default_tag_prefix() -> String {
    DEFAULT_TAG_PREFIX.to_string()
}
fn default_remote() -> Option<String> {
    Some("origin".to_string())
}
fn default_git_timeout() -> u64 {
    120
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            prefix: default_tag_prefix(),
            remote: default_remote(),
            on_existing: TagConflictPolicy::default(),
            timeout_seconds: default_git_timeout(),
        }
    }
}

/// Build command plus where it leaves its output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(flatten)]
    pub command: CommandSpec,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_artifact_pattern")]
    pub pattern: String,

    /// Remove `output_dir` before building
    #[serde(default = "default_clean")]
    pub clean: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}
fn default_artifact_pattern() -> String {
    "*".to_string()
}
fn default_clean() -> bool {
    true
}

/// The two registries of a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registries {
    pub staging: RegistrySettings,
    pub production: RegistrySettings,
}

/// One registry endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Install endpoint (index URL)
    pub endpoint: String,

    /// Upload command; `{artifacts}` expands to the artifact paths
    pub upload: CommandSpec,

    /// Metadata URL template used to check whether a version exists
    #[serde(default)]
    pub metadata_url: Option<String>,

    /// Where the credential lives
    pub credential: CredentialEnv,

    /// Env vars the upload command reads the credential from
    #[serde(default = "default_identity_var")]
    pub identity_var: String,

    #[serde(default = "default_secret_var")]
    pub secret_var: String,
}

fn default_identity_var() -> String {
    "TWINE_USERNAME".to_string()
}
fn default_secret_var() -> String {
    "TWINE_PASSWORD".to_string()
}

impl RegistrySettings {
    fn client(&self, target: RegistryTarget) -> CommandRegistryClient {
        CommandRegistryClient::new(target, self.endpoint.clone(), self.upload.clone())
            .with_metadata_url(self.metadata_url.clone())
            .with_credential_vars(self.identity_var.clone(), self.secret_var.clone())
    }
}

impl ReleaseDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read release definition: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse release definition YAML")
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.package.trim().is_empty() {
            anyhow::bail!("Package name cannot be empty");
        }

        for (name, command) in [
            ("test", &self.test),
            ("build", &self.build.command),
            ("verify", &self.verify),
            ("registries.staging.upload", &self.registries.staging.upload),
            ("registries.production.upload", &self.registries.production.upload),
        ] {
            if command.run.is_empty() {
                anyhow::bail!("Command '{}' is empty", name);
            }
            if command.timeout_seconds == 0 {
                anyhow::bail!("Command '{}' has a zero timeout", name);
            }
        }

        check_output_dir(&self.build.output_dir).map_err(|e| anyhow::anyhow!("build.{}", e))?;

        let staging = &self.registries.staging;
        let production = &self.registries.production;

        if production.metadata_url.as_deref().map_or(true, |url| url.trim().is_empty()) {
            anyhow::bail!("registries.production.metadata_url is required");
        }

        if staging.endpoint == production.endpoint {
            anyhow::bail!(
                "Staging and production registries share the endpoint {}",
                staging.endpoint
            );
        }

        if staging.credential.secret_env == production.credential.secret_env {
            anyhow::bail!(
                "Staging and production credentials read the same variable {}",
                staging.credential.secret_env
            );
        }

        if self.tag.timeout_seconds == 0 {
            anyhow::bail!("Tag timeout cannot be zero");
        }

        if self.tag.prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("Tag prefix cannot contain whitespace");
        }

        Ok(())
    }

    /// Wire up the command-backed collaborators for `source_dir`
    pub fn collaborators(&self, source_dir: &Path) -> Collaborators {
        let verifier = CommandVerificationRunner::new(source_dir, self.test.clone(), self.verify.clone());
        let builder = CommandArtifactBuilder::new(
            self.build.command.clone(),
            self.build.output_dir.clone(),
            self.build.pattern.clone(),
        )
        .with_clean(self.build.clean);
        let credentials = EnvCredentialSource::new(
            self.registries.staging.credential.clone(),
            self.registries.production.credential.clone(),
        );

        Collaborators {
            verifier: Arc::new(verifier),
            builder: Arc::new(builder),
            staging: Arc::new(self.registries.staging.client(RegistryTarget::Staging)),
            production: Arc::new(self.registries.production.client(RegistryTarget::Production)),
            tags: Arc::new(
                GitTagService::new(source_dir, self.tag.remote.clone())
                    .with_timeout(Duration::from_secs(self.tag.timeout_seconds)),
            ),
            credentials: Arc::new(credentials),
        }
    }
}
