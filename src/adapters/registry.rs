//! Registry client backed by an upload command and an HTTP metadata lookup.
//!
//! Uploads materialize the artifact set in a private temp directory and run
//! the configured upload tool with the credential passed through environment
//! variables only. Existence checks GET a JSON metadata URL.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tempfile::TempDir;
use tracing::{debug, info};

use super::command::{run_command, CommandSpec};
use super::{CollaboratorError, RegistryClient};
use crate::domain::{ArtifactSet, Credential, RegistryTarget};

/// Timeout for the metadata lookup
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry client using subprocess uploads
pub struct CommandRegistryClient {
    target: RegistryTarget,
    endpoint: String,
    upload: CommandSpec,

    /// URL template with `{name}` and `{version}`
    metadata_url: Option<String>,

    /// Child env var receiving the credential identity
    identity_var: String,

    /// Child env var receiving the credential secret
    secret_var: String,

    http: reqwest::Client,
}

impl CommandRegistryClient {
    pub fn new(target: RegistryTarget, endpoint: impl Into<String>, upload: CommandSpec) -> Self {
        Self {
            target,
            endpoint: endpoint.into(),
            upload,
            metadata_url: None,
            identity_var: "TWINE_USERNAME".to_string(),
            secret_var: "TWINE_PASSWORD".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_metadata_url(mut self, metadata_url: Option<String>) -> Self {
        self.metadata_url = metadata_url;
        self
    }

    pub fn with_credential_vars(
        mut self,
        identity_var: impl Into<String>,
        secret_var: impl Into<String>,
    ) -> Self {
        self.identity_var = identity_var.into();
        self.secret_var = secret_var.into();
        self
    }

    fn metadata_url_for(&self, name: &str, version: &str) -> Option<String> {
        self.metadata_url
            .as_ref()
            .map(|t| t.replace("{name}", name).replace("{version}", version))
    }

    async fn stage_files(&self, artifacts: &ArtifactSet) -> Result<(TempDir, Vec<PathBuf>), CollaboratorError> {
        let dir = TempDir::new()
            .map_err(|e| CollaboratorError::failed(format!("failed to create upload dir: {}", e)))?;

        let mut paths = Vec::with_capacity(artifacts.len());
        for artifact in artifacts.iter() {
            let path = dir.path().join(artifact.filename());
            tokio::fs::write(&path, artifact.content()).await.map_err(|e| {
                CollaboratorError::failed(format!("failed to stage {}: {}", artifact.filename(), e))
            })?;
            paths.push(path);
        }

        Ok((dir, paths))
    }
}

#[async_trait]
impl RegistryClient for CommandRegistryClient {
    fn target(&self) -> RegistryTarget {
        self.target
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn upload(
        &self,
        credential: &Credential,
        artifacts: &ArtifactSet,
    ) -> Result<(), CollaboratorError> {
        if credential.target() != self.target {
            return Err(CollaboratorError::failed(format!(
                "{} credential offered to {} registry",
                credential.target(),
                self.target
            )));
        }

        let (dir, paths) = self.stage_files(artifacts).await?;

        let vars = HashMap::from([("endpoint", self.endpoint.clone())]);
        let argv = self.upload.render(&vars, &paths);

        let mut env: Vec<(String, String)> = self
            .upload
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push((self.identity_var.clone(), credential.identity().to_string()));
        env.push((self.secret_var.clone(), credential.expose_secret().to_string()));

        let operation = format!("{} upload", self.target);
        let cwd = self.upload.resolve_dir(dir.path());
        run_command(&operation, &argv, &cwd, &env, self.upload.timeout()).await?;

        info!(registry = %self.target, files = paths.len(), "Upload accepted");
        Ok(())
    }

    async fn contains(&self, name: &str, version: &str) -> Result<bool, CollaboratorError> {
        let Some(url) = self.metadata_url_for(name, version) else {
            return Err(CollaboratorError::failed(format!(
                "no metadata_url configured for the {} registry; cannot tell whether {} {} is published",
                self.target, name, version
            )));
        };
        debug!(registry = %self.target, %url, "Checking for published version");

        let response = self
            .http
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| CollaboratorError::failed(format!("{} metadata lookup failed: {}", self.target, e)))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(CollaboratorError::failed(format!(
                "{} metadata lookup returned unexpected status {}",
                self.target, status
            ))),
        }
    }
}
