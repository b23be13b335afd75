//! Credential sources.
//!
//! Secrets are read at the moment a publish stage asks for them, never
//! cached by the pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CollaboratorError, CredentialSource};
use crate::domain::{Credential, RegistryTarget};

/// Where to find one registry's credential in the process environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEnv {
    /// Literal identity (e.g. `__token__` for token auth)
    #[serde(default)]
    pub identity: Option<String>,

    /// Env var holding the identity; takes precedence over `identity`
    #[serde(default)]
    pub identity_env: Option<String>,

    /// Env var holding the secret
    pub secret_env: String,
}

impl CredentialEnv {
    fn load(&self, target: RegistryTarget) -> Result<Credential, CollaboratorError> {
        let identity = match (&self.identity_env, &self.identity) {
            (Some(var), _) => read_var(var, target)?,
            (None, Some(literal)) => literal.clone(),
            (None, None) => "__token__".to_string(),
        };
        let secret = read_var(&self.secret_env, target)?;
        Ok(Credential::new(target, identity, secret))
    }
}

fn read_var(var: &str, target: RegistryTarget) -> Result<String, CollaboratorError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(CollaboratorError::failed(format!(
            "{} credential variable {} is not set",
            target, var
        ))),
    }
}

/// Reads credentials from environment variables named in the definition
#[derive(Debug, Clone)]
pub struct EnvCredentialSource {
    staging: CredentialEnv,
    production: CredentialEnv,
}

impl EnvCredentialSource {
    pub fn new(staging: CredentialEnv, production: CredentialEnv) -> Self {
        Self {
            staging,
            production,
        }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn credential(&self, target: RegistryTarget) -> Result<Credential, CollaboratorError> {
        match target {
            RegistryTarget::Staging => self.staging.load(target),
            RegistryTarget::Production => self.production.load(target),
        }
    }
}

/// Fixed credentials, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    credentials: HashMap<RegistryTarget, Credential>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential under its own target
    pub fn with(mut self, credential: Credential) -> Self {
        self.credentials.insert(credential.target(), credential);
        self
    }

    /// Register a credential under an arbitrary target (may mismatch)
    pub fn with_for(mut self, target: RegistryTarget, credential: Credential) -> Self {
        self.credentials.insert(target, credential);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn credential(&self, target: RegistryTarget) -> Result<Credential, CollaboratorError> {
        self.credentials
            .get(&target)
            .cloned()
            .ok_or_else(|| CollaboratorError::failed(format!("no {} credential configured", target)))
    }
}
