//! In-memory collaborators for pipeline integration tests.
//!
//! Every fake appends a short label to a shared call log so tests can
//! assert on exactly which external operations a run performed.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use relgate::adapters::{
    ArtifactBuilder, CollaboratorError, CredentialSource, RegistryClient, StaticCredentialSource,
    TagError, TagService, VerificationRunner, VerificationTarget,
};
use relgate::core::{CancellationToken, Collaborators, ReleasePipeline};
use relgate::domain::{Artifact, ArtifactSet, Credential, RegistryTarget, ReleaseRequest, Stage};

pub const PACKAGE: &str = "example-pkg";
pub const VERSION: &str = "1.2.0";
pub const TAG: &str = "v1.2.0";
pub const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";
pub const OTHER_COMMIT: &str = "fedcba9876543210fedcba9876543210fedcba98";
pub const STAGING_ENDPOINT: &str = "https://staging.example/simple/";
pub const PRODUCTION_ENDPOINT: &str = "https://registry.example/simple/";

pub type CallLog = Arc<Mutex<Vec<String>>>;

fn push(log: &CallLog, call: impl Into<String>) {
    log.lock().unwrap().push(call.into());
}

// ============================================================================
// Fakes
// ============================================================================

pub struct FakeVerifier {
    log: CallLog,
    pub fail_local: AtomicBool,
    pub fail_installed: AtomicBool,
    cancel_on_installed: Mutex<Option<CancellationToken>>,
}

impl FakeVerifier {
    /// Cancel `token` while the staging verification is running
    pub fn cancel_during_verify(&self, token: CancellationToken) {
        *self.cancel_on_installed.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl VerificationRunner for FakeVerifier {
    async fn run(&self, target: &VerificationTarget) -> Result<(), CollaboratorError> {
        match target {
            VerificationTarget::LocalSource { .. } => {
                push(&self.log, "test");
                if self.fail_local.load(Ordering::SeqCst) {
                    return Err(CollaboratorError::failed("3 tests failed"));
                }
            }
            VerificationTarget::InstalledPackage {
                name,
                version,
                registry_endpoint,
            } => {
                push(&self.log, format!("verify:{}=={}@{}", name, version, registry_endpoint));
                if let Some(token) = self.cancel_on_installed.lock().unwrap().as_ref() {
                    token.cancel("interrupted");
                }
                if self.fail_installed.load(Ordering::SeqCst) {
                    return Err(CollaboratorError::failed("import error in installed package"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Ok,
    Fail,
    Empty,
    Duplicate,
    Panic,
}

pub struct FakeBuilder {
    log: CallLog,
    mode: Mutex<BuildMode>,
    block_manifest_in: Mutex<Option<PathBuf>>,
}

impl FakeBuilder {
    pub fn set_mode(&self, mode: BuildMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// While building, put a directory where each run under `runs` would
    /// write its `artifacts.json`, so the manifest cannot be written
    pub fn block_manifest_in(&self, runs: &Path) {
        *self.block_manifest_in.lock().unwrap() = Some(runs.to_path_buf());
    }
}

pub fn built_artifacts() -> Vec<Artifact> {
    vec![
        Artifact::new("example_pkg-1.2.0.tar.gz", b"sdist bytes".to_vec()),
        Artifact::new("example_pkg-1.2.0-py3-none-any.whl", b"wheel bytes".to_vec()),
    ]
}

#[async_trait]
impl ArtifactBuilder for FakeBuilder {
    async fn build(&self, _source: &Path) -> Result<Vec<Artifact>, CollaboratorError> {
        push(&self.log, "build");
        if let Some(runs) = self.block_manifest_in.lock().unwrap().as_ref() {
            for entry in std::fs::read_dir(runs).unwrap() {
                let dir = entry.unwrap().path();
                if dir.is_dir() {
                    std::fs::create_dir_all(dir.join("artifacts.json")).unwrap();
                }
            }
        }
        let mode = *self.mode.lock().unwrap();
        match mode {
            BuildMode::Ok => Ok(built_artifacts()),
            BuildMode::Fail => Err(CollaboratorError::failed("compiler error")),
            BuildMode::Empty => Ok(Vec::new()),
            BuildMode::Duplicate => Ok(vec![
                Artifact::new("same.whl", b"a".to_vec()),
                Artifact::new("same.whl", b"b".to_vec()),
            ]),
            BuildMode::Panic => panic!("builder crashed"),
        }
    }
}

pub struct FakeRegistry {
    target: RegistryTarget,
    endpoint: String,
    log: CallLog,
    pub fail_upload: AtomicBool,
    pub fail_query: AtomicBool,
    published: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeRegistry {
    fn new(target: RegistryTarget, endpoint: &str, log: CallLog) -> Self {
        Self {
            target,
            endpoint: endpoint.to_string(),
            log,
            fail_upload: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            published: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Mark the version as already published
    pub fn publish(&self, version: &str) {
        self.published.lock().unwrap().insert(version.to_string());
    }

    /// Successful uploads as (identity, filenames)
    pub fn uploads(&self) -> Vec<(String, Vec<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
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
        push(&self.log, format!("upload:{}", self.target));
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("HTTP 503 from registry"));
        }
        let filenames = artifacts.filenames().iter().map(|f| f.to_string()).collect();
        self.uploads
            .lock()
            .unwrap()
            .push((credential.identity().to_string(), filenames));
        self.publish(VERSION);
        Ok(())
    }

    async fn contains(&self, _name: &str, version: &str) -> Result<bool, CollaboratorError> {
        push(&self.log, format!("contains:{}", self.target));
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("registry unreachable"));
        }
        Ok(self.published.lock().unwrap().contains(version))
    }
}

#[derive(Default)]
pub struct FakeTags {
    log: CallLog,
    pub fail_create: AtomicBool,
    tags: Mutex<HashMap<String, String>>,
}

impl FakeTags {
    pub fn insert(&self, tag: &str, commit: &str) {
        self.tags
            .lock()
            .unwrap()
            .insert(tag.to_string(), commit.to_string());
    }

    pub fn get(&self, tag: &str) -> Option<String> {
        self.tags.lock().unwrap().get(tag).cloned()
    }

    pub fn count(&self) -> usize {
        self.tags.lock().unwrap().len()
    }
}

#[async_trait]
impl TagService for FakeTags {
    async fn create_tag(&self, source_ref: &str, tag_name: &str) -> Result<(), TagError> {
        push(&self.log, format!("create_tag:{}@{}", tag_name, source_ref));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("remote rejected push").into());
        }
        let mut tags = self.tags.lock().unwrap();
        if tags.contains_key(tag_name) {
            return Err(TagError::AlreadyExists {
                tag: tag_name.to_string(),
            });
        }
        tags.insert(tag_name.to_string(), source_ref.to_string());
        Ok(())
    }

    async fn resolve(&self, tag_name: &str) -> Result<Option<String>, CollaboratorError> {
        push(&self.log, format!("resolve_tag:{}", tag_name));
        Ok(self.get(tag_name))
    }
}

/// Wraps a credential source and logs each lookup
pub struct LoggingCredentials {
    log: CallLog,
    inner: Mutex<StaticCredentialSource>,
}

impl LoggingCredentials {
    pub fn replace(&self, source: StaticCredentialSource) {
        *self.inner.lock().unwrap() = source;
    }
}

#[async_trait]
impl CredentialSource for LoggingCredentials {
    async fn credential(&self, target: RegistryTarget) -> Result<Credential, CollaboratorError> {
        push(&self.log, format!("credential:{}", target));
        let source = self.inner.lock().unwrap().clone();
        source.credential(target).await
    }
}

pub fn staging_credential() -> Credential {
    Credential::new(RegistryTarget::Staging, "stager", "staging-secret")
}

pub fn production_credential() -> Credential {
    Credential::new(RegistryTarget::Production, "publisher", "production-secret")
}

pub fn default_credentials() -> StaticCredentialSource {
    StaticCredentialSource::new()
        .with(staging_credential())
        .with(production_credential())
}

// ============================================================================
// Harness
// ============================================================================

/// A full set of fakes sharing one call log and one runs directory
pub struct Harness {
    pub log: CallLog,
    pub verifier: Arc<FakeVerifier>,
    pub builder: Arc<FakeBuilder>,
    pub staging: Arc<FakeRegistry>,
    pub production: Arc<FakeRegistry>,
    pub tags: Arc<FakeTags>,
    pub credentials: Arc<LoggingCredentials>,
    pub runs: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let log: CallLog = Arc::default();
        Self {
            verifier: Arc::new(FakeVerifier {
                log: log.clone(),
                fail_local: AtomicBool::new(false),
                fail_installed: AtomicBool::new(false),
                cancel_on_installed: Mutex::new(None),
            }),
            builder: Arc::new(FakeBuilder {
                log: log.clone(),
                mode: Mutex::new(BuildMode::Ok),
                block_manifest_in: Mutex::new(None),
            }),
            staging: Arc::new(FakeRegistry::new(
                RegistryTarget::Staging,
                STAGING_ENDPOINT,
                log.clone(),
            )),
            production: Arc::new(FakeRegistry::new(
                RegistryTarget::Production,
                PRODUCTION_ENDPOINT,
                log.clone(),
            )),
            tags: Arc::new(FakeTags {
                log: log.clone(),
                ..FakeTags::default()
            }),
            credentials: Arc::new(LoggingCredentials {
                log: log.clone(),
                inner: Mutex::new(default_credentials()),
            }),
            runs: TempDir::new().unwrap(),
            log,
        }
    }

    /// Make the collaborator behind `stage` fail
    pub fn fail_at(&self, stage: Stage) {
        match stage {
            Stage::Preflight => self.production.fail_query.store(true, Ordering::SeqCst),
            Stage::Test => self.verifier.fail_local.store(true, Ordering::SeqCst),
            Stage::Build => self.builder.set_mode(BuildMode::Fail),
            Stage::PublishStaging => self.staging.fail_upload.store(true, Ordering::SeqCst),
            Stage::Verify => self.verifier.fail_installed.store(true, Ordering::SeqCst),
            Stage::Tag => self.tags.fail_create.store(true, Ordering::SeqCst),
            Stage::PublishProduction => self.production.fail_upload.store(true, Ordering::SeqCst),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            verifier: self.verifier.clone(),
            builder: self.builder.clone(),
            staging: self.staging.clone(),
            production: self.production.clone(),
            tags: self.tags.clone(),
            credentials: self.credentials.clone(),
        }
    }

    pub fn pipeline(&self) -> ReleasePipeline {
        ReleasePipeline::new(PACKAGE, "/src/example-pkg", self.collaborators())
            .unwrap()
            .with_runs_dir(self.runs.path())
    }

    /// Calls recorded so far
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Forget recorded calls (external state is kept)
    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }
}

pub fn request() -> ReleaseRequest {
    ReleaseRequest::new(COMMIT, VERSION).unwrap()
}
