//! The release state machine.
//!
//! A run walks a fixed sequence of gates:
//!
//! ```text
//! Preflight → Test → Build → PublishStaging → Verify → Tag → PublishProduction
//! ```
//!
//! Each state's entry action either returns the next state, carrying the
//! values later stages need (the artifact set, the tag), or a
//! `StageFailure` that ends the run. Nothing is retried or rolled back
//! inside a run; a retry is a fresh run, and the tag stage accepts an
//! existing tag on the same commit so a retry can finish a release whose
//! production upload failed.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    ArtifactBuilder, CollaboratorError, CredentialSource, RegistryClient, TagError, TagService,
    VerificationRunner, VerificationTarget,
};
use crate::domain::{
    ArtifactSet, Credential, Event, EventType, RegistryTarget, ReleaseRequest, ReleaseTag,
    RunHeader, RunResult, Stage, StageOutcome, StageStatus,
};

use super::cancellation::CancellationToken;
use super::event_store::EventStore;
use super::failure::StageFailure;

/// What to do when the tag for the version already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagConflictPolicy {
    /// Accept an existing tag on the same commit and continue to production
    #[default]
    Resume,

    /// Abort on any existing tag
    Fail,
}

/// The external systems a run drives
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: Arc<dyn VerificationRunner>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub staging: Arc<dyn RegistryClient>,
    pub production: Arc<dyn RegistryClient>,
    pub tags: Arc<dyn TagService>,
    pub credentials: Arc<dyn CredentialSource>,
}

/// Everything an invoker gets back from a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub result: RunResult,

    /// Audit records of every stage that was entered, in order
    pub outcomes: Vec<StageOutcome>,

    /// Where the run's events were written
    pub run_dir: PathBuf,
}

/// Pipeline states; the terminal ones carry the run's result
enum State {
    Preflight,
    Test,
    Build,
    PublishStaging(Arc<ArtifactSet>),
    Verify(Arc<ArtifactSet>),
    Tag(Arc<ArtifactSet>),
    PublishProduction {
        artifacts: Arc<ArtifactSet>,
        tag: ReleaseTag,
    },
    Released {
        tag: ReleaseTag,
    },
    Aborted {
        stage: Stage,
        failure: StageFailure,
    },
}

impl State {
    /// The stage this state executes, None for terminal states
    fn stage(&self) -> Option<Stage> {
        match self {
            State::Preflight => Some(Stage::Preflight),
            State::Test => Some(Stage::Test),
            State::Build => Some(Stage::Build),
            State::PublishStaging(_) => Some(Stage::PublishStaging),
            State::Verify(_) => Some(Stage::Verify),
            State::Tag(_) => Some(Stage::Tag),
            State::PublishProduction { .. } => Some(Stage::PublishProduction),
            State::Released { .. } | State::Aborted { .. } => None,
        }
    }
}

/// A passed gate: where to go next and what to record
struct Transition {
    next: State,
    detail: String,
}

impl Transition {
    fn to(next: State, detail: impl Into<String>) -> Self {
        Self {
            next,
            detail: detail.into(),
        }
    }
}

/// Per-run scratch state
struct RunContext<'a> {
    request: &'a ReleaseRequest,

    /// Hash of the staging principal; the secret itself is not kept
    staging_principal: Option<String>,

    store: EventStore,
    run_id: Uuid,
}

/// Stage-gated release pipeline
pub struct ReleasePipeline {
    package: String,
    source_dir: PathBuf,
    collaborators: Collaborators,
    tag_conflict: TagConflictPolicy,
    runs_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl ReleasePipeline {
    /// Create a pipeline for `package` built from `source_dir`
    pub fn new(
        package: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let package = package.into();
        if package.trim().is_empty() {
            anyhow::bail!("Package name cannot be empty");
        }
        if collaborators.staging.target() != RegistryTarget::Staging {
            anyhow::bail!("Staging client targets the {} registry", collaborators.staging.target());
        }
        if collaborators.production.target() != RegistryTarget::Production {
            anyhow::bail!(
                "Production client targets the {} registry",
                collaborators.production.target()
            );
        }
        if collaborators.staging.endpoint() == collaborators.production.endpoint() {
            anyhow::bail!(
                "Staging and production share the endpoint {}",
                collaborators.staging.endpoint()
            );
        }

        Ok(Self {
            package,
            source_dir: source_dir.into(),
            collaborators,
            tag_conflict: TagConflictPolicy::default(),
            runs_dir: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_tag_conflict_policy(mut self, policy: TagConflictPolicy) -> Self {
        self.tag_conflict = policy;
        self
    }

    /// Write run logs under `dir` instead of the configured home
    pub fn with_runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(dir.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this pipeline's runs between stages
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one release run to a terminal result.
    ///
    /// Errors are reserved for failures of the audit log itself; every
    /// collaborator failure is reported as `RunResult::Aborted`.
    #[instrument(skip_all, fields(package = %self.package, version = %request.version_string()))]
    pub async fn run(&self, request: &ReleaseRequest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!(%run_id, tag = %request.tag_name(), "Starting release run");

        let store = match &self.runs_dir {
            Some(dir) => EventStore::open_in(dir, run_id).await?,
            None => EventStore::open(run_id).await?,
        };

        let header = RunHeader {
            package: self.package.clone(),
            version: request.version_string(),
            tag: request.tag_name(),
            source_ref: request.source_ref().to_string(),
        };
        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!("Release of {} {} started", header.package, header.version),
            StageStatus::Running,
        )
        .with_data(serde_json::to_value(&header)?);
        store.append(&start_event).await?;

        let mut ctx = RunContext {
            request,
            staging_principal: None,
            store,
            run_id,
        };
        let mut outcomes = Vec::new();
        let mut state = State::Preflight;

        while let Some(stage) = state.stage() {
            if self.cancel.is_cancelled() {
                let reason = self.cancel.reason().unwrap_or_default();
                warn!(%stage, %reason, "Cancellation requested; not entering stage");
                let outcome = StageOutcome {
                    stage,
                    status: StageStatus::Skipped,
                    detail: format!("cancelled: {}", reason),
                    duration_ms: None,
                };
                self.record(&ctx, &outcome, EventType::StageSkipped).await?;
                outcomes.push(outcome);
                state = State::Aborted {
                    stage,
                    failure: StageFailure::Cancelled {
                        stage: stage.to_string(),
                        reason,
                    },
                };
                continue;
            }

            let entered = Event::new(
                run_id,
                Some(stage),
                EventType::StageStarted,
                format!("Entering {}", stage),
                StageStatus::Running,
            );
            ctx.store.append(&entered).await?;
            info!(%stage, "Entering stage");

            let started = Instant::now();
            let result = self.enter(state, &mut ctx).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            state = match result {
                Ok(Transition { next, detail }) => {
                    info!(%stage, duration_ms, %detail, "Stage passed");
                    // the manifest is part of the audit trail
                    if let State::PublishStaging(artifacts) = &next {
                        ctx.store.write_manifest(&artifacts.manifest()).await?;
                    }
                    let outcome = StageOutcome::succeeded(stage, detail).with_duration(duration_ms);
                    self.record(&ctx, &outcome, EventType::StageCompleted).await?;
                    outcomes.push(outcome);
                    next
                }
                Err(failure) => {
                    error!(%stage, duration_ms, error = %failure, "Stage failed");
                    let outcome =
                        StageOutcome::failed(stage, failure.to_string()).with_duration(duration_ms);
                    self.record(&ctx, &outcome, EventType::StageFailed).await?;
                    outcomes.push(outcome);
                    State::Aborted { stage, failure }
                }
            };
        }

        if matches!(state, State::Aborted { .. })
            && outcomes
                .iter()
                .any(|o| o.is_success() && o.stage.has_side_effects())
        {
            warn!(%run_id, "Run aborted after changing registry or tag state");
        }

        let result = self.finish(&ctx, state).await?;
        Ok(RunReport {
            run_id,
            result,
            outcomes,
            run_dir: ctx.store.run_dir().to_path_buf(),
        })
    }

    /// Run the entry action of a non-terminal state
    async fn enter(&self, state: State, ctx: &mut RunContext<'_>) -> Result<Transition, StageFailure> {
        match state {
            State::Preflight => self.preflight(ctx).await,
            State::Test => self.test().await,
            State::Build => self.build().await,
            State::PublishStaging(artifacts) => {
                self.publish(ctx, RegistryTarget::Staging, &artifacts).await?;
                Ok(Transition::to(
                    State::Verify(Arc::clone(&artifacts)),
                    format!(
                        "uploaded {} artifact(s) to {}",
                        artifacts.len(),
                        self.collaborators.staging.endpoint()
                    ),
                ))
            }
            State::Verify(artifacts) => self.verify(ctx, artifacts).await,
            State::Tag(artifacts) => self.tag(ctx, artifacts).await,
            State::PublishProduction { artifacts, tag } => {
                self.publish(ctx, RegistryTarget::Production, &artifacts).await?;
                let detail = format!(
                    "uploaded {} artifact(s) to {}",
                    artifacts.len(),
                    self.collaborators.production.endpoint()
                );
                Ok(Transition::to(State::Released { tag }, detail))
            }
            State::Released { .. } | State::Aborted { .. } => {
                unreachable!("terminal states are never entered")
            }
        }
    }

    async fn preflight(&self, ctx: &RunContext<'_>) -> Result<Transition, StageFailure> {
        let version = ctx.request.version_string();
        let production = Arc::clone(&self.collaborators.production);
        let (name, ver) = (self.package.clone(), version.clone());
        let published = guarded("production registry query", async move {
            production.contains(&name, &ver).await
        })
        .await
        .map_err(StageFailure::RegistryQuery)?;

        if !published {
            return Ok(Transition::to(
                State::Test,
                format!("{} {} is not on the production registry", self.package, version),
            ));
        }

        let tag_name = ctx.request.tag_name();
        match self.resolve_tag(&tag_name).await.map_err(StageFailure::Tag)? {
            Some(commit) if same_commit(&commit, ctx.request.source_ref()) => {
                info!(tag = %tag_name, %commit, "Version already released; nothing to do");
                Ok(Transition::to(
                    State::Released {
                        tag: ReleaseTag {
                            name: tag_name,
                            commit: commit.clone(),
                        },
                    },
                    format!("{} already released and tagged at {}", version, commit),
                ))
            }
            Some(commit) => Err(StageFailure::PublishedWithoutTag {
                version,
                tag: tag_name,
                found: format!("points at {}", commit),
            }),
            None => Err(StageFailure::PublishedWithoutTag {
                version,
                tag: tag_name,
                found: "does not exist".to_string(),
            }),
        }
    }

    async fn test(&self) -> Result<Transition, StageFailure> {
        let verifier = Arc::clone(&self.collaborators.verifier);
        let target = VerificationTarget::LocalSource {
            path: self.source_dir.clone(),
        };
        guarded("local test suite", async move { verifier.run(&target).await })
            .await
            .map_err(StageFailure::Validation)?;

        Ok(Transition::to(State::Build, "local test suite passed"))
    }

    async fn build(&self) -> Result<Transition, StageFailure> {
        let builder = Arc::clone(&self.collaborators.builder);
        let source = self.source_dir.clone();
        let built = guarded("build", async move { builder.build(&source).await })
            .await
            .map_err(StageFailure::Build)?;

        let artifacts = ArtifactSet::new(built).map_err(StageFailure::Artifacts)?;

        let detail = format!(
            "built {} ({} bytes, sha256 {})",
            artifacts.filenames().join(", "),
            artifacts.total_bytes(),
            artifacts.digest()
        );
        Ok(Transition::to(State::PublishStaging(Arc::new(artifacts)), detail))
    }

    /// Fetch the stage's credential, upload, and drop the credential
    async fn publish(
        &self,
        ctx: &mut RunContext<'_>,
        target: RegistryTarget,
        artifacts: &Arc<ArtifactSet>,
    ) -> Result<(), StageFailure> {
        let credential = self.credential_for(target).await?;
        let principal = credential.principal_id();

        if target == RegistryTarget::Production
            && ctx.staging_principal.as_deref() == Some(principal.as_str())
        {
            return Err(StageFailure::SharedCredential);
        }

        let client = match target {
            RegistryTarget::Staging => Arc::clone(&self.collaborators.staging),
            RegistryTarget::Production => Arc::clone(&self.collaborators.production),
        };
        let artifacts = Arc::clone(artifacts);
        let operation = format!("{} upload", target);

        guarded(&operation, async move {
            // credential lives only for this call
            client.upload(&credential, &artifacts).await
        })
        .await
        .map_err(|source| StageFailure::Publish { target, source })?;

        if target == RegistryTarget::Staging {
            ctx.staging_principal = Some(principal);
        }
        Ok(())
    }

    async fn credential_for(&self, target: RegistryTarget) -> Result<Credential, StageFailure> {
        let source = Arc::clone(&self.collaborators.credentials);
        let credential = guarded("credential lookup", async move { source.credential(target).await })
            .await
            .map_err(|source| StageFailure::CredentialUnavailable { target, source })?;

        if credential.target() != target {
            return Err(StageFailure::CredentialMismatch {
                expected: target,
                actual: credential.target(),
            });
        }
        Ok(credential)
    }

    async fn verify(
        &self,
        ctx: &RunContext<'_>,
        artifacts: Arc<ArtifactSet>,
    ) -> Result<Transition, StageFailure> {
        let verifier = Arc::clone(&self.collaborators.verifier);
        let endpoint = self.collaborators.staging.endpoint().to_string();
        let target = VerificationTarget::InstalledPackage {
            name: self.package.clone(),
            version: ctx.request.version_string(),
            registry_endpoint: endpoint.clone(),
        };
        guarded("staging verification", async move { verifier.run(&target).await })
            .await
            .map_err(StageFailure::Verification)?;

        Ok(Transition::to(
            State::Tag(artifacts),
            format!(
                "{}=={} installed from {} passed the test suite",
                self.package,
                ctx.request.version_string(),
                endpoint
            ),
        ))
    }

    async fn tag(
        &self,
        ctx: &RunContext<'_>,
        artifacts: Arc<ArtifactSet>,
    ) -> Result<Transition, StageFailure> {
        let tag_name = ctx.request.tag_name();
        let source_ref = ctx.request.source_ref().to_string();

        let tags = Arc::clone(&self.collaborators.tags);
        let (create_ref, create_name) = (source_ref.clone(), tag_name.clone());
        let created = guarded("tag creation", async move {
            tags.create_tag(&create_ref, &create_name).await
        })
        .await;

        match created {
            Ok(()) => Ok(Transition::to(
                State::PublishProduction {
                    artifacts,
                    tag: ReleaseTag {
                        name: tag_name.clone(),
                        commit: source_ref.clone(),
                    },
                },
                format!("created tag {} at {}", tag_name, source_ref),
            )),
            Err(TagError::AlreadyExists { tag }) => match self.tag_conflict {
                TagConflictPolicy::Fail => Err(StageFailure::TagExists { tag }),
                TagConflictPolicy::Resume => {
                    let found = self.resolve_tag(&tag).await.map_err(StageFailure::Tag)?;
                    match found {
                        Some(commit) if same_commit(&commit, &source_ref) => {
                            warn!(%tag, %commit, "Tag already exists on this commit; resuming release");
                            Ok(Transition::to(
                                State::PublishProduction {
                                    artifacts,
                                    tag: ReleaseTag {
                                        name: tag.clone(),
                                        commit: commit.clone(),
                                    },
                                },
                                format!("tag {} already exists at {}; resuming", tag, commit),
                            ))
                        }
                        other => Err(StageFailure::InconsistentTag {
                            tag,
                            expected: source_ref,
                            found: other.unwrap_or_else(|| "<unresolvable>".to_string()),
                        }),
                    }
                }
            },
            Err(TagError::Other(e)) => Err(StageFailure::Tag(e)),
        }
    }

    async fn resolve_tag(&self, tag_name: &str) -> Result<Option<String>, CollaboratorError> {
        let tags = Arc::clone(&self.collaborators.tags);
        let name = tag_name.to_string();
        guarded("tag lookup", async move { tags.resolve(&name).await }).await
    }

    /// Record a stage outcome in the event log
    async fn record(&self, ctx: &RunContext<'_>, outcome: &StageOutcome, event_type: EventType) -> Result<()> {
        let mut event = Event::new(
            ctx.run_id,
            Some(outcome.stage),
            event_type,
            outcome.detail.clone(),
            outcome.status,
        );
        if let Some(ms) = outcome.duration_ms {
            event = event.with_duration(ms);
        }
        if outcome.status == StageStatus::Failed {
            event = event.with_error(outcome.detail.clone());
        }
        ctx.store.append(&event).await
    }

    /// Turn the terminal state into the invoker's result and log it
    async fn finish(&self, ctx: &RunContext<'_>, state: State) -> Result<RunResult> {
        let (result, event) = match state {
            State::Released { tag } => {
                info!(run_id = %ctx.run_id, tag = %tag.name, "Release completed");
                let result = RunResult::Released {
                    version: ctx.request.version_string(),
                    tag: tag.name.clone(),
                };
                let event = Event::new(
                    ctx.run_id,
                    None,
                    EventType::RunReleased,
                    format!("Released {} as {}", ctx.request.version_string(), tag.name),
                    StageStatus::Succeeded,
                );
                (result, event)
            }
            State::Aborted { stage, failure } => {
                if failure.needs_operator() {
                    error!(run_id = %ctx.run_id, %stage, "Inconsistent release state; operator action required");
                }
                let result = RunResult::Aborted {
                    failed_stage: stage,
                    kind: failure.kind(),
                    detail: failure.to_string(),
                };
                let event = Event::new(
                    ctx.run_id,
                    Some(stage),
                    EventType::RunAborted,
                    format!("Release aborted at {}", stage),
                    StageStatus::Failed,
                )
                .with_error(failure.to_string());
                (result, event)
            }
            _ => unreachable!("run loop exits only on terminal states"),
        };

        ctx.store
            .append(&event.with_data(serde_json::to_value(&result)?))
            .await?;
        Ok(result)
    }
}

/// Run a collaborator call on its own task so a panic becomes a failure
async fn guarded<T, E, F>(operation: &str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<CollaboratorError> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(join) if join.is_panic() => Err(CollaboratorError::Panicked {
            operation: operation.to_string(),
        }
        .into()),
        Err(_) => Err(CollaboratorError::failed(format!("{} was aborted", operation)).into()),
    }
}

/// Commit ids match exactly or one is an abbreviation of the other
fn same_commit(a: &str, b: &str) -> bool {
    const MIN_ABBREV: usize = 7;
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    short.len() >= MIN_ABBREV && long.starts_with(short)
}
