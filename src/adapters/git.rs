//! Tag service backed by the system `git` binary.
//!
//! Tags are annotated and, when a remote is configured, pushed immediately.
//! Existing tags are never moved or deleted once published.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::command::run_command;
use super::{CollaboratorError, TagError, TagService};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Git-backed tag service
pub struct GitTagService {
    repo_dir: PathBuf,

    /// Remote that receives the tag (None = local repository only)
    remote: Option<String>,

    timeout: Duration,
}

impl GitTagService {
    pub fn new(repo_dir: impl Into<PathBuf>, remote: Option<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote,
            timeout: GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn git(&self, operation: &str, args: &[&str]) -> Result<String, CollaboratorError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git".to_string());
        argv.extend(args.iter().map(|a| a.to_string()));

        let output = run_command(operation, &argv, &self.repo_dir, &[], self.timeout).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Full commit id of HEAD
    pub async fn head_commit(&self) -> Result<String, CollaboratorError> {
        self.git("git rev-parse", &["rev-parse", "HEAD"]).await
    }

    /// Resolve any ref to a full commit id
    pub async fn resolve_commit(&self, reference: &str) -> Result<String, CollaboratorError> {
        let spec = format!("{}^{{commit}}", reference);
        self.git("git rev-parse", &["rev-parse", "--verify", &spec]).await
    }

    async fn resolve_local(&self, tag_name: &str) -> Result<Option<String>, CollaboratorError> {
        let spec = format!("refs/tags/{}^{{commit}}", tag_name);
        match self
            .git("git rev-parse", &["rev-parse", "-q", "--verify", &spec])
            .await
        {
            Ok(commit) if !commit.is_empty() => Ok(Some(commit)),
            Ok(_) => Ok(None),
            // `-q --verify` exits 1 without output for a missing ref
            Err(CollaboratorError::Failed { reason }) if reason.contains("exit code 1:") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn resolve_remote(&self, remote: &str, tag_name: &str) -> Result<Option<String>, CollaboratorError> {
        let plain = format!("refs/tags/{}", tag_name);
        let peeled = format!("{}^{{}}", plain);
        let listing = self
            .git("git ls-remote", &["ls-remote", remote, &plain, &peeled])
            .await?;
        Ok(parse_ls_remote(&listing, &plain))
    }
}

/// Pick the commit for `refname` out of `git ls-remote` output, preferring the
/// peeled entry of an annotated tag
fn parse_ls_remote(listing: &str, refname: &str) -> Option<String> {
    let peeled = format!("{}^{{}}", refname);
    let mut direct = None;

    for line in listing.lines() {
        let mut parts = line.split_whitespace();
        let (Some(sha), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if name == peeled {
            return Some(sha.to_string());
        }
        if name == refname {
            direct = Some(sha.to_string());
        }
    }

    direct
}

fn is_conflict(reason: &str) -> bool {
    reason.contains("already exists") || reason.contains("[rejected]")
}

#[async_trait]
impl TagService for GitTagService {
    async fn create_tag(&self, source_ref: &str, tag_name: &str) -> Result<(), TagError> {
        let message = format!("Release {}", tag_name);
        if let Err(e) = self
            .git("git tag", &["tag", "-a", tag_name, source_ref, "-m", &message])
            .await
        {
            return Err(match e {
                CollaboratorError::Failed { ref reason } if is_conflict(reason) => {
                    TagError::AlreadyExists {
                        tag: tag_name.to_string(),
                    }
                }
                other => TagError::Other(other),
            });
        }

        if let Some(remote) = &self.remote {
            let refspec = format!("refs/tags/{}", tag_name);
            if let Err(e) = self.git("git push", &["push", remote, &refspec]).await {
                // Drop the unpublished local tag so a retry starts clean
                if let Err(cleanup) = self.git("git tag -d", &["tag", "-d", tag_name]).await {
                    warn!(tag = %tag_name, error = %cleanup, "Failed to remove local tag after push failure");
                }
                return Err(match e {
                    CollaboratorError::Failed { ref reason } if is_conflict(reason) => {
                        TagError::AlreadyExists {
                            tag: tag_name.to_string(),
                        }
                    }
                    other => TagError::Other(other),
                });
            }
        }

        info!(tag = %tag_name, %source_ref, "Tag created");
        Ok(())
    }

    async fn resolve(&self, tag_name: &str) -> Result<Option<String>, CollaboratorError> {
        match &self.remote {
            Some(remote) => self.resolve_remote(remote, tag_name).await,
            None => self.resolve_local(tag_name).await,
        }
    }
}
