//! Command-line interface for relgate.
//!
//! Provides commands for running a release, checking the status of a
//! run, listing recent runs, and showing the resolved configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use uuid::Uuid;

use crate::adapters::GitTagService;
use crate::config;
use crate::core::{EventStore, ReleaseDefinition, ReleasePipeline, RunReport, TagConflictPolicy};
use crate::domain::{ReleaseRequest, Run, RunResult, RunState, Stage, StageStatus};

/// relgate - Stage-gated package release pipeline
#[derive(Parser, Debug)]
#[command(name = "relgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Release a version: test, build, stage, verify, tag, publish
    Release {
        /// Release definition (defaults to release.yaml)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Version to release (overrides the definition's version source).
        /// Semver, or a short or suffixed form such as 0.4 or 1.0.0rc1;
        /// the tag uses the text as given
        #[arg(long)]
        version: Option<String>,

        /// Commit or ref to tag (defaults to HEAD of the source checkout)
        #[arg(long)]
        source_ref: Option<String>,

        /// Abort instead of resuming when the tag already exists
        #[arg(long)]
        fail_on_existing_tag: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Release {
                file,
                version,
                source_ref,
                fail_on_existing_tag,
            } => release(file, version, source_ref, fail_on_existing_tag).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Run one release from a definition file
async fn release(
    file: Option<PathBuf>,
    version: Option<String>,
    source_ref: Option<String>,
    fail_on_existing_tag: bool,
) -> Result<()> {
    let definition_path = match file {
        Some(path) => path,
        None => config::config()?.definition.clone(),
    };
    let definition = ReleaseDefinition::from_file(&definition_path)?;
    definition.validate()?;

    let source_dir = source_dir_of(&definition_path)?;

    let version = match version {
        Some(v) => v,
        None => definition.version.resolve(&source_dir)?,
    };
    let git = GitTagService::new(&source_dir, None);
    let source_ref = match source_ref {
        Some(r) => git
            .resolve_commit(&r)
            .await
            .with_context(|| format!("Failed to resolve '{}' to a commit", r))?,
        None => git
            .head_commit()
            .await
            .context("Failed to determine the commit to release; pass --source-ref")?,
    };
    let request = ReleaseRequest::with_tag_prefix(&source_ref, &version, &definition.tag.prefix)?;

    let policy = if fail_on_existing_tag {
        TagConflictPolicy::Fail
    } else {
        definition.tag.on_existing
    };
    let collaborators = definition.collaborators(&source_dir);
    let pipeline = ReleasePipeline::new(definition.package.clone(), &source_dir, collaborators)?
        .with_tag_conflict_policy(policy);

    // Ctrl-C stops the run before the next stage; an in-flight upload or tag push finishes
    let token = pipeline.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping before the next stage");
            token.cancel("interrupted");
        }
    });

    eprintln!(
        "Releasing {} {} ({}) from {}",
        definition.package,
        request.version_string(),
        request.tag_name(),
        request.source_ref()
    );
    let report = pipeline.run(&request).await;
    interrupt.abort();
    let report = report?;

    print_report(&report);

    if !report.result.is_released() {
        std::process::exit(1);
    }
    Ok(())
}

/// Directory the definition's relative paths are resolved against
fn source_dir_of(definition_path: &Path) -> Result<PathBuf> {
    let parent = match definition_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().context("Failed to determine current directory")?,
    };
    parent
        .canonicalize()
        .with_context(|| format!("Source directory not found: {}", parent.display()))
}

fn print_report(report: &RunReport) {
    eprintln!();
    for outcome in &report.outcomes {
        let duration = outcome
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_default();
        eprintln!(
            "  {:<9} {:<20} {:>8}  {}",
            status_label(outcome.status),
            outcome.stage,
            duration,
            outcome.detail
        );
    }
    eprintln!();

    match &report.result {
        RunResult::Released { version, tag } => {
            eprintln!("[Run {} released {} as {}]", report.run_id, version, tag);
        }
        RunResult::Aborted {
            failed_stage,
            kind,
            detail,
        } => {
            eprintln!(
                "[Run {} aborted at {} ({}): {}]",
                report.run_id, failed_stage, kind, detail
            );
        }
    }
    eprintln!("Events: {}", report.run_dir.join("events.jsonl").display());
}

fn status_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Succeeded => "ok",
        StageStatus::Failed => "FAILED",
        StageStatus::Skipped => "skipped",
    }
}

/// Load a run's reconstructed state from its event log
async fn load_run(base_dir: &Path, run_id: Uuid) -> Result<Run> {
    let store = EventStore::open_in(base_dir, run_id).await?;
    let events = store.replay().await?;
    Run::from_events(&events).with_context(|| format!("Run not found: {}", run_id))
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let base_dir = config::runs_dir()?;
    if !base_dir.join(run_id.to_string()).exists() {
        anyhow::bail!("Run not found: {}", run_id);
    }
    let run = load_run(&base_dir, run_id).await?;

    println!("Run ID: {}", run.id);
    println!("Package: {} {}", run.header.package, run.header.version);
    println!("Tag: {} at {}", run.header.tag, run.header.source_ref);
    println!("State: {}", state_label(&run.state));
    if let RunState::Aborted { detail, .. } = &run.state {
        println!("Reason: {}", detail);
    }
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("\nStages:");
    for stage in Stage::ORDER {
        println!("  {}: {}", stage, status_label(run.stage_status(stage)));
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let base_dir = config::runs_dir()?;
    let mut runs = Vec::new();
    for run_id in EventStore::list_runs_in(&base_dir).await? {
        if let Ok(run) = load_run(&base_dir, run_id).await {
            runs.push(run);
        }
    }

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);

    println!("{:<38} {:<24} {:<12} {:<20}", "RUN ID", "PACKAGE", "VERSION", "STATE");
    println!("{}", "-".repeat(96));

    for run in runs {
        println!(
            "{:<38} {:<24} {:<12} {:<20}",
            run.id,
            run.header.package,
            run.header.version,
            state_label(&run.state)
        );
    }

    Ok(())
}

fn state_label(state: &RunState) -> String {
    match state {
        RunState::Running => "running".to_string(),
        RunState::Released { tag } => format!("released ({})", tag),
        RunState::Aborted { stage: Some(stage), .. } => format!("aborted at {}", stage),
        RunState::Aborted { stage: None, .. } => "aborted".to_string(),
    }
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("relgate configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:       {}", cfg.home.display());
    println!("  Runs:       {}", cfg.home.join("runs").display());
    println!("  Definition: {}", cfg.definition.display());
    println!();
    println!("Environment:");
    println!(
        "  RELGATE_HOME: {}",
        std::env::var("RELGATE_HOME").unwrap_or_else(|_| "(not set)".to_string())
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_command() {
        let cli = Cli::try_parse_from([
            "relgate",
            "release",
            "--file",
            "ci/release.yaml",
            "--version",
            "1.2.0",
            "--source-ref",
            "abc1234",
        ])
        .unwrap();

        match cli.command {
            Commands::Release {
                file,
                version,
                source_ref,
                fail_on_existing_tag,
            } => {
                assert_eq!(file, Some(PathBuf::from("ci/release.yaml")));
                assert_eq!(version.as_deref(), Some("1.2.0"));
                assert_eq!(source_ref.as_deref(), Some("abc1234"));
                assert!(!fail_on_existing_tag);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_runs_default_limit() {
        let cli = Cli::try_parse_from(["relgate", "runs"]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { limit: 10 }));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(state_label(&RunState::Running), "running");
        assert_eq!(
            state_label(&RunState::Aborted {
                stage: Some(Stage::Verify),
                detail: "boom".to_string()
            }),
            "aborted at verify"
        );
    }

    #[test]
    fn test_source_dir_of_relative_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("release.yaml");
        let dir = source_dir_of(&file).unwrap();
        assert_eq!(dir, temp.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_load_run_from_store() {
        use crate::domain::{Event, EventType, RunHeader};

        let temp = tempfile::TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open_in(temp.path(), run_id).await.unwrap();
        let header = RunHeader {
            package: "pkg".to_string(),
            version: "1.0.0".to_string(),
            tag: "v1.0.0".to_string(),
            source_ref: "abc1234".to_string(),
        };
        store
            .append(
                &Event::new(
                    run_id,
                    None,
                    EventType::RunStarted,
                    "started".to_string(),
                    StageStatus::Running,
                )
                .with_data(serde_json::to_value(&header).unwrap()),
            )
            .await
            .unwrap();

        let run = load_run(temp.path(), run_id).await.unwrap();
        assert_eq!(run.header, header);
        assert!(run.is_running());
    }
}
