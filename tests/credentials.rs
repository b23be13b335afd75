//! Credential isolation integration tests.

mod common;

use common::*;
use relgate::adapters::StaticCredentialSource;
use relgate::domain::{Credential, FailureKind, RegistryTarget, RunResult, Stage};

fn assert_credential_abort(result: &RunResult, stage: Stage) {
    match result {
        RunResult::Aborted {
            failed_stage, kind, ..
        } => {
            assert_eq!(*failed_stage, stage);
            assert_eq!(*kind, FailureKind::Credential);
        }
        other => panic!("expected credential abort, got {:?}", other),
    }
}

#[tokio::test]
async fn test_each_registry_sees_its_own_identity() {
    let harness = Harness::new();

    harness.pipeline().run(&request()).await.unwrap();

    assert_eq!(harness.staging.uploads()[0].0, "stager");
    assert_eq!(harness.production.uploads()[0].0, "publisher");
}

#[tokio::test]
async fn test_credentials_fetched_when_their_stage_begins() {
    let harness = Harness::new();

    harness.pipeline().run(&request()).await.unwrap();

    let production = harness.position("credential:production").unwrap();
    let tag = harness.position("create_tag").unwrap();
    let staging = harness.position("credential:staging").unwrap();
    let build = harness.position("build").unwrap();
    assert!(staging > build);
    assert!(production > tag);
    assert_eq!(harness.count("credential"), 2);
}

#[tokio::test]
async fn test_missing_staging_credential_aborts_before_upload() {
    let harness = Harness::new();
    harness
        .credentials
        .replace(StaticCredentialSource::new().with(production_credential()));

    let report = harness.pipeline().run(&request()).await.unwrap();

    assert_credential_abort(&report.result, Stage::PublishStaging);
    assert_eq!(harness.count("upload"), 0);
}

#[tokio::test]
async fn test_missing_production_credential_aborts_after_tag() {
    let harness = Harness::new();
    harness
        .credentials
        .replace(StaticCredentialSource::new().with(staging_credential()));

    let report = harness.pipeline().run(&request()).await.unwrap();

    assert_credential_abort(&report.result, Stage::PublishProduction);
    assert_eq!(harness.count("upload:production"), 0);
    assert_eq!(harness.tags.count(), 1);
}

#[tokio::test]
async fn test_staging_credential_handed_to_production_is_rejected() {
    let harness = Harness::new();
    harness.credentials.replace(
        StaticCredentialSource::new()
            .with(staging_credential())
            .with_for(RegistryTarget::Production, staging_credential()),
    );

    let report = harness.pipeline().run(&request()).await.unwrap();

    assert_credential_abort(&report.result, Stage::PublishProduction);
    if let RunResult::Aborted { detail, .. } = &report.result {
        assert!(detail.contains("staging credential"), "{}", detail);
    }
    assert_eq!(harness.count("upload:production"), 0);
}

#[tokio::test]
async fn test_shared_principal_is_rejected() {
    let harness = Harness::new();
    harness.credentials.replace(
        StaticCredentialSource::new()
            .with(Credential::new(RegistryTarget::Staging, "__token__", "one-token"))
            .with(Credential::new(RegistryTarget::Production, "__token__", "one-token")),
    );

    let report = harness.pipeline().run(&request()).await.unwrap();

    assert_credential_abort(&report.result, Stage::PublishProduction);
    assert_eq!(harness.staging.uploads().len(), 1);
    assert_eq!(harness.count("upload:production"), 0);
}

#[tokio::test]
async fn test_secrets_never_reach_the_event_log() {
    let harness = Harness::new();

    let report = harness.pipeline().run(&request()).await.unwrap();

    let log = std::fs::read_to_string(report.run_dir.join("events.jsonl")).unwrap();
    assert!(!log.contains("staging-secret"));
    assert!(!log.contains("production-secret"));
}
