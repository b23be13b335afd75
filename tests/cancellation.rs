//! Cooperative cancellation integration tests.

mod common;

use common::*;
use relgate::core::CancellationToken;
use relgate::domain::{FailureKind, RunResult, Stage, StageStatus};

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    pipeline.cancellation_token().cancel("shutdown");

    let report = pipeline.run(&request()).await.unwrap();

    match &report.result {
        RunResult::Aborted {
            failed_stage,
            kind,
            detail,
        } => {
            assert_eq!(*failed_stage, Stage::Preflight);
            assert_eq!(*kind, FailureKind::Cancelled);
            assert!(detail.contains("shutdown"));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(harness.calls().is_empty());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, StageStatus::Skipped);
}

#[tokio::test]
async fn test_cancel_during_verify_finishes_verify_then_stops() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    harness.verifier.cancel_during_verify(token.clone());

    let report = harness
        .pipeline()
        .with_cancellation(token)
        .run(&request())
        .await
        .unwrap();

    match &report.result {
        RunResult::Aborted {
            failed_stage, kind, ..
        } => {
            assert_eq!(*failed_stage, Stage::Tag);
            assert_eq!(*kind, FailureKind::Cancelled);
        }
        other => panic!("expected abort, got {:?}", other),
    }

    let verify = report
        .outcomes
        .iter()
        .find(|o| o.stage == Stage::Verify)
        .unwrap();
    assert_eq!(verify.status, StageStatus::Succeeded);
    assert_eq!(report.outcomes.last().unwrap().status, StageStatus::Skipped);
    assert_eq!(harness.count("create_tag"), 0);
    assert_eq!(harness.count("upload:production"), 0);
}
