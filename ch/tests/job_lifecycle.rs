//! Submission, worker execution and status polling

mod common;

use std::sync::Arc;
use std::time::Duration;

use chorus::jobs::{GatewayError, InProcessRunner, JobRequest, StatusView, SubmissionAck};
use chorus::llm::{FixedLlmProvider, ScriptedLlmClient};
use chorus::service::ChorusService;
use common::*;
use tempfile::TempDir;

/// Poll until the turn leaves the running state
async fn wait_for(service: &ChorusService, session: &str, turn: u32) -> StatusView {
    for _ in 0..200 {
        let view = service.status(session, turn);
        if !matches!(view, StatusView::Running { .. }) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("turn {} of {} never finished", turn, session);
}

/// Submit once the worker has released the session
async fn submit_when_free(service: &ChorusService, request: JobRequest) -> SubmissionAck {
    for _ in 0..200 {
        match service.submit(request.clone()) {
            Err(GatewayError::DuplicateInFlight { .. }) => tokio::time::sleep(Duration::from_millis(25)).await,
            other => return other.unwrap(),
        }
    }
    panic!("session never released");
}

#[tokio::test]
async fn test_never_submitted_turn_is_running_with_no_turns() {
    let temp = TempDir::new().unwrap();
    let service = service(test_config(&temp));

    assert_eq!(
        service.status("quiet-meadow", 1),
        StatusView::Running { completed_turns: 0 }
    );
}

#[tokio::test]
async fn test_submit_acknowledges_first_turn() {
    let temp = TempDir::new().unwrap();
    let service = service(test_config(&temp));

    let ack = service.submit(JobRequest::new("Is Rust fast?", 3)).unwrap();

    assert_eq!(ack.status, "accepted");
    assert_eq!(ack.turn_number, 1);
    assert!(ack.check_url.ends_with(&format!("/api/jobs/{}/1", ack.session_name)));
    assert_eq!(ack.estimated_seconds, 3 * 45);
    assert_eq!(service.queue().pending_count().unwrap(), 1);
    assert_eq!(
        service.status(&ack.session_name, 1),
        StatusView::Running { completed_turns: 0 }
    );
}

#[tokio::test]
async fn test_duplicate_submission_rejected_while_in_flight() {
    let temp = TempDir::new().unwrap();
    let service = service(test_config(&temp));

    let ack = service.submit(JobRequest::new("First", 2)).unwrap();
    let mut again = JobRequest::new("Second", 2);
    again.session_name = Some(ack.session_name.clone());

    let err = service.submit(again).unwrap_err();
    assert!(matches!(err, GatewayError::DuplicateInFlight { .. }));
    assert_eq!(service.queue().pending_count().unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_session_gets_a_new_session() {
    let temp = TempDir::new().unwrap();
    let service = service(test_config(&temp));

    let mut request = JobRequest::new("Hello", 0);
    request.session_name = Some("never-made".to_string());
    let ack = service.submit(request).unwrap();

    assert_ne!(ack.session_name, "never-made");
    assert_eq!(ack.turn_number, 1);
    assert_eq!(
        service.status(&ack.session_name, 1),
        StatusView::Running { completed_turns: 0 }
    );
}

#[tokio::test]
async fn test_worker_pool_completes_submitted_turns() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let service = service(config.clone());
    let llm = provider(scripted(2, Duration::from_millis(10)));
    let runner = Arc::new(InProcessRunner::new(Arc::new(config), llm, service.store().clone()));
    let pool = service.start_workers(runner).unwrap();

    let ack = service.submit(JobRequest::new("Why do cats purr?", 2)).unwrap();
    let session = ack.session_name.clone();

    let StatusView::Complete { result } = wait_for(&service, &session, 1).await else {
        panic!("turn 1 did not complete");
    };
    assert_eq!(result.perspectives.as_ref().unwrap().len(), 2);

    // The session is free again once the turn lands
    let mut follow_up = JobRequest::new("And dogs?", 0);
    follow_up.session_name = Some(session.clone());
    let second = submit_when_free(&service, follow_up).await;
    assert_eq!(second.turn_number, 2);

    assert!(matches!(wait_for(&service, &session, 2).await, StatusView::Complete { .. }));
    assert!(matches!(service.status(&session, 1), StatusView::Complete { .. }));
    assert_eq!(
        service.status(&session, 3),
        StatusView::Running { completed_turns: 2 }
    );

    pool.shutdown().await;
    assert_eq!(service.queue().pending_count().unwrap(), 0);
    assert_eq!(service.queue().claimed_count().unwrap(), 0);
}

#[tokio::test]
async fn test_stage_failure_surfaces_as_error() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let service = service(config.clone());
    let client = Arc::new(ScriptedLlmClient::new(|req| match step_of(req) {
        // Expansion answers with plain text instead of the submit tool
        Step::Expand => (
            Duration::ZERO,
            Ok(chorus::llm::CompletionResponse::text("no plan", chorus::llm::TokenUsage::new(1, 1))),
        ),
        _ => answer(req, 2, Duration::ZERO),
    }));
    let runner = Arc::new(InProcessRunner::new(
        Arc::new(config),
        Arc::new(FixedLlmProvider::new(client)),
        service.store().clone(),
    ));
    let pool = service.start_workers(runner).unwrap();

    let ack = service.submit(JobRequest::new("Break please", 2)).unwrap();
    let StatusView::Error { message } = wait_for(&service, &ack.session_name, 1).await else {
        panic!("expected an error status");
    };
    assert!(!message.is_empty());

    // A failed turn does not hold the session
    let mut retry = JobRequest::new("Try again", 0);
    retry.session_name = Some(ack.session_name.clone());
    assert_eq!(submit_when_free(&service, retry).await.turn_number, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_crashed_job_surfaces_as_error() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let service = service(config.clone());
    let client = Arc::new(ScriptedLlmClient::new(|req| match step_of(req) {
        Step::Participant(_) => panic!("participant process died"),
        _ => answer(req, 2, Duration::ZERO),
    }));
    let runner = Arc::new(InProcessRunner::new(
        Arc::new(config),
        Arc::new(FixedLlmProvider::new(client)),
        service.store().clone(),
    ));
    let pool = service.start_workers(runner).unwrap();

    let ack = service.submit(JobRequest::new("Crash please", 2)).unwrap();
    let StatusView::Error { message } = wait_for(&service, &ack.session_name, 1).await else {
        panic!("expected an error status");
    };
    assert!(!message.is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_jobs_queued_before_start_are_run() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let service = service(config.clone());

    let ack = service.submit(JobRequest::new("Queued early", 0)).unwrap();

    let runner = Arc::new(InProcessRunner::new(
        Arc::new(config),
        provider(scripted(0, Duration::ZERO)),
        service.store().clone(),
    ));
    let pool = service.start_workers(runner).unwrap();

    let StatusView::Complete { result } = wait_for(&service, &ack.session_name, 1).await else {
        panic!("queued turn did not complete");
    };
    assert_eq!(result.response.as_deref(), Some("Direct answer"));

    pool.shutdown().await;
}
