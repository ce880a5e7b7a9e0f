//! Live-listener tests for the external completion receiver.

use std::sync::Arc;

use datum_core::prelude::*;
use graph_engine::{Completer, ExternalCompletion, WaitError};
use rendezvous_axum::{HttpRendezvous, ReceiverConfig};
use testing_harness::{FailingFunctionInvoker, StageRunner};

fn test_config() -> ReceiverConfig {
    ReceiverConfig {
        bind: "127.0.0.1:0".parse().expect("loopback addr"),
        advertised_host: "127.0.0.1".to_string(),
        path_prefix: "/completions/".to_string(),
    }
}

fn completer_with_receiver() -> (Completer, Arc<HttpRendezvous>) {
    let runner = Arc::new(StageRunner::new());
    let rendezvous = Arc::new(HttpRendezvous::new(test_config()));
    let completer = Completer::builder(runner, Arc::new(FailingFunctionInvoker))
        .rendezvous(Arc::clone(&rendezvous) as Arc<dyn graph_engine::ExternalRendezvous>)
        .build();
    (completer, rendezvous)
}

async fn external(completer: &Completer) -> (ThreadId, ExternalCompletion) {
    let tid = completer.create_thread("app/external");
    let ext = completer
        .create_external_completion(&tid)
        .await
        .expect("listener starts");
    (tid, ext)
}

#[tokio::test]
async fn complete_uri_delivers_the_request_as_success() {
    let (completer, _rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    let client = reqwest::Client::new();
    let response = client
        .post(&ext.complete_uri)
        .header("X-Foo", "bar")
        .body("hello")
        .send()
        .await
        .expect("post succeeds");
    assert_eq!(response.status(), 200);

    let result = completer
        .wait_for_completion(&tid, &ext.completion_id)
        .await
        .expect("stage completes");
    match result {
        StageResult::Success(Datum::HttpReq {
            method,
            headers,
            body,
        }) => {
            assert_eq!(method, HttpMethod::Post);
            assert_eq!(headers.get("x-foo"), Some("bar"));
            assert_eq!(body, b"hello");
        }
        other => panic!("expected HttpReq datum, got {other}"),
    }
}

#[tokio::test]
async fn fail_uri_delivers_the_request_as_failure() {
    let (completer, _rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    let client = reqwest::Client::new();
    let response = client
        .post(&ext.fail_uri)
        .body("went wrong")
        .send()
        .await
        .expect("post succeeds");
    assert_eq!(response.status(), 200);

    match completer
        .wait_for_completion(&tid, &ext.completion_id)
        .await
    {
        Err(WaitError::StageFailed(StageResult::Failure(Datum::HttpReq { body, .. }))) => {
            assert_eq!(body, b"went wrong");
        }
        other => panic!("expected HttpReq failure carrier, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_values_for_a_header_are_joined() {
    let (completer, _rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    let client = reqwest::Client::new();
    client
        .post(&ext.complete_uri)
        .header("X-Multi", "a")
        .header("X-Multi", "b")
        .send()
        .await
        .expect("post succeeds");

    let result = completer
        .wait_for_completion(&tid, &ext.completion_id)
        .await
        .expect("stage completes");
    match result {
        StageResult::Success(Datum::HttpReq { headers, .. }) => {
            assert_eq!(headers.get("x-multi"), Some("a;b"));
        }
        other => panic!("expected HttpReq datum, got {other}"),
    }
}

#[tokio::test]
async fn unknown_paths_actions_and_methods_are_not_found() {
    let (completer, rendezvous) = completer_with_receiver();
    let (_tid, ext) = external(&completer).await;

    let port = rendezvous
        .local_addr()
        .await
        .expect("listener running")
        .port();
    let client = reqwest::Client::new();

    let unknown_path = format!("http://127.0.0.1:{port}/completions/ghost_9/complete");
    let response = client.post(&unknown_path).send().await.expect("post");
    assert_eq!(response.status(), 404);

    let bad_action = ext.complete_uri.replace("/complete", "/explode");
    let response = client.post(&bad_action).send().await.expect("post");
    assert_eq!(response.status(), 404);

    let response = client.get(&ext.complete_uri).send().await.expect("get");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn repeated_posts_are_acknowledged_but_do_not_rewrite_the_result() {
    let (completer, _rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    let client = reqwest::Client::new();
    let first = client
        .post(&ext.complete_uri)
        .body("first")
        .send()
        .await
        .expect("post");
    assert_eq!(first.status(), 200);

    let second = client
        .post(&ext.fail_uri)
        .body("second")
        .send()
        .await
        .expect("post");
    assert_eq!(second.status(), 200);

    let result = completer
        .wait_for_completion(&tid, &ext.completion_id)
        .await
        .expect("first resolution wins");
    match result {
        StageResult::Success(Datum::HttpReq { body, .. }) => assert_eq!(body, b"first"),
        other => panic!("expected the first delivery, got {other}"),
    }
}

#[tokio::test]
async fn uris_follow_the_thread_and_stage_naming() {
    let (completer, _rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    let expected_suffix = format!("/completions/{}_{}/complete", tid, ext.completion_id);
    assert!(
        ext.complete_uri.ends_with(&expected_suffix),
        "unexpected URI {}",
        ext.complete_uri
    );
    assert!(ext.fail_uri.ends_with("/fail"));
}

#[tokio::test]
async fn listener_is_started_once_and_shared_across_registrations() {
    let (completer, rendezvous) = completer_with_receiver();
    let (_tid, first) = external(&completer).await;
    let (_tid2, second) = external(&completer).await;

    let addr = rendezvous.local_addr().await.expect("listener running");
    assert!(first.complete_uri.contains(&addr.port().to_string()));
    assert!(second.complete_uri.contains(&addr.port().to_string()));
}

#[tokio::test]
async fn shutdown_fails_pending_completions_with_stage_lost() {
    let (completer, rendezvous) = completer_with_receiver();
    let (tid, ext) = external(&completer).await;

    rendezvous.shutdown().await;

    match completer
        .wait_for_completion(&tid, &ext.completion_id)
        .await
    {
        Err(WaitError::StageFailed(StageResult::Failure(Datum::Error(error)))) => {
            assert_eq!(error.kind, ErrorKind::StageLost);
        }
        other => panic!("expected stage_lost, got {other:?}"),
    }

    let client = reqwest::Client::new();
    assert!(
        client.post(&ext.complete_uri).send().await.is_err(),
        "listener should no longer accept connections"
    );
}

#[tokio::test]
async fn completers_without_a_rendezvous_reject_external_completions() {
    let runner = Arc::new(StageRunner::new());
    let completer = Completer::new(runner, Arc::new(FailingFunctionInvoker));
    let tid = completer.create_thread("app/no-external");

    match completer.create_external_completion(&tid).await {
        Err(graph_engine::PlatformError::ExternalCompletionsUnavailable) => {}
        other => panic!("expected unavailable error, got {other:?}"),
    }
}
