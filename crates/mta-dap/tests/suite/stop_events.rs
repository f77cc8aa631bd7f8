use std::time::Duration;

use mta_config::ContextLayout;
use mta_debug_api::mock::MockSnapshot;
use mta_debug_api::ResumeMode;
use serde_json::json;

use crate::harness::{launched, wait_until, SERVER_LUA};

const QUIET: Duration = Duration::from_millis(200);

#[tokio::test]
async fn pause_is_reported_exactly_once() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 41));
    let stopped = client.event("stopped").await;
    assert_eq!(
        stopped["body"],
        json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": false})
    );

    client.assert_no_event("stopped", QUIET).await;
    client.disconnect().await;
}

#[tokio::test]
async fn continue_then_pause_reports_one_more_stop() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 41));
    client.event("stopped").await;

    let body = client.request_ok("continue", json!({"threadId": 1})).await;
    assert_eq!(body, json!({"allThreadsContinued": false}));
    assert_eq!(backend.resume_mode("_server"), Some(ResumeMode::Resume));
    client.assert_no_event("stopped", QUIET).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 49));
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 1);
    client.assert_no_event("stopped", QUIET).await;

    let trace = client
        .request_ok("stackTrace", json!({"threadId": 1}))
        .await;
    assert_eq!(trace["stackFrames"][0]["line"], 50);

    client.disconnect().await;
}

#[tokio::test]
async fn contexts_pause_and_resume_independently() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 10));
    backend.pause("_client", MockSnapshot::at("debug/client.lua", 20));
    let mut stopped = vec![
        client.event("stopped").await["body"]["threadId"].as_i64().unwrap(),
        client.event("stopped").await["body"]["threadId"].as_i64().unwrap(),
    ];
    stopped.sort();
    assert_eq!(stopped, vec![1, 2]);

    client.request_ok("continue", json!({"threadId": 2})).await;
    assert_eq!(
        backend.resume_mode_calls("_client"),
        vec![ResumeMode::Resume, ResumeMode::Resume]
    );
    assert_eq!(backend.resume_mode_calls("_server"), vec![ResumeMode::Resume]);
    assert_eq!(backend.resume_mode("_server"), Some(ResumeMode::Paused));
    client.assert_no_event("stopped", QUIET).await;

    let trace = client
        .request_ok("stackTrace", json!({"threadId": 1}))
        .await;
    assert_eq!(trace["stackFrames"][0]["line"], 11);

    client.disconnect().await;
}

#[tokio::test]
async fn paused_contexts_are_not_polled() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 1));
    client.event("stopped").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let before = backend.resume_polls("_server");
    tokio::time::sleep(QUIET).await;
    assert_eq!(backend.resume_polls("_server"), before);
    assert!(backend.resume_polls("_client") > 0);

    client.disconnect().await;
}

#[tokio::test]
async fn step_commands_map_to_resume_modes() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 1));
    client.event("stopped").await;

    let body = client.request_ok("next", json!({"threadId": 1})).await;
    assert_eq!(body, serde_json::Value::Null);
    assert_eq!(backend.resume_mode("_server"), Some(ResumeMode::StepOver));

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 2));
    client.event("stopped").await;

    client.request_ok("stepIn", json!({"threadId": 1})).await;
    assert_eq!(
        backend.resume_mode_calls("_server"),
        vec![ResumeMode::Resume, ResumeMode::StepOver, ResumeMode::StepInto]
    );

    client.disconnect().await;
}

#[tokio::test]
async fn stack_trace_reports_one_frame_at_the_paused_line() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let empty = client
        .request_ok("stackTrace", json!({"threadId": 1}))
        .await;
    assert_eq!(empty["stackFrames"], json!([]));

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 41));
    client.event("stopped").await;

    let trace = client
        .request_ok("stackTrace", json!({"threadId": 1}))
        .await;
    assert_eq!(trace["totalFrames"], 1);
    assert_eq!(
        trace["stackFrames"][0],
        json!({
            "id": 0,
            "name": "Frame 0",
            "source": {"name": "server.lua", "path": SERVER_LUA},
            "line": 42,
            "column": 1,
        })
    );

    client.disconnect().await;
}

#[tokio::test]
async fn unknown_threads_are_rejected() {
    let (_backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let response = client.request("stackTrace", json!({"threadId": 7})).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "unknown threadId 7");

    let response = client.request("continue", json!({"threadId": 9})).await;
    assert_eq!(response["success"], false);

    client.disconnect().await;
}

#[tokio::test]
async fn failed_resume_is_reported_and_context_stays_pollable() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", 3));
    client.event("stopped").await;

    backend.set_unavailable(true);
    let response = client.request("continue", json!({"threadId": 1})).await;
    assert_eq!(response["success"], false);
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .starts_with("failed to set resume mode"),
        "{response}"
    );
    backend.set_unavailable(false);

    // The backend never left the paused state, so the next successful poll reports it again.
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 1);

    client.disconnect().await;
}

#[tokio::test]
async fn backend_outage_does_not_stop_polling() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.set_unavailable(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend.set_unavailable(false);

    backend.pause("_client", MockSnapshot::at("debug/client.lua", 5));
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 2);

    wait_until("polling resumed", || backend.resume_polls("_server") > 0).await;
    client.disconnect().await;
}

#[tokio::test]
async fn extreme_backend_lines_do_not_end_the_session() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    backend.pause("_server", MockSnapshot::at("debug/server.lua", i64::MAX));
    client.event("stopped").await;

    let trace = client
        .request_ok("stackTrace", json!({"threadId": 1}))
        .await;
    assert_eq!(trace["stackFrames"][0]["line"], i64::MAX);

    client.request_ok("threads", json!({})).await;
    client.disconnect().await;
}
