use std::time::Duration;

use mta_config::ContextLayout;
use mta_debug_api::mock::MockBackend;
use serde_json::json;

use crate::harness::{launched, test_config, DapClient};

#[tokio::test]
async fn disconnect_terminates_and_stops_polling() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let seq = client.send("disconnect", json!({})).await;
    let response = client.response(seq).await;
    assert_eq!(response["success"], true);
    client.event("terminated").await;

    tokio::time::timeout(Duration::from_secs(5), &mut client.server_task)
        .await
        .expect("adapter stops after disconnect")
        .unwrap()
        .unwrap();

    let polls = backend.resume_polls("_server");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.resume_polls("_server"), polls);
}

#[tokio::test]
async fn disconnect_before_attach_stops_the_launch_retries() {
    let backend = MockBackend::spawn().await.unwrap();
    let mut client = DapClient::start(test_config(&backend, ContextLayout::ServerAndClient));
    client.initialize().await;
    client
        .send("launch", json!({"serverpath": "C:/mta"}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.disconnect().await;
    let requests = backend.info_requests("_server");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.info_requests("_server"), requests);
}

#[tokio::test]
async fn terminate_keeps_the_request_loop_alive() {
    let (_backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    client.request_ok("terminate", json!({})).await;
    client.event("terminated").await;

    client.request_ok("threads", json!({})).await;
    client.disconnect().await;
}

#[tokio::test]
async fn closing_the_stream_ends_the_session() {
    let backend = MockBackend::spawn().await.unwrap();
    let client = DapClient::start(test_config(&backend, ContextLayout::ServerAndClient));
    let server_task = client.close();

    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("adapter stops at EOF")
        .unwrap()
        .unwrap();
}
