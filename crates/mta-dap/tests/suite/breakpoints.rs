use std::time::Duration;

use mta_config::ContextLayout;
use mta_debug_api::mock::{BreakpointOp, MockBackend};
use serde_json::json;

use crate::harness::{
    launched, publish_resource, test_config, wait_until, DapClient, SERVER_LUA, SERVER_PATH,
};

fn sorted(mut breakpoints: Vec<(String, i64)>) -> Vec<(String, i64)> {
    breakpoints.sort();
    breakpoints
}

fn bp(file: &str, line: i64) -> (String, i64) {
    (file.to_owned(), line)
}

#[tokio::test]
async fn set_breakpoints_maps_paths_and_lines_to_the_backend() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let body = client
        .request_ok(
            "setBreakpoints",
            json!({
                "source": {"path": SERVER_LUA},
                "breakpoints": [{"line": 10}, {"line": 20}],
            }),
        )
        .await;
    assert_eq!(
        body["breakpoints"],
        json!([
            {"id": 1000, "verified": true, "line": 10, "source": {"path": SERVER_LUA}},
            {"id": 1001, "verified": true, "line": 20, "source": {"path": SERVER_LUA}},
        ])
    );

    wait_until("breakpoints reached the backend", || {
        sorted(backend.breakpoints()) == vec![bp("server.lua", 9), bp("server.lua", 19)]
    })
    .await;

    let ops = backend.breakpoint_ops();
    let last_clear = ops
        .iter()
        .rposition(|op| *op == BreakpointOp::Clear)
        .expect("sync clears before setting");
    assert_eq!(
        ops[last_clear + 1..].to_vec(),
        vec![
            BreakpointOp::Set {
                file: "server.lua".to_owned(),
                line: 9
            },
            BreakpointOp::Set {
                file: "server.lua".to_owned(),
                line: 19
            },
        ]
    );

    client.disconnect().await;
}

#[tokio::test]
async fn breakpoints_set_before_launch_are_sent_after_attach() {
    let backend = MockBackend::spawn().await.unwrap();
    let mut client = DapClient::start(test_config(&backend, ContextLayout::ServerAndClient));
    client.initialize().await;

    let body = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "breakpoints": [{"line": 5}]}),
        )
        .await;
    assert_eq!(body["breakpoints"][0]["id"], 1000);
    assert_eq!(body["breakpoints"][0]["verified"], true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.clear_breakpoint_calls(), 0);
    assert!(backend.breakpoints().is_empty());

    publish_resource(&backend, ContextLayout::ServerAndClient);
    client
        .request_ok("launch", json!({"serverpath": SERVER_PATH}))
        .await;

    wait_until("recorded breakpoints reached the backend", || {
        backend.breakpoints() == vec![bp("server.lua", 4)]
    })
    .await;

    client.disconnect().await;
}

#[tokio::test]
async fn replacing_one_file_keeps_the_others() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;
    let client_lua = "C:/mta/mods/deathmatch/resources/debug/client.lua";

    let first = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "breakpoints": [{"line": 1}]}),
        )
        .await;
    let second = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": client_lua}, "breakpoints": [{"line": 2}]}),
        )
        .await;
    let third = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "breakpoints": [{"line": 3}]}),
        )
        .await;
    assert_eq!(first["breakpoints"][0]["id"], 1000);
    assert_eq!(second["breakpoints"][0]["id"], 1001);
    assert_eq!(third["breakpoints"][0]["id"], 1002);

    wait_until("backend holds the latest breakpoints of both files", || {
        sorted(backend.breakpoints()) == vec![bp("client.lua", 1), bp("server.lua", 2)]
    })
    .await;

    let cleared = client
        .request_ok("setBreakpoints", json!({"source": {"path": SERVER_LUA}, "breakpoints": []}))
        .await;
    assert_eq!(cleared["breakpoints"], json!([]));
    wait_until("server.lua breakpoints were removed", || {
        backend.breakpoints() == vec![bp("client.lua", 1)]
    })
    .await;

    client.disconnect().await;
}

#[tokio::test]
async fn legacy_lines_field_is_accepted() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let body = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "lines": [7, 8]}),
        )
        .await;
    assert_eq!(body["breakpoints"].as_array().unwrap().len(), 2);
    assert_eq!(body["breakpoints"][1]["line"], 8);

    wait_until("legacy breakpoints reached the backend", || {
        sorted(backend.breakpoints()) == vec![bp("server.lua", 6), bp("server.lua", 7)]
    })
    .await;

    client.disconnect().await;
}

#[tokio::test]
async fn zero_based_clients_send_lines_verbatim() {
    let backend = MockBackend::spawn().await.unwrap();
    publish_resource(&backend, ContextLayout::ServerAndClient);
    let mut client = DapClient::start(test_config(&backend, ContextLayout::ServerAndClient));
    client
        .request_ok("initialize", json!({"linesStartAt1": false}))
        .await;
    client
        .request_ok("launch", json!({"serverpath": SERVER_PATH}))
        .await;

    client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "breakpoints": [{"line": 10}]}),
        )
        .await;
    wait_until("breakpoint reached the backend", || {
        backend.breakpoints() == vec![bp("server.lua", 10)]
    })
    .await;

    client.disconnect().await;
}

#[tokio::test]
async fn set_breakpoints_requires_a_source_path() {
    let backend = MockBackend::spawn().await.unwrap();
    let mut client = DapClient::start(test_config(&backend, ContextLayout::ServerAndClient));
    client.initialize().await;

    let response = client
        .request("setBreakpoints", json!({"source": {}, "breakpoints": [{"line": 1}]}))
        .await;
    assert_eq!(response["success"], false);
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .contains("source.path is required"),
        "{response}"
    );

    client.disconnect().await;
}

#[tokio::test]
async fn extreme_editor_lines_are_clamped() {
    let (backend, mut client) = launched(ContextLayout::ServerAndClient).await;

    let body = client
        .request_ok(
            "setBreakpoints",
            json!({"source": {"path": SERVER_LUA}, "breakpoints": [{"line": i64::MIN}]}),
        )
        .await;
    assert_eq!(body["breakpoints"][0]["line"], i64::MIN);

    wait_until("clamped breakpoint reached the backend", || {
        backend.breakpoints() == vec![bp("server.lua", i64::MIN)]
    })
    .await;

    client.request_ok("threads", json!({})).await;
    client.disconnect().await;
}
