//! Remote agents against a mock JSON-RPC endpoint.

#![cfg(feature = "remote")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arbor::agent::RemoteAgent;
use arbor::config::{ArborConfig, RunConfig};
use arbor::error::ArborError;
use arbor::event::{Event, EventActions};
use arbor::types::{Content, StreamingMode};

use common::*;

fn remote_event(text: &str) -> Value {
    serde_json::to_value(
        Event::new("remote-invocation", "search_service").with_content(Content::model(text)),
    )
    .unwrap()
}

async fn mount_card(server: &MockServer, streaming: bool) {
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "search_service",
            "description": "Searches the docs",
            "capabilities": {"streaming": streaming}
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn send_restamps_remote_events_as_local() {
    let server = MockServer::start().await;
    mount_card(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({"method": "message/send"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"events": [remote_event("found 3 pages")]}
        })))
        .mount(&server)
        .await;

    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("find the install guide").await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].author, "researcher");
    assert_ne!(events[0].invocation_id, "remote-invocation");
    assert_eq!(events[0].text(), "found 3 pages");

    // The card is fetched once across runs.
    harness.send("and the changelog").await;

    let requests = server.received_requests().await.unwrap();
    let calls: Vec<Value> = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["params"]["agent"], "search_service");
    assert_eq!(calls[0]["params"]["contents"][0]["parts"][0]["text"], "find the install guide");
    // Only what the remote side has not seen yet is sent again.
    assert_eq!(calls[1]["params"]["contents"].as_array().unwrap().len(), 1);
    assert_eq!(calls[1]["params"]["contents"][0]["parts"][0]["text"], "and the changelog");
}

#[tokio::test]
async fn stream_forwards_each_sse_item() {
    let server = MockServer::start().await;
    mount_card(&server, true).await;
    let body = [remote_event("searching"), remote_event("done searching")]
        .iter()
        .map(|event| {
            format!(
                "data: {}\n\n",
                json!({"jsonrpc": "2.0", "id": "1", "result": event})
            )
        })
        .collect::<String>();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "message/stream"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let config = RunConfig::builder()
        .streaming_mode(StreamingMode::Sse)
        .build();
    let events = harness.send_content(Content::user("search"), config).await;

    assert_eq!(texts(&events), vec!["searching", "done searching"]);
    assert_eq!(harness.session().await.events.len(), 3);
}

#[tokio::test]
async fn remote_transfers_are_not_honored() {
    let server = MockServer::start().await;
    mount_card(&server, false).await;
    let mut event = Event::new("remote-invocation", "search_service")
        .with_content(Content::model("handing off"));
    event.actions = EventActions {
        transfer_to_agent: Some("elsewhere".into()),
        ..Default::default()
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"events": [event]}
        })))
        .mount(&server)
        .await;

    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("hi").await;
    assert_eq!(events[0].actions.transfer_to_agent, None);
}

#[tokio::test]
async fn rpc_errors_end_with_an_error_event() {
    let server = MockServer::start().await;
    mount_card(&server, false).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32000, "message": "index unavailable"}
        })))
        .mount(&server)
        .await;

    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("hi"), RunConfig::default())).await;

    assert_eq!(results.len(), 2);
    let error_event = results[0].as_ref().unwrap();
    assert_eq!(error_event.author, "researcher");
    assert_eq!(error_event.error_code.as_deref(), Some("NETWORK_ERROR"));
    assert!(matches!(
        &results[1],
        Err(ArborError::Remote { message, .. }) if message.contains("index unavailable")
    ));
}

#[tokio::test]
async fn missing_card_is_a_remote_error() {
    let server = MockServer::start().await;
    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("hi"), RunConfig::default())).await;
    assert!(matches!(results.last(), Some(Err(ArborError::Remote { .. }))));
}

#[tokio::test]
async fn slow_remote_agents_time_out() {
    let server = MockServer::start().await;
    mount_card(&server, false).await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": "1", "result": {"events": []}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let agent = RemoteAgent::builder("researcher")
        .base_url(server.uri())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let config = RunConfig::builder()
        .remote_timeout(Duration::from_millis(50))
        .build();
    let results = collect(harness.stream(Content::user("hi"), config)).await;
    assert!(matches!(results.last(), Some(Err(ArborError::Timeout(50)))));
}

#[test]
fn base_url_can_come_from_config() {
    let config = ArborConfig::new();
    config.set_base_url("remote", "http://agents.internal/".into());
    let agent = RemoteAgent::builder("researcher")
        .config(&config)
        .build()
        .unwrap();
    assert_eq!(agent.base_url(), "http://agents.internal");
}
