//! WebSocket observer adapter integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use futures::SinkExt;
use serde_json::{Value, json};
use superagent_agent::Orchestrator;
use superagent_types::ConversationId;
use tokio::sync::Notify;

async fn wait_subscribers(orch: &Orchestrator, id: &str, expected: usize) -> Result<()> {
    let id = ConversationId::parse(id)?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while orch.subscriber_count(&id) != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

fn assert_gap_free(events: &[Value]) {
    let first = events[0]["seq"].as_u64().unwrap_or_default();
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["seq"].as_u64(), Some(first + i as u64), "gap at {i}: {events:?}");
    }
}

#[tokio::test]
async fn test_ping_and_parse_errors() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;
    let mut ws = server.connect_ws().await?;

    send_json(&mut ws, json!({"type": "ping"})).await?;
    assert_eq!(recv_json(&mut ws).await?["type"], "pong");

    ws.send(tokio_tungstenite::tungstenite::Message::Text("not json".into()))
        .await?;
    let msg = recv_json(&mut ws).await?;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["code"], "parse_error");

    send_json(&mut ws, json!({"type": "subscribe", "conversation_id": " "})).await?;
    assert_eq!(recv_json(&mut ws).await?["code"], "invalid_conversation");
    Ok(())
}

#[tokio::test]
async fn test_auth_required_before_subscribe() -> Result<()> {
    let server = TestServer::start_with_auth(QuickEngine).await?;
    let mut ws = server.connect_ws().await?;

    send_json(&mut ws, json!({"type": "subscribe", "conversation_id": "c1"})).await?;
    let msg = recv_json(&mut ws).await?;
    assert_eq!(msg["code"], "unauthorized");

    send_json(&mut ws, json!({"type": "auth", "token": "nope"})).await?;
    let msg = recv_json(&mut ws).await?;
    assert_eq!(msg["type"], "auth_result");
    assert_eq!(msg["success"], false);

    send_json(&mut ws, json!({"type": "auth", "token": "test-token"})).await?;
    assert_eq!(recv_json(&mut ws).await?["success"], true);

    send_json(&mut ws, json!({"type": "subscribe", "conversation_id": "c1"})).await?;
    assert_eq!(recv_json(&mut ws).await?["type"], "subscribed");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_connections_receive_identical_streams() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;
    let mut first = server.connect_ws().await?;
    let mut second = server.connect_ws().await?;

    for ws in [&mut first, &mut second] {
        send_json(ws, json!({"type": "subscribe", "conversation_id": "c1"})).await?;
        assert_eq!(recv_json(ws).await?["type"], "subscribed");
    }
    wait_subscribers(&server.orchestrator, "c1", 2).await?;

    let resp = server
        .post("/api/v1/conversations/c1/runs")
        .json(&json!({"query": "rust"}))
        .send()
        .await?;
    assert_eq!(resp.status(), 202);

    let a = events_until_terminal(&mut first).await?;
    let b = events_until_terminal(&mut second).await?;
    assert_eq!(a, b);
    assert_eq!(a[0]["seq"], 1);
    assert_gap_free(&a);
    let last = a.last().cloned().unwrap_or_default();
    assert_eq!(last["type"], "message");
    assert_eq!(last["content"], "answer to rust");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_over_ws_auto_subscribes() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;
    let mut ws = server.connect_ws().await?;

    send_json(
        &mut ws,
        json!({"type": "start", "conversation_id": "c1", "query": "hi"}),
    )
    .await?;
    assert_eq!(recv_json(&mut ws).await?["type"], "subscribed");

    let mut events = Vec::new();
    let mut run_started = None;
    loop {
        let msg = recv_json(&mut ws).await?;
        match msg["type"].as_str() {
            Some("run_started") => run_started = Some(msg["run_id"].clone()),
            Some("event") => {
                let event = msg["event"].clone();
                let done = event["type"] == "message" && event["partial"] == false;
                events.push(event);
                if done {
                    break;
                }
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    if run_started.is_none() {
        run_started = Some(recv_type(&mut ws, "run_started").await?["run_id"].clone());
    }

    assert_eq!(events[0]["seq"], 1);
    assert_gap_free(&events);
    assert!(events.iter().all(|e| Some(&e["run_id"]) == run_started.as_ref()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_and_conflict_over_ws() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(GatedEngine { gate }).await?;
    let mut ws = server.connect_ws().await?;

    send_json(&mut ws, json!({"type": "start", "conversation_id": "c1", "query": "a"})).await?;
    recv_type(&mut ws, "run_started").await?;

    send_json(&mut ws, json!({"type": "start", "conversation_id": "c1", "query": "b"})).await?;
    let err = recv_type(&mut ws, "error").await?;
    assert_eq!(err["code"], "already_running");

    send_json(&mut ws, json!({"type": "cancel", "conversation_id": "c1"})).await?;
    let ack = recv_type(&mut ws, "cancel_requested").await?;
    assert_eq!(ack["cancelled"], true);

    let events = events_until_terminal(&mut ws).await?;
    assert_eq!(events.last().map(|e| e["type"].clone()), Some(json!("cancelled")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_unsubscribes_everything() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;
    let mut ws = server.connect_ws().await?;

    for id in ["c1", "c2"] {
        send_json(&mut ws, json!({"type": "subscribe", "conversation_id": id})).await?;
        recv_type(&mut ws, "subscribed").await?;
    }
    wait_subscribers(&server.orchestrator, "c1", 1).await?;
    wait_subscribers(&server.orchestrator, "c2", 1).await?;

    ws.close(None).await?;
    drop(ws);

    wait_subscribers(&server.orchestrator, "c1", 0).await?;
    wait_subscribers(&server.orchestrator, "c2", 0).await?;
    assert_eq!(server.orchestrator.conversation_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_twice() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;
    let mut ws = server.connect_ws().await?;

    send_json(&mut ws, json!({"type": "subscribe", "conversation_id": "c1"})).await?;
    recv_type(&mut ws, "subscribed").await?;

    send_json(&mut ws, json!({"type": "unsubscribe", "conversation_id": "c1"})).await?;
    assert_eq!(recv_type(&mut ws, "unsubscribed").await?["removed"], true);
    send_json(&mut ws, json!({"type": "unsubscribe", "conversation_id": "c1"})).await?;
    assert_eq!(recv_type(&mut ws, "unsubscribed").await?["removed"], false);
    assert_eq!(
        server.orchestrator.subscriber_count(&ConversationId::parse("c1")?),
        0
    );
    Ok(())
}

#[tokio::test]
async fn test_idle_connection_closed() -> Result<()> {
    let server = TestServer::start_with(QuickEngine, None, |config| {
        config.with_ws_idle_timeout(Duration::from_millis(100))
    })
    .await?;
    let mut ws = server.connect_ws().await?;

    let msg = recv_json(&mut ws).await?;
    assert_eq!(msg["code"], "idle_timeout");
    assert!(recv_json(&mut ws).await.is_err());
    Ok(())
}
