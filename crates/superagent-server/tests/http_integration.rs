//! REST API integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::{Value, json};
use superagent_types::ConversationId;
use tokio::sync::Notify;

#[tokio::test]
async fn test_health_is_public() -> Result<()> {
    let server = TestServer::start_with_auth(QuickEngine).await?;

    let resp = server.client.get(format!("{}/health", server.base_url())).send().await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "healthy");

    let resp = server.client.get(format!("{}/version", server.base_url())).send().await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["name"], "superagent-server");
    Ok(())
}

#[tokio::test]
async fn test_api_requires_token_when_configured() -> Result<()> {
    let server = TestServer::start_with_auth(QuickEngine).await?;
    let url = format!("{}/api/v1/runs", server.base_url());

    let resp = server.client.get(&url).send().await?;
    assert_eq!(resp.status(), 401);

    let resp = server.client.get(&url).bearer_auth("wrong").send().await?;
    assert_eq!(resp.status(), 401);

    let resp = server.client.get(&url).header("Authorization", "Basic abc").send().await?;
    assert_eq!(resp.status(), 400);

    let resp = server.get("/api/v1/runs").send().await?;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["total"], 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_lifecycle_over_http() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(GatedEngine { gate: gate.clone() }).await?;

    let resp = server
        .post("/api/v1/conversations/c1/runs")
        .json(&json!({"query": "hello"}))
        .send()
        .await?;
    assert_eq!(resp.status(), 202);
    let started: Value = resp.json().await?;
    assert_eq!(started["conversation_id"], "c1");
    let run_id = started["run_id"].clone();

    // A second start is refused while the first is active.
    let resp = server
        .post("/api/v1/conversations/c1/runs")
        .json(&json!({"query": "again"}))
        .send()
        .await?;
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "already_running");

    let resp = server.get("/api/v1/conversations/c1").send().await?;
    assert_eq!(resp.status(), 200);
    let snapshot: Value = resp.json().await?;
    assert_eq!(snapshot["run_id"], run_id);
    assert_eq!(snapshot["query"], "hello");

    let body: Value = server.get("/api/v1/runs").send().await?.json().await?;
    assert_eq!(body["total"], 1);

    let body: Value = server
        .post("/api/v1/conversations/c1/cancel")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["cancelled"], true);

    let id = ConversationId::parse("c1")?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.orchestrator.is_running(&id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let resp = server.get("/api/v1/conversations/c1").send().await?;
    assert_eq!(resp.status(), 404);

    let body: Value = server
        .post("/api/v1/conversations/c1/cancel")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["cancelled"], false);
    Ok(())
}

#[tokio::test]
async fn test_start_validation() -> Result<()> {
    let server = TestServer::start(QuickEngine).await?;

    let resp = server
        .post("/api/v1/conversations/c1/runs")
        .json(&json!({"query": "   "}))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);

    let resp = server
        .post("/api/v1/conversations/%20/runs")
        .json(&json!({"query": "hi"}))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "bad_request");

    let resp = server
        .post("/api/v1/conversations/c1/runs")
        .json(&json!({"history": []}))
        .send()
        .await?;
    assert!(resp.status().is_client_error());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_cancels_active_runs() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let server = TestServer::start(GatedEngine { gate }).await?;

    for id in ["a", "b"] {
        let resp = server
            .post(&format!("/api/v1/conversations/{id}/runs"))
            .json(&json!({"query": "wait"}))
            .send()
            .await?;
        assert_eq!(resp.status(), 202);
    }

    let orchestrator = server.orchestrator.clone();
    assert_eq!(orchestrator.active_runs().len(), 2);

    server.stop().await?;
    assert!(orchestrator.is_shutting_down());
    assert!(orchestrator.active_runs().is_empty());
    Ok(())
}
