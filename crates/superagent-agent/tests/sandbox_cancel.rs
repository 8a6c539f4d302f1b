//! Cancelling a run while a sandboxed process is running leaves nothing
//! behind.

#![cfg(target_os = "linux")]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use common::*;
use superagent_agent::ToolRegistry;
use superagent_agent::tools::CodeExecutionTool;
use superagent_sandbox::{SandboxConfig, SandboxExecutor};
use superagent_types::EventKind;
use tempfile::TempDir;

/// Zombies count as gone: they are waiting on a reaper we do not own.
fn is_alive(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state != "Z")
        })
        .unwrap_or(false)
}

async fn eventually_dead(pid: u32) -> bool {
    for _ in 0..50 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn read_pid(path: &Path) -> Result<u32> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(text) = std::fs::read_to_string(path)
            && let Ok(pid) = text.trim().parse()
        {
            return Ok(pid);
        }
        anyhow::ensure!(Instant::now() < deadline, "{} never written", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_kills_sandboxed_process_group() -> Result<()> {
    let dir = TempDir::new()?;
    let shell_pid = dir.path().join("shell.pid");
    let child_pid = dir.path().join("child.pid");
    let script = format!(
        "echo $$ > {shell}\nsleep 300 &\necho $! > {child}\necho started\nwait\n",
        shell = shell_pid.display(),
        child = child_pid.display(),
    );

    let executor = Arc::new(SandboxExecutor::new(SandboxConfig::default()));
    let orch = orchestrator_with_tools(ScriptEngine { script }, move || {
        let mut registry = ToolRegistry::new();
        registry.register(CodeExecutionTool::new(Arc::clone(&executor)));
        registry
    });
    let id = conv("c1");
    let mut rx = observe(&orch, &id);
    orch.start(id.clone(), "run the script", Vec::new())?;

    let shell = read_pid(&shell_pid).await.context("shell pid")?;
    let child = read_pid(&child_pid).await.context("child pid")?;
    assert!(is_alive(shell));
    assert!(is_alive(child));

    let started = Instant::now();
    assert!(orch.cancel(&id));
    let events = until_terminal(&mut rx).await?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(events.last().map(|e| &e.kind), Some(EventKind::Cancelled { .. })));

    // The sandbox reaps its direct child before the run reports cancelled.
    assert!(!is_alive(shell), "shell {shell} outlived the run");
    assert!(eventually_dead(child).await, "background child {child} leaked");
    wait_idle(&orch, &id).await?;
    Ok(())
}
