//! End-to-end session tests against scripted fake agents.

#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use abx_core::config::{AgentConfig, ProtocolMode};
use abx_core::error::BridgeErrorKind;
use abx_core::session::{Session, SessionState};

fn install_agent(work_dir: &Path, script: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = work_dir.join("bin").join("agent");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

fn test_config(protocol: ProtocolMode) -> AgentConfig {
    AgentConfig {
        protocol,
        launch_settle_ms: 0,
        stop_grace_ms: 500,
        ..AgentConfig::default()
    }
}

#[tokio::test]
async fn line_agent_streams_chunks_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(
        dir.path(),
        r#"#!/bin/sh
while read -r line; do
  printf '%s\n' '{"chunk":"He"}' '{"chunk":"llo"}' '{"done":true}'
done
"#,
    );

    let session = Session::new(dir.path(), test_config(ProtocolMode::Line));
    let mut chunks = Vec::new();
    let text = session
        .execute("hi", |chunk| chunks.push(chunk.to_string()))
        .await
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(chunks, vec!["He", "llo"]);
    assert_eq!(session.state(), SessionState::Ready);

    // The process is reused across tasks.
    let text = session.execute("again", |_| {}).await.unwrap();
    assert_eq!(text, "Hello");

    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);
    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn agent_error_surfaces_without_losing_chunks() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(
        dir.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"chunk":"part"}' '{"error":"task failed"}' '{"done":true}'
"#,
    );

    let session = Session::new(dir.path(), test_config(ProtocolMode::Line));
    let mut out = String::new();
    let err = session
        .execute("hi", |chunk| out.push_str(chunk))
        .await
        .unwrap_err();

    assert_eq!(err.kind, BridgeErrorKind::Rpc);
    assert_eq!(err.message, "task failed");
    assert_eq!(out, "part");
    session.stop().await;
}

#[tokio::test]
async fn dead_agent_is_relaunched_on_the_next_task() {
    let dir = tempfile::tempdir().unwrap();
    // Exits after a single response; the session must restart it.
    install_agent(
        dir.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"chunk":"once"}' '{"done":true}'
"#,
    );

    let session = Session::new(dir.path(), test_config(ProtocolMode::Line));
    assert_eq!(session.execute("a", |_| {}).await.unwrap(), "once");

    // Let the old process exit before the next task checks liveness.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.execute("b", |_| {}).await.unwrap(), "once");
    session.stop().await;
}

#[tokio::test]
async fn cancellation_stops_the_session_and_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(
        dir.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"chunk":"part"}'
exec sleep 60
"#,
    );

    let session = Arc::new(Session::new(dir.path(), test_config(ProtocolMode::Line)));
    let out = Arc::new(Mutex::new(String::new()));

    let task = {
        let session = Arc::clone(&session);
        let out = Arc::clone(&out);
        tokio::spawn(async move {
            session
                .execute("hi", |chunk| out.lock().unwrap().push_str(chunk))
                .await
        })
    };

    // Wait for the first chunk to land before canceling.
    for _ in 0..100 {
        if !out.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(out.lock().unwrap().as_str(), "part");
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn cancel_reaches_the_executing_task_even_with_a_caller_queued() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(
        dir.path(),
        r#"#!/bin/sh
read -r line
printf '%s\n' '{"chunk":"part"}'
exec sleep 60
"#,
    );

    let session = Arc::new(Session::new(dir.path(), test_config(ProtocolMode::Line)));
    let out_a = Arc::new(Mutex::new(String::new()));
    let out_b = Arc::new(Mutex::new(String::new()));

    let task_a = {
        let session = Arc::clone(&session);
        let out = Arc::clone(&out_a);
        tokio::spawn(async move {
            session
                .execute("first", |chunk| out.lock().unwrap().push_str(chunk))
                .await
        })
    };

    for _ in 0..100 {
        if !out_a.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A second caller queues behind the in-flight task.
    let task_b = {
        let session = Arc::clone(&session);
        let out = Arc::clone(&out_b);
        tokio::spawn(async move {
            session
                .execute("second", |chunk| out.lock().unwrap().push_str(chunk))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Cancel must reach the task that is executing, not the queued one.
    session.cancel();
    let err = task_a.await.unwrap().unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(out_a.lock().unwrap().as_str(), "part");

    // The queued caller proceeds on a fresh process and its own token.
    for _ in 0..500 {
        if !out_b.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(out_b.lock().unwrap().as_str(), "part");
    session.cancel();
    let err = task_b.await.unwrap().unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(session.state(), SessionState::Stopped);
}

const RPC_AGENT: &str = r#"#!/bin/sh
while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-agent"}}}\n' "$id"
      ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"Hello"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"#;

#[tokio::test]
async fn rpc_agent_executes_tasks_through_its_task_tool() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(dir.path(), RPC_AGENT);

    let session = Session::new(dir.path(), test_config(ProtocolMode::Rpc));
    let mut out = String::new();
    let text = session
        .execute("hi", |chunk| out.push_str(chunk))
        .await
        .unwrap();

    assert_eq!(text, "Hello");
    assert_eq!(out, "Hello");
    assert_eq!(session.state(), SessionState::Ready);

    // Correlation ids keep working across tasks.
    assert_eq!(session.execute("again", |_| {}).await.unwrap(), "Hello");
    session.stop().await;
}

#[tokio::test]
async fn rpc_agent_death_mid_call_is_a_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    // Answers the handshake, then exits on the first tool call.
    install_agent(
        dir.path(),
        r#"#!/bin/sh
read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n' "$id"
read -r line
exit 1
"#,
    );

    let session = Session::new(dir.path(), test_config(ProtocolMode::Rpc));
    let err = session.execute("hi", |_| {}).await.unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::Transport);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn disposed_session_rejects_new_work() {
    let dir = tempfile::tempdir().unwrap();
    install_agent(
        dir.path(),
        r#"#!/bin/sh
while read -r line; do printf '%s\n' '{"done":true}'; done
"#,
    );

    let session = Session::new(dir.path(), test_config(ProtocolMode::Line));
    session.execute("hi", |_| {}).await.unwrap();

    session.dispose().await;
    assert_eq!(session.state(), SessionState::Disposed);

    let err = session.execute("hi", |_| {}).await.unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::Unavailable);
}
