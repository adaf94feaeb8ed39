//! Gated-variant tests: permission requests over the per-worker socket.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use agent_pool::config::PoolConfig;
use agent_pool::error::{Error, PermissionError, RegistryError};
use agent_pool::permission::{PermissionWireResponse, SOCKET_PATH_ENV, WORKER_ID_ENV};
use agent_pool::registry::{WorkerRegistry, WorkerSpec, WorkerState};
use agent_pool::runner::{WorkerOutcome, WorkerRunner};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

/// Runner standing in for a gated subprocess: connects back over the socket
/// advertised in its environment, asks permission for its prompt as a Bash
/// command, and succeeds or fails with the decision.
struct GatedProbeRunner;

#[async_trait]
impl WorkerRunner for GatedProbeRunner {
    async fn invoke(
        &self,
        spec: &WorkerSpec,
        _resume: Option<&str>,
        env: Vec<(String, String)>,
    ) -> WorkerOutcome {
        let socket_path = env
            .iter()
            .find(|(k, _)| k == SOCKET_PATH_ENV)
            .map(|(_, v)| v.clone())
            .expect("gated invocation carries the socket path");
        assert!(env.iter().any(|(k, _)| k == WORKER_ID_ENV));

        let stream = UnixStream::connect(&socket_path)
            .await
            .expect("connect to permission socket");
        let (read_half, mut write_half) = stream.into_split();

        let request = serde_json::json!({
            "request_id": Uuid::new_v4(),
            // deliberately wrong; the listener must stamp its own worker id
            "worker_id": Uuid::nil(),
            "tool": "Bash",
            "input": {"command": spec.prompt},
        });
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        write_half.write_all(&line).await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let response = lines
            .next_line()
            .await
            .expect("read decision line")
            .expect("decision before EOF");
        let response: PermissionWireResponse = serde_json::from_str(&response).unwrap();

        if response.allow {
            WorkerOutcome::Success {
                result_text: format!("ran: {}", spec.prompt),
                continuation_token: "sess-gated".to_string(),
                cost: Default::default(),
                turn_count: Some(1),
            }
        } else {
            WorkerOutcome::exception(format!(
                "permission denied: {}",
                response.message.unwrap_or_default()
            ))
        }
    }
}

struct Harness {
    registry: WorkerRegistry,
    socket_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let socket_dir = dir.path().join("sockets");
    let config = PoolConfig {
        permission_gate: true,
        output_dir: dir.path().join("outputs"),
        socket_dir: socket_dir.clone(),
        ..Default::default()
    };
    Harness {
        registry: WorkerRegistry::with_runner(config, Arc::new(GatedProbeRunner)).unwrap(),
        socket_dir,
        _dir: dir,
    }
}

async fn wait_bounded(registry: &WorkerRegistry) -> agent_pool::registry::WaitReport {
    tokio::time::timeout(Duration::from_secs(10), registry.wait())
        .await
        .expect("wait stalled")
        .expect("wait failed")
}

#[tokio::test]
async fn approve_unblocks_the_worker() {
    let h = harness();
    let id = h
        .registry
        .spawn(WorkerSpec::new("gated", "ls /tmp"))
        .await
        .unwrap();

    // the request surfaces before any completion
    let report = wait_bounded(&h.registry).await;
    assert!(report.completed.is_empty());
    assert_eq!(report.pending_permissions.len(), 1);
    let request = &report.pending_permissions[0];
    assert_eq!(request.worker_id, id);
    assert_eq!(request.tool, "Bash");
    assert_eq!(request.input["command"], "ls /tmp");

    h.registry
        .approve_permission(request.request_id, true, None)
        .await
        .unwrap();

    let report = wait_bounded(&h.registry).await;
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].state, WorkerState::Completed);
    assert!(report.completed[0].outcome.is_success());
}

#[tokio::test]
async fn deny_fails_the_worker_with_the_reason() {
    let h = harness();
    let id = h
        .registry
        .spawn(WorkerSpec::new("gated", "rm -rf /"))
        .await
        .unwrap();

    let report = wait_bounded(&h.registry).await;
    let request = &report.pending_permissions[0];
    h.registry
        .approve_permission(request.request_id, false, Some("not on my watch".to_string()))
        .await
        .unwrap();

    let report = wait_bounded(&h.registry).await;
    assert_eq!(report.completed[0].worker_id, id);
    assert!(matches!(
        &report.completed[0].outcome,
        WorkerOutcome::Failure { exception: Some(e), .. } if e.contains("not on my watch")
    ));
    assert_eq!(
        h.registry.record(id).await.unwrap().state,
        WorkerState::Failed
    );
}

#[tokio::test]
async fn second_decision_on_the_same_request_is_rejected() {
    let h = harness();
    h.registry
        .spawn(WorkerSpec::new("gated", "echo hi"))
        .await
        .unwrap();

    let report = wait_bounded(&h.registry).await;
    let request_id = report.pending_permissions[0].request_id;

    h.registry
        .approve_permission(request_id, true, None)
        .await
        .unwrap();
    assert!(matches!(
        h.registry
            .approve_permission(request_id, false, None)
            .await
            .unwrap_err(),
        Error::Permission(PermissionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_request_id_is_rejected() {
    let h = harness();
    assert!(matches!(
        h.registry
            .approve_permission(Uuid::new_v4(), true, None)
            .await
            .unwrap_err(),
        Error::Permission(PermissionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn peek_stays_responsive_while_a_request_is_pending() {
    let h = harness();
    let id = h
        .registry
        .spawn(WorkerSpec::new("gated", "echo hi"))
        .await
        .unwrap();

    // let the request reach the event channel without an intervening wait
    tokio::time::sleep(Duration::from_millis(200)).await;

    // peek must return promptly even with an undecided request queued
    let err = tokio::time::timeout(Duration::from_secs(2), h.registry.peek(id))
        .await
        .expect("peek did not return")
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Registry(RegistryError::InvalidState {
            state: WorkerState::Active,
            ..
        })
    ));

    // the peek flush did not swallow the pending request
    let report = wait_bounded(&h.registry).await;
    assert_eq!(report.pending_permissions.len(), 1);
    assert_eq!(report.pending_permissions[0].worker_id, id);

    h.registry
        .approve_permission(report.pending_permissions[0].request_id, true, None)
        .await
        .unwrap();
    let report = wait_bounded(&h.registry).await;
    assert!(report.completed[0].outcome.is_success());
}

#[tokio::test]
async fn socket_is_owner_only_and_removed_after_terminal() {
    let h = harness();
    let id = h
        .registry
        .spawn(WorkerSpec::new("gated", "echo hi"))
        .await
        .unwrap();
    let socket_path = h.socket_dir.join(format!("worker-{id}.sock"));

    let report = wait_bounded(&h.registry).await;
    assert!(socket_path.exists());
    let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    h.registry
        .approve_permission(report.pending_permissions[0].request_id, true, None)
        .await
        .unwrap();
    wait_bounded(&h.registry).await;

    assert!(!socket_path.exists(), "socket not cleaned up after terminal");
}
