//! Per-worker Unix-socket channel for permission requests.
//!
//! Protocol: newline-delimited JSON over a Unix domain socket. The worker
//! subprocess writes `PermissionRequest` lines and blocks reading the
//! decision line for each; the socket path and worker id reach the
//! subprocess through environment variables.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::permission::gate::{PermissionGate, PermissionRequest};
use crate::registry::RegistryEvent;

/// Environment variable carrying the socket path into the subprocess.
pub const SOCKET_PATH_ENV: &str = "PERM_SOCKET_PATH";
/// Environment variable carrying the worker id into the subprocess.
pub const WORKER_ID_ENV: &str = "WORKER_ID";

/// Decision line written back to the worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionWireResponse {
    pub request_id: Uuid,
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Bound socket for one gated worker invocation.
pub struct PermissionListener {
    worker_id: Uuid,
    socket_path: PathBuf,
    listener: UnixListener,
}

impl PermissionListener {
    /// Bind the worker's socket with owner-only permissions, replacing any
    /// stale socket file from a previous run.
    pub fn bind(socket_dir: &Path, worker_id: Uuid) -> std::io::Result<Self> {
        std::fs::create_dir_all(socket_dir)?;
        let socket_path = socket_dir.join(format!("worker-{worker_id}.sock"));
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        Ok(Self {
            worker_id,
            socket_path,
            listener,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Environment the subprocess needs to connect back.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            (
                SOCKET_PATH_ENV.to_string(),
                self.socket_path.display().to_string(),
            ),
            (WORKER_ID_ENV.to_string(), self.worker_id.to_string()),
        ]
    }

    /// Serve permission requests until the task is aborted.
    ///
    /// Each parsed request is registered with the gate and surfaced to the
    /// registry's wait channel; the decision line is written back once the
    /// controlling session decides. Requests beyond `max_requests` are
    /// denied outright.
    pub async fn serve(
        self,
        gate: Arc<PermissionGate>,
        events: mpsc::UnboundedSender<RegistryEvent>,
        max_requests: usize,
    ) {
        let worker_id = self.worker_id;
        let mut served = 0usize;

        loop {
            let stream = match self.listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(%worker_id, %e, "permission socket accept failed");
                    break;
                }
            };

            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let mut request: PermissionRequest = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(%worker_id, %e, "malformed permission request line");
                        continue;
                    }
                };
                // The socket is per-worker; the id on the wire is not trusted.
                request.worker_id = worker_id;

                let response = if served >= max_requests {
                    tracing::warn!(%worker_id, max_requests, "permission request cap reached");
                    PermissionWireResponse {
                        request_id: request.request_id,
                        allow: false,
                        updated_input: None,
                        message: Some(format!(
                            "Denied: request limit ({max_requests}) reached for this worker"
                        )),
                    }
                } else {
                    served += 1;
                    let request_id = request.request_id;
                    let decide_rx = gate.submit(request.clone()).await;
                    if events.send(RegistryEvent::Permission(request)).is_err() {
                        tracing::debug!(%worker_id, "registry gone, closing permission socket");
                        return;
                    }
                    match decide_rx.await {
                        Ok(decision) => PermissionWireResponse {
                            request_id,
                            allow: decision.allow,
                            updated_input: decision.updated_input,
                            message: decision.message,
                        },
                        // Worker torn down while the request was pending.
                        Err(_) => return,
                    }
                };

                let mut payload = match serde_json::to_vec(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(%worker_id, %e, "failed to encode permission response");
                        continue;
                    }
                };
                payload.push(b'\n');
                if write_half.write_all(&payload).await.is_err() {
                    tracing::debug!(%worker_id, "worker closed permission socket");
                    break;
                }
            }
        }
    }
}

/// Remove a worker's socket file after its task ends.
pub async fn cleanup_socket(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), %e, "failed to remove permission socket");
    }
}
