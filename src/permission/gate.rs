//! Permission gate — suspend/approve coordination for gated workers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use crate::error::PermissionError;

/// A worker's request to use a sensitive capability.
///
/// Exists only between the moment the worker suspends on the capability
/// check and the moment a decision is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_id: Uuid,
    pub worker_id: Uuid,
    /// Requested capability name.
    pub tool: String,
    /// Capability input payload.
    pub input: serde_json::Value,
}

/// Resolved decision for one request.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub allow: bool,
    /// Echoed input on allow.
    pub updated_input: Option<serde_json::Value>,
    /// Explanation on deny.
    pub message: Option<String>,
}

struct PendingPermission {
    request: PermissionRequest,
    decide_tx: oneshot::Sender<PermissionDecision>,
}

/// Tracks pending permission requests and applies decisions exactly once.
///
/// No timeout is imposed here: a request left pending keeps its owning
/// worker Active until the runner's global timeout fires.
#[derive(Default)]
pub struct PermissionGate {
    pending: Mutex<HashMap<Uuid, PendingPermission>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; the returned receiver resolves when a decision
    /// arrives. Dropping the gate entry cancels the receiver.
    pub async fn submit(
        &self,
        request: PermissionRequest,
    ) -> oneshot::Receiver<PermissionDecision> {
        let (decide_tx, decide_rx) = oneshot::channel();
        let request_id = request.request_id;
        self.pending.lock().await.insert(
            request_id,
            PendingPermission {
                request,
                decide_tx,
            },
        );
        decide_rx
    }

    /// Apply a decision. Fails with NotFound when the request is unknown or
    /// was already decided.
    pub async fn decide(
        &self,
        request_id: Uuid,
        allow: bool,
        reason: Option<String>,
    ) -> Result<(), PermissionError> {
        let pending = self
            .pending
            .lock()
            .await
            .remove(&request_id)
            .ok_or(PermissionError::NotFound { request_id })?;

        let decision = if allow {
            PermissionDecision {
                allow: true,
                updated_input: Some(pending.request.input.clone()),
                message: None,
            }
        } else {
            PermissionDecision {
                allow: false,
                updated_input: None,
                message: Some(reason.unwrap_or_else(|| "Denied by the controlling session".to_string())),
            }
        };

        // The listener may already be gone if the worker died; the decision
        // is still consumed exactly once either way.
        if pending.decide_tx.send(decision).is_err() {
            tracing::warn!(%request_id, "permission decision had no listener");
        }
        Ok(())
    }

    /// Whether a request is still awaiting a decision.
    pub async fn is_pending(&self, request_id: Uuid) -> bool {
        self.pending.lock().await.contains_key(&request_id)
    }

    /// Drop every pending request owned by a terminated worker.
    pub async fn drop_worker(&self, worker_id: Uuid) {
        self.pending
            .lock()
            .await
            .retain(|_, p| p.request.worker_id != worker_id);
    }
}
