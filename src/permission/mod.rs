//! Permission gating for sensitive worker capabilities (gated variant).
//!
//! A gated worker's subprocess suspends when it needs a capability decision
//! and asks over a per-worker Unix socket; the request surfaces through the
//! registry's `wait` call, and `approve_permission` resolves it.

pub mod gate;
pub mod socket;

pub use gate::{PermissionDecision, PermissionGate, PermissionRequest};
pub use socket::{PermissionListener, PermissionWireResponse, SOCKET_PATH_ENV, WORKER_ID_ENV};
