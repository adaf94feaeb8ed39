//! Worker state machine and registry records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::registry::spec::WorkerSpec;
use crate::runner::outcome::WorkerOutcome;

/// State of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// An invocation is currently executing.
    Active,
    /// The last invocation succeeded; the worker is eligible for resume.
    Completed,
    /// The last invocation failed. Terminal.
    Failed,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Active, Completed) | (Active, Failed) |
            // Resume is the only way back to Active
            (Completed, Active)
        )
    }

    /// Check if this is a terminal state for the record.
    ///
    /// Completed workers can still be resumed; only Failed is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Mutable registry entry for one worker identity.
///
/// Exactly one record exists per identity for the life of the registry;
/// identities are never reused and records are never evicted.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    /// Stable identity, minted at spawn.
    pub id: Uuid,
    /// Spec of the current (or last) invocation.
    pub spec: WorkerSpec,
    /// Current state.
    pub state: WorkerState,
    /// Terminal outcome of the last invocation; absent while Active.
    pub outcome: Option<WorkerOutcome>,
    /// Continuation token from the first successful invocation.
    pub continuation: Option<String>,
    /// Locator written by the output sink.
    pub output_path: Option<PathBuf>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the last invocation reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of resumes performed on this identity.
    pub resume_count: u32,
}

impl WorkerRecord {
    /// Create a new Active record at spawn time.
    pub fn new(id: Uuid, spec: WorkerSpec) -> Self {
        Self {
            id,
            spec,
            state: WorkerState::Active,
            outcome: None,
            continuation: None,
            output_path: None,
            created_at: Utc::now(),
            completed_at: None,
            resume_count: 0,
        }
    }

    /// Apply the terminal outcome of an invocation.
    ///
    /// Moves Active → Completed/Failed exactly once and captures the
    /// continuation token on first success.
    pub fn record_terminal(
        &mut self,
        outcome: WorkerOutcome,
        output_path: Option<PathBuf>,
    ) -> Result<(), RegistryError> {
        let target = if outcome.is_success() {
            WorkerState::Completed
        } else {
            WorkerState::Failed
        };
        if !self.state.can_transition_to(target) {
            return Err(RegistryError::InvalidState {
                id: self.id,
                state: self.state,
                expected: WorkerState::Active,
            });
        }
        if let Some(token) = outcome.continuation_token()
            && self.continuation.is_none()
        {
            self.continuation = Some(token.to_string());
        }
        self.state = target;
        self.outcome = Some(outcome);
        self.output_path = output_path;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Return the record to Active for a resumed invocation.
    ///
    /// Requires Completed; clears the previous outcome and swaps in the
    /// derived spec for the new invocation.
    pub fn begin_resume(&mut self, spec: WorkerSpec) -> Result<(), RegistryError> {
        if self.state != WorkerState::Completed {
            return Err(RegistryError::InvalidState {
                id: self.id,
                state: self.state,
                expected: WorkerState::Completed,
            });
        }
        self.state = WorkerState::Active;
        self.spec = spec;
        self.outcome = None;
        self.completed_at = None;
        self.resume_count += 1;
        Ok(())
    }
}
