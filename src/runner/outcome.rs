//! Terminal outcomes of worker invocations.

use serde::{Deserialize, Serialize};

/// Cost figures reported by the agent CLI on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    /// Total run cost in USD, when the CLI reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Wall-clock duration of the run in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Tagged result of one completed invocation.
///
/// Failures are self-documenting: exactly one of the failure sub-fields
/// carries the category. A non-zero exit populates `exit_code` (with the
/// stderr excerpt); timeouts, malformed payloads, spawn errors, and panics
/// populate `exception` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Success {
        /// Final result text from the agent.
        result_text: String,
        /// Opaque session identifier needed to resume the conversation.
        continuation_token: String,
        /// Cost figures, when reported.
        #[serde(default)]
        cost: CostMetrics,
        /// Number of conversational turns, when reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_count: Option<u32>,
    },
    Failure {
        /// Process exit code for non-zero exits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Bounded tail of captured stderr for non-zero exits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_excerpt: Option<String>,
        /// Description for timeout / malformed-payload / spawn / panic failures.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<String>,
    },
}

/// Successful result payload emitted by the agent CLI on stdout.
///
/// `session_id` and `result` are required; everything else is optional.
#[derive(Debug, Deserialize)]
struct ResultPayload {
    session_id: String,
    result: String,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    num_turns: Option<u32>,
}

impl WorkerOutcome {
    /// Failure from a non-zero process exit.
    pub fn exited(exit_code: i32, stderr_excerpt: String) -> Self {
        Self::Failure {
            exit_code: Some(exit_code),
            stderr_excerpt: Some(stderr_excerpt),
            exception: None,
        }
    }

    /// Failure from a timeout, spawn error, malformed payload, or panic.
    pub fn exception(description: impl Into<String>) -> Self {
        Self::Failure {
            exit_code: None,
            stderr_excerpt: None,
            exception: Some(description.into()),
        }
    }

    /// Fail-closed parse of the CLI's stdout for a zero-exit run.
    ///
    /// A nominally-successful run with a missing or mistyped required field
    /// is a Failure, never a partial success.
    pub fn from_success_stdout(stdout: &str) -> Self {
        let payload: ResultPayload = match serde_json::from_str(stdout) {
            Ok(p) => p,
            Err(e) => {
                return Self::exception(format!("malformed result payload: {e}"));
            }
        };
        if payload.session_id.is_empty() {
            return Self::exception("malformed result payload: empty session_id");
        }
        Self::Success {
            result_text: payload.result,
            continuation_token: payload.session_id,
            cost: CostMetrics {
                total_cost_usd: payload.total_cost_usd,
                duration_ms: payload.duration_ms,
            },
            turn_count: payload.num_turns,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Continuation token, for successful outcomes.
    pub fn continuation_token(&self) -> Option<&str> {
        match self {
            Self::Success {
                continuation_token, ..
            } => Some(continuation_token),
            Self::Failure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_payload() {
        let stdout = r#"{
            "session_id": "sess-42",
            "result": "All tests pass.",
            "total_cost_usd": 0.0123,
            "duration_ms": 5400,
            "num_turns": 3
        }"#;
        let outcome = WorkerOutcome::from_success_stdout(stdout);
        match outcome {
            WorkerOutcome::Success {
                result_text,
                continuation_token,
                cost,
                turn_count,
            } => {
                assert_eq!(result_text, "All tests pass.");
                assert_eq!(continuation_token, "sess-42");
                assert_eq!(cost.total_cost_usd, Some(0.0123));
                assert_eq!(turn_count, Some(3));
            }
            WorkerOutcome::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn parse_minimal_payload() {
        let outcome =
            WorkerOutcome::from_success_stdout(r#"{"session_id": "s", "result": "ok"}"#);
        assert!(outcome.is_success());
        assert_eq!(outcome.continuation_token(), Some("s"));
    }

    #[test]
    fn missing_session_id_is_failure() {
        let outcome = WorkerOutcome::from_success_stdout(r#"{"result": "ok"}"#);
        assert!(matches!(
            outcome,
            WorkerOutcome::Failure {
                exception: Some(_),
                exit_code: None,
                stderr_excerpt: None,
            }
        ));
    }

    #[test]
    fn missing_result_is_failure() {
        let outcome = WorkerOutcome::from_success_stdout(r#"{"session_id": "s"}"#);
        assert!(!outcome.is_success());
    }

    #[test]
    fn non_json_stdout_is_failure() {
        let outcome = WorkerOutcome::from_success_stdout("plain text, no JSON");
        assert!(!outcome.is_success());
    }

    #[test]
    fn empty_session_id_is_failure() {
        let outcome =
            WorkerOutcome::from_success_stdout(r#"{"session_id": "", "result": "ok"}"#);
        assert!(!outcome.is_success());
    }

    #[test]
    fn failure_fields_are_exclusive() {
        let exited = WorkerOutcome::exited(1, "boom".to_string());
        assert!(matches!(
            exited,
            WorkerOutcome::Failure {
                exit_code: Some(1),
                stderr_excerpt: Some(_),
                exception: None,
            }
        ));

        let timed_out = WorkerOutcome::exception("timed out after 30s");
        assert!(matches!(
            timed_out,
            WorkerOutcome::Failure {
                exit_code: None,
                stderr_excerpt: None,
                exception: Some(_),
            }
        ));
    }

    #[test]
    fn outcome_serde_roundtrip() {
        let outcome = WorkerOutcome::exited(2, "stderr tail".to_string());
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"failure\""));
        let parsed: WorkerOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }
}
