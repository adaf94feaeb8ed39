//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Agent CLI command to execute (binary name or path).
    pub command: String,
    /// Maximum number of workers in the Active state.
    pub max_active_workers: usize,
    /// Timeout applied when a spec does not carry its own.
    pub default_timeout: Duration,
    /// Directory for per-worker outcome files.
    pub output_dir: PathBuf,
    /// Directory for per-worker permission sockets (gated variant).
    pub socket_dir: PathBuf,
    /// Maximum stderr lines retained for failure excerpts.
    pub stderr_excerpt_lines: usize,
    /// Byte cap on the stderr excerpt after line trimming.
    pub stderr_excerpt_bytes: usize,
    /// Whether workers run behind the permission gate.
    pub permission_gate: bool,
    /// Maximum permission requests served per worker invocation.
    pub max_permission_requests: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("agent-pool");
        Self {
            command: "claude".to_string(),
            max_active_workers: 10,
            default_timeout: Duration::from_secs(300), // 5 minutes
            output_dir: base.join("outputs"),
            socket_dir: base.join("sockets"),
            stderr_excerpt_lines: 50,
            stderr_excerpt_bytes: 4096,
            permission_gate: false,
            max_permission_requests: 100,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, returning the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "command".to_string(),
                hint: "Set the agent CLI binary name or path.".to_string(),
            });
        }
        if self.max_active_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_active_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "default_timeout".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        if self.stderr_excerpt_lines == 0 || self.stderr_excerpt_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stderr_excerpt".to_string(),
                message: "excerpt bounds must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
