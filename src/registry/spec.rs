//! Worker specifications and tuning options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable description of one worker invocation.
///
/// A resume builds a fresh spec (new prompt, optionally new options) around
/// the original description, persona, and timeout; an existing spec value is
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Human-readable description of the task.
    pub description: String,
    /// Prompt passed to the agent process.
    pub prompt: String,
    /// Optional agent persona designator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Tuning options forwarded to the agent CLI.
    #[serde(default)]
    pub options: WorkerOptions,
    /// Per-worker timeout; the pool default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl WorkerSpec {
    /// Create a spec with default options and no persona or timeout.
    pub fn new(description: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            prompt: prompt.into(),
            agent: None,
            options: WorkerOptions::default(),
            timeout: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Derive the spec for a resumed invocation: new prompt, optionally new
    /// options, everything else carried over.
    pub fn for_resume(&self, prompt: impl Into<String>, options: Option<WorkerOptions>) -> Self {
        Self {
            description: self.description.clone(),
            prompt: prompt.into(),
            agent: self.agent.clone(),
            options: options.unwrap_or_else(|| self.options.clone()),
            timeout: self.timeout,
        }
    }
}

/// Typed tuning options for the agent CLI.
///
/// Unknown fields are rejected at deserialization time rather than silently
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerOptions {
    /// Model identifier (passed via `--model`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum output tokens for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Extended-reasoning flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
    /// Nucleus sampling parameter, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl WorkerOptions {
    /// Validate option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.temperature
            && !(0.0..=1.0).contains(&t)
        {
            return Err(ConfigError::InvalidValue {
                key: "temperature".to_string(),
                message: format!("{t} is outside [0, 1]"),
            });
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(ConfigError::InvalidValue {
                key: "top_p".to_string(),
                message: format!("{p} is outside [0, 1]"),
            });
        }
        Ok(())
    }

    /// Render the `--settings` JSON payload, or `None` when every settings
    /// field is absent. The `model` field travels as its own flag and is not
    /// part of the settings document.
    pub fn settings_json(&self) -> Option<serde_json::Value> {
        let mut settings = serde_json::Map::new();
        if let Some(t) = self.temperature {
            settings.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(m) = self.max_output_tokens {
            settings.insert("maxOutputTokens".to_string(), serde_json::json!(m));
        }
        if let Some(thinking) = self.thinking {
            let mode = if thinking { "enabled" } else { "disabled" };
            settings.insert(
                "thinking".to_string(),
                serde_json::json!({ "type": mode }),
            );
        }
        if let Some(p) = self.top_p {
            settings.insert("topP".to_string(), serde_json::json!(p));
        }
        if let Some(k) = self.top_k {
            settings.insert("topK".to_string(), serde_json::json!(k));
        }
        if settings.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(settings))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_field_rejected() {
        let result: Result<WorkerOptions, _> =
            serde_json::from_str(r#"{"model": "haiku", "verbosity": "high"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn temperature_range_enforced() {
        let options = WorkerOptions {
            temperature: Some(1.5),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = WorkerOptions {
            temperature: Some(0.5),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn top_p_range_enforced() {
        let options = WorkerOptions {
            top_p: Some(-0.1),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn settings_json_absent_when_empty() {
        assert!(WorkerOptions::default().settings_json().is_none());

        // model alone does not produce a settings document
        let options = WorkerOptions {
            model: Some("claude-haiku-4".to_string()),
            ..Default::default()
        };
        assert!(options.settings_json().is_none());
    }

    #[test]
    fn settings_json_contents() {
        let options = WorkerOptions {
            temperature: Some(0.5),
            thinking: Some(true),
            top_k: Some(40),
            ..Default::default()
        };
        let settings = options.settings_json().unwrap();
        assert_eq!(settings["temperature"], 0.5);
        assert_eq!(settings["thinking"]["type"], "enabled");
        assert_eq!(settings["topK"], 40);
    }

    #[test]
    fn resume_spec_carries_description_and_persona() {
        let spec = WorkerSpec::new("Summarize logs", "summarize /var/log")
            .with_agent("reviewer")
            .with_timeout(Duration::from_secs(30));
        let resumed = spec.for_resume("now the error lines only", None);
        assert_eq!(resumed.description, spec.description);
        assert_eq!(resumed.agent.as_deref(), Some("reviewer"));
        assert_eq!(resumed.timeout, spec.timeout);
        assert_eq!(resumed.prompt, "now the error lines only");
    }
}
