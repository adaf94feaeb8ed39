//! Agent CLI invocation building.

use crate::config::PoolConfig;
use crate::registry::spec::WorkerSpec;

/// Fully-built invocation: program, argv, and extra environment.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Build the argv for one invocation.
///
/// Shape: `<cmd> [--resume <token>] -p <prompt> --output-format json
/// [--model <m>] [--agent <name>] [--settings <json>]`.
pub fn build(
    config: &PoolConfig,
    spec: &WorkerSpec,
    resume: Option<&str>,
    env: Vec<(String, String)>,
) -> CommandPlan {
    let mut args = Vec::new();
    if let Some(token) = resume {
        args.push("--resume".to_string());
        args.push(token.to_string());
    }
    args.push("-p".to_string());
    args.push(spec.prompt.clone());
    args.push("--output-format".to_string());
    args.push("json".to_string());
    if let Some(model) = &spec.options.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(agent) = &spec.agent {
        args.push("--agent".to_string());
        args.push(agent.clone());
    }
    if let Some(settings) = spec.options.settings_json() {
        args.push("--settings".to_string());
        args.push(settings.to_string());
    }

    CommandPlan {
        program: config.command.clone(),
        args,
        env,
    }
}
