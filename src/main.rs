use std::sync::Arc;
use std::time::Duration;

use agent_pool::config::PoolConfig;
use agent_pool::error::{Error, RegistryError};
use agent_pool::registry::{WorkerRegistry, WorkerSpec};
use agent_pool::runner::WorkerOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let prompts: Vec<String> = std::env::args().skip(1).collect();
    if prompts.is_empty() {
        eprintln!("Usage: agent-pool <prompt> [<prompt> ...]");
        eprintln!("  One worker is spawned per prompt; the pool waits for all of them.");
        std::process::exit(2);
    }

    let mut config = PoolConfig {
        command: std::env::var("AGENT_POOL_COMMAND").unwrap_or_else(|_| "claude".to_string()),
        permission_gate: std::env::var("AGENT_POOL_GATED").is_ok_and(|v| v == "1"),
        ..Default::default()
    };
    if let Ok(max) = std::env::var("AGENT_POOL_MAX_ACTIVE") {
        config.max_active_workers = max.parse().unwrap_or(config.max_active_workers);
    }
    if let Ok(secs) = std::env::var("AGENT_POOL_TIMEOUT_SECS") {
        if let Ok(secs) = secs.parse() {
            config.default_timeout = Duration::from_secs(secs);
        }
    }
    if let Ok(dir) = std::env::var("AGENT_POOL_OUTPUT_DIR") {
        config.output_dir = dir.into();
    }
    let auto_approve = std::env::var("AGENT_POOL_AUTO_APPROVE").is_ok_and(|v| v == "1");

    eprintln!("agent-pool v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Command: {}", config.command);
    eprintln!("   Outputs: {}", config.output_dir.display());
    eprintln!(
        "   Gate: {}\n",
        if config.permission_gate { "on" } else { "off" }
    );

    let registry = Arc::new(WorkerRegistry::new(config)?);

    for prompt in &prompts {
        let id = registry
            .spawn(WorkerSpec::new(prompt.clone(), prompt.clone()))
            .await?;
        eprintln!("spawned {id}: {prompt}");
    }

    loop {
        let report = match registry.wait().await {
            Ok(report) => report,
            Err(Error::Registry(RegistryError::NoActiveWorkers)) => break,
            Err(e) => return Err(e.into()),
        };

        for completed in &report.completed {
            match &completed.outcome {
                WorkerOutcome::Success { result_text, .. } => {
                    eprintln!("✓ {} completed", completed.worker_id);
                    println!("{result_text}");
                }
                WorkerOutcome::Failure {
                    exit_code,
                    exception,
                    ..
                } => {
                    eprintln!(
                        "✗ {} failed (exit: {:?}, exception: {:?})",
                        completed.worker_id, exit_code, exception
                    );
                }
            }
            if let Some(path) = &completed.output_path {
                eprintln!("  outcome file: {}", path.display());
            }
        }

        for request in &report.pending_permissions {
            eprintln!(
                "? {} requests '{}' with {}",
                request.worker_id, request.tool, request.input
            );
            if auto_approve {
                registry
                    .approve_permission(request.request_id, true, None)
                    .await?;
                eprintln!("  approved (AGENT_POOL_AUTO_APPROVE=1)");
            } else {
                registry
                    .approve_permission(
                        request.request_id,
                        false,
                        Some("denied: run with AGENT_POOL_AUTO_APPROVE=1 to allow".to_string()),
                    )
                    .await?;
                eprintln!("  denied");
            }
        }
    }

    let summary = registry.summary().await;
    eprintln!(
        "\ndone: {} worker(s), {} completed, {} failed",
        summary.total, summary.completed, summary.failed
    );
    Ok(())
}
