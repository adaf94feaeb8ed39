//! Worker registry — spawn / wait / resume / approve orchestration.
//!
//! All cross-worker coordination lives here. The record map is guarded by a
//! single lock; worker subprocesses run underneath as spawned tasks and
//! report back through one event channel, which `wait` drains in batches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{RegistryError, Result};
use crate::permission::socket::cleanup_socket;
use crate::permission::{PermissionGate, PermissionListener, PermissionRequest};
use crate::registry::spec::{WorkerOptions, WorkerSpec};
use crate::registry::state::{WorkerRecord, WorkerState};
use crate::runner::outcome::WorkerOutcome;
use crate::runner::process::{CliRunner, WorkerRunner};
use crate::sink::OutputSink;

/// Event pushed from a worker task (or its permission listener) into the
/// wait channel.
#[derive(Debug)]
pub enum RegistryEvent {
    Terminal {
        worker_id: Uuid,
        outcome: WorkerOutcome,
        output_path: Option<PathBuf>,
    },
    Permission(PermissionRequest),
}

/// One worker reported terminal by `wait` (or inspected via `peek`).
#[derive(Debug, Clone)]
pub struct CompletedWorker {
    pub worker_id: Uuid,
    pub state: WorkerState,
    pub outcome: WorkerOutcome,
    pub output_path: Option<PathBuf>,
}

/// Batched result of one `wait` call.
#[derive(Debug, Default)]
pub struct WaitReport {
    /// Workers that reached a terminal state since the previous `wait`.
    pub completed: Vec<CompletedWorker>,
    /// Permission requests that appeared since the previous `wait` and are
    /// still undecided (gated variant).
    pub pending_permissions: Vec<PermissionRequest>,
}

/// Per-state record counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

struct ActiveTask {
    task: JoinHandle<()>,
    /// Permission listener handle and socket path (gated variant).
    listener: Option<(JoinHandle<()>, PathBuf)>,
}

#[derive(Default)]
struct Inner {
    workers: HashMap<Uuid, WorkerRecord>,
    tasks: HashMap<Uuid, ActiveTask>,
}

impl Inner {
    fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|r| r.state == WorkerState::Active)
            .count()
    }
}

/// The pool orchestrator.
///
/// Owns the only shared mutable state (the record map); the four operations
/// are serialized with respect to collection mutation while the subprocesses
/// themselves run in parallel.
pub struct WorkerRegistry {
    config: PoolConfig,
    runner: Arc<dyn WorkerRunner>,
    sink: Arc<OutputSink>,
    gate: Arc<PermissionGate>,
    inner: Mutex<Inner>,
    event_tx: mpsc::UnboundedSender<RegistryEvent>,
    /// Receiver side of the wait channel; its lock also serializes
    /// concurrent `wait` callers.
    event_rx: Mutex<mpsc::UnboundedReceiver<RegistryEvent>>,
}

impl WorkerRegistry {
    /// Create a registry driving the real agent CLI.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let runner = Arc::new(CliRunner::new(config.clone()));
        Self::with_runner(config, runner)
    }

    /// Create a registry with an injected runner (tests, alternative CLIs).
    pub fn with_runner(config: PoolConfig, runner: Arc<dyn WorkerRunner>) -> Result<Self> {
        config.validate().map_err(crate::error::Error::from)?;
        let sink = Arc::new(OutputSink::new(config.output_dir.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            runner,
            sink,
            gate: Arc::new(PermissionGate::new()),
            inner: Mutex::new(Inner::default()),
            event_tx,
            event_rx: Mutex::new(event_rx),
        })
    }

    /// Start a new worker. Non-blocking; returns the minted identity.
    pub async fn spawn(&self, spec: WorkerSpec) -> Result<Uuid> {
        spec.options.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.active_count() >= self.config.max_active_workers {
            return Err(RegistryError::CapacityExceeded {
                max: self.config.max_active_workers,
            }
            .into());
        }

        let id = Uuid::new_v4();
        let listener = self.bind_gate_socket(id)?;
        inner.workers.insert(id, WorkerRecord::new(id, spec.clone()));
        let active = self.start_invocation(id, spec, None, listener);
        inner.tasks.insert(id, active);

        tracing::info!(worker_id = %id, "spawned worker");
        Ok(id)
    }

    /// Block until at least one active worker reaches a terminal state (or,
    /// gated, a new permission request appears), then drain everything that
    /// has already resolved.
    pub async fn wait(&self) -> Result<WaitReport> {
        let mut rx = self.event_rx.lock().await;
        {
            let inner = self.inner.lock().await;
            if inner.active_count() == 0 {
                return Err(RegistryError::NoActiveWorkers.into());
            }
        }

        let first = rx.recv().await.ok_or(RegistryError::ChannelClosed)?;
        let mut events = vec![first];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        drop(rx);

        self.apply_events(events).await
    }

    /// Resume a completed worker with a follow-up prompt. Non-blocking.
    pub async fn resume(
        &self,
        id: Uuid,
        prompt: impl Into<String>,
        options: Option<WorkerOptions>,
    ) -> Result<()> {
        if let Some(options) = &options {
            options.validate()?;
        }

        let mut inner = self.inner.lock().await;
        let record = inner
            .workers
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { id })?;
        if record.state != WorkerState::Completed {
            return Err(RegistryError::InvalidState {
                id,
                state: record.state,
                expected: WorkerState::Completed,
            }
            .into());
        }
        let token = record
            .continuation
            .clone()
            .ok_or(RegistryError::MissingContinuation { id })?;

        let resumed_spec = record.spec.for_resume(prompt, options);
        let listener = self.bind_gate_socket(id)?;
        record.begin_resume(resumed_spec.clone())?;
        let active = self.start_invocation(id, resumed_spec, Some(token), listener);
        inner.tasks.insert(id, active);

        tracing::info!(worker_id = %id, "resumed worker");
        Ok(())
    }

    /// Decide a pending permission request (gated variant).
    pub async fn approve_permission(
        &self,
        request_id: Uuid,
        allow: bool,
        reason: Option<String>,
    ) -> Result<()> {
        self.gate.decide(request_id, allow, reason).await?;
        tracing::info!(%request_id, allow, "permission decided");
        Ok(())
    }

    /// Non-blocking inspection of a worker that already reached a terminal
    /// state. Flushes already-resolved completions first so a just-finished
    /// worker is visible without a full `wait`.
    pub async fn peek(&self, id: Uuid) -> Result<CompletedWorker> {
        self.flush_resolved().await?;

        let inner = self.inner.lock().await;
        let record = inner
            .workers
            .get(&id)
            .ok_or(RegistryError::NotFound { id })?;
        let Some(outcome) = record.outcome.clone() else {
            return Err(RegistryError::InvalidState {
                id,
                state: record.state,
                expected: WorkerState::Completed,
            }
            .into());
        };
        Ok(CompletedWorker {
            worker_id: id,
            state: record.state,
            outcome,
            output_path: record.output_path.clone(),
        })
    }

    /// Snapshot of a worker record.
    pub async fn record(&self, id: Uuid) -> Result<WorkerRecord> {
        self.inner
            .lock()
            .await
            .workers
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id }.into())
    }

    /// Per-state counts over all records.
    pub async fn summary(&self) -> RegistrySummary {
        let inner = self.inner.lock().await;
        let mut summary = RegistrySummary {
            total: inner.workers.len(),
            ..Default::default()
        };
        for record in inner.workers.values() {
            match record.state {
                WorkerState::Active => summary.active += 1,
                WorkerState::Completed => summary.completed += 1,
                WorkerState::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Abort every in-flight task and listener.
    ///
    /// Aborted tasks never deliver a terminal event, so their records are
    /// moved to Failed here; a later `wait` then reports `NoActiveWorkers`
    /// instead of blocking on a wake source that no longer exists.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for (_, active) in inner.tasks.drain() {
            active.task.abort();
            if let Some((listener, path)) = active.listener {
                listener.abort();
                cleanup_socket(&path).await;
            }
        }
        for record in inner.workers.values_mut() {
            if record.state == WorkerState::Active {
                let _ = record.record_terminal(
                    WorkerOutcome::exception("aborted by registry shutdown"),
                    None,
                );
            }
        }
    }

    /// Bind the permission socket for a gated invocation; no-op otherwise.
    fn bind_gate_socket(&self, id: Uuid) -> Result<Option<PermissionListener>> {
        if !self.config.permission_gate {
            return Ok(None);
        }
        let listener = PermissionListener::bind(&self.config.socket_dir, id).map_err(|e| {
            crate::error::PermissionError::Socket {
                worker_id: id,
                reason: e.to_string(),
            }
        })?;
        Ok(Some(listener))
    }

    /// Spawn the worker task (and listener task, when gated) for one
    /// invocation. Infallible: every error inside becomes a Failure outcome.
    fn start_invocation(
        &self,
        id: Uuid,
        spec: WorkerSpec,
        resume_token: Option<String>,
        listener: Option<PermissionListener>,
    ) -> ActiveTask {
        let env = listener
            .as_ref()
            .map(|l| l.env_vars())
            .unwrap_or_default();
        let listener = listener.map(|l| {
            let path = l.socket_path().to_path_buf();
            let handle = tokio::spawn(l.serve(
                Arc::clone(&self.gate),
                self.event_tx.clone(),
                self.config.max_permission_requests,
            ));
            (handle, path)
        });

        let runner = Arc::clone(&self.runner);
        let sink = Arc::clone(&self.sink);
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            let expected = resume_token.clone();
            let invocation = std::panic::AssertUnwindSafe(runner.invoke(
                &spec,
                resume_token.as_deref(),
                env,
            ))
            .catch_unwind()
            .await;
            let mut outcome = match invocation {
                Ok(outcome) => outcome,
                Err(_) => WorkerOutcome::exception("worker task panicked during invocation"),
            };

            // A resume must come back on the same session; a drifted token is
            // a protocol violation, never silently accepted.
            if let Some(expected) = &expected
                && let Some(actual) = outcome.continuation_token()
                && actual != expected
            {
                tracing::warn!(
                    worker_id = %id,
                    expected,
                    actual,
                    "continuation token changed across resume"
                );
                outcome = WorkerOutcome::exception(format!(
                    "continuation token mismatch: expected {expected}, got {actual}"
                ));
            }

            // Persist on every terminal path so resolution is never invisible.
            let output_path = match sink.persist(id, &spec.description, &outcome).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(worker_id = %id, %e, "failed to persist worker outcome");
                    None
                }
            };

            let _ = event_tx.send(RegistryEvent::Terminal {
                worker_id: id,
                outcome,
                output_path,
            });
        });

        ActiveTask { task, listener }
    }

    /// Drain events already sitting in the channel without blocking.
    /// Permission events are set aside and re-queued only after the drain
    /// finishes; re-sending mid-drain would hand the same event straight
    /// back to `try_recv` and spin forever.
    async fn flush_resolved(&self) -> Result<()> {
        let Ok(mut rx) = self.event_rx.try_lock() else {
            // A concurrent `wait` is draining already.
            return Ok(());
        };
        let mut terminals = Vec::new();
        let mut permissions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                RegistryEvent::Permission(request) => permissions.push(request),
                terminal => terminals.push(terminal),
            }
        }
        drop(rx);
        for request in permissions {
            let _ = self.event_tx.send(RegistryEvent::Permission(request));
        }
        if !terminals.is_empty() {
            self.apply_events(terminals).await?;
        }
        Ok(())
    }

    /// Move each drained terminal event's record out of Active before
    /// returning control, so an immediate `resume` on a reported identity
    /// always finds it Completed.
    async fn apply_events(&self, events: Vec<RegistryEvent>) -> Result<WaitReport> {
        let mut report = WaitReport::default();
        let mut inner = self.inner.lock().await;

        for event in events {
            match event {
                RegistryEvent::Terminal {
                    worker_id,
                    outcome,
                    output_path,
                } => {
                    if let Some(active) = inner.tasks.remove(&worker_id)
                        && let Some((listener, path)) = active.listener
                    {
                        listener.abort();
                        cleanup_socket(&path).await;
                    }
                    self.gate.drop_worker(worker_id).await;

                    let Some(record) = inner.workers.get_mut(&worker_id) else {
                        tracing::warn!(%worker_id, "terminal event for unknown worker");
                        continue;
                    };
                    if let Err(e) = record.record_terminal(outcome.clone(), output_path.clone()) {
                        tracing::warn!(%worker_id, %e, "dropped duplicate terminal event");
                        continue;
                    }
                    tracing::info!(
                        worker_id = %worker_id,
                        state = %record.state,
                        "worker reached terminal state"
                    );
                    report.completed.push(CompletedWorker {
                        worker_id,
                        state: record.state,
                        outcome,
                        output_path,
                    });
                }
                RegistryEvent::Permission(request) => {
                    // Skip requests decided (or torn down) before this drain.
                    if self.gate.is_pending(request.request_id).await {
                        report.pending_permissions.push(request);
                    }
                }
            }
        }

        Ok(report)
    }
}
