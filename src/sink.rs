//! Output sink — durable per-worker outcome files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runner::outcome::WorkerOutcome;

/// On-disk record for one terminal transition.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutputRecord {
    pub worker_id: Uuid,
    pub description: String,
    pub written_at: DateTime<Utc>,
    pub outcome: WorkerOutcome,
}

/// Writes each worker's terminal outcome to a deterministic location.
///
/// Paths are keyed by worker identity alone, so a caller holding only the id
/// can always find the record, and concurrent writes from different workers
/// never collide.
pub struct OutputSink {
    dir: PathBuf,
}

impl OutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Deterministic locator for a worker's outcome file.
    pub fn locate(&self, worker_id: Uuid) -> PathBuf {
        self.dir.join(format!("{worker_id}.json"))
    }

    /// Persist a terminal outcome, returning its locator.
    ///
    /// Called exactly once per terminal transition, on the failure path too.
    pub async fn persist(
        &self,
        worker_id: Uuid,
        description: &str,
        outcome: &WorkerOutcome,
    ) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let record = OutputRecord {
            worker_id,
            description: description.to_string(),
            written_at: Utc::now(),
            outcome: outcome.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        let path = self.locate(worker_id);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(worker_id = %worker_id, path = %path.display(), "persisted outcome");
        Ok(path)
    }

    /// Read back a previously persisted record.
    pub async fn load(&self, worker_id: Uuid) -> std::io::Result<OutputRecord> {
        let bytes = tokio::fs::read(self.locate(worker_id)).await?;
        serde_json::from_slice(&bytes).map_err(std::io::Error::other)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::outcome::CostMetrics;

    #[tokio::test]
    async fn persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let id = Uuid::new_v4();
        let outcome = WorkerOutcome::Success {
            result_text: "hi".to_string(),
            continuation_token: "sess".to_string(),
            cost: CostMetrics::default(),
            turn_count: None,
        };

        let path = sink.persist(id, "greeting", &outcome).await.unwrap();
        assert_eq!(path, sink.locate(id));

        let record = sink.load(id).await.unwrap();
        assert_eq!(record.worker_id, id);
        assert_eq!(record.description, "greeting");
        assert_eq!(record.outcome, outcome);
    }

    #[tokio::test]
    async fn failure_outcomes_are_persisted_too() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(dir.path());
        let id = Uuid::new_v4();
        let outcome = WorkerOutcome::exited(1, "it broke".to_string());

        sink.persist(id, "doomed", &outcome).await.unwrap();
        assert!(sink.locate(id).exists());

        let record = sink.load(id).await.unwrap();
        assert!(!record.outcome.is_success());
    }

    #[test]
    fn locator_is_derivable_from_identity_alone() {
        let sink = OutputSink::new("/var/run/agent-pool");
        let id = Uuid::new_v4();
        assert_eq!(
            sink.locate(id),
            PathBuf::from(format!("/var/run/agent-pool/{id}.json"))
        );
    }
}
