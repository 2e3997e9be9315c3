//! Durable execution state: `ExecutionRecord`s and `StepCheckpoint`s.
//!
//! The file-backed implementation mirrors the teacher's checkpoint manager:
//! every write lands in a `.tmp` sibling file first, then an atomic rename
//! makes it visible, so a crash mid-write never leaves a corrupted record
//! on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("execution record already exists for run {0}")]
    AlreadyExists(String),
    #[error("no execution record for run {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StateResult<T> = std::result::Result<T, StateStoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Durable record of a single run, one per `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_path: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub agent: String,
    pub inputs: HashMap<String, serde_json::Value>,
    pub outputs: Option<HashMap<String, serde_json::Value>>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        agent: impl Into<String>,
        total_steps: usize,
        inputs: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            workflow_path: None,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_steps,
            agent: agent.into(),
            inputs,
            outputs: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Durable per-step record, keyed by `(run_id, step_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCheckpoint {
    pub run_id: String,
    pub step_index: usize,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outputs: Option<HashMap<String, serde_json::Value>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Durable storage of execution records and step checkpoints.
///
/// Implementations must serialize writes to the same `run_id` and must make
/// a write visible to subsequent reads before returning. The engine never
/// calls back into the engine from here; this trait is a pure leaf.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_execution(&self, record: ExecutionRecord) -> StateResult<()>;
    async fn get_execution(&self, run_id: &str) -> StateResult<Option<ExecutionRecord>>;
    async fn update_execution(&self, record: ExecutionRecord) -> StateResult<()>;
    async fn save_checkpoint(&self, checkpoint: StepCheckpoint) -> StateResult<()>;
    async fn get_checkpoints(&self, run_id: &str) -> StateResult<Vec<StepCheckpoint>>;

    /// Smallest step index with no `completed` checkpoint, or 0 if none
    /// exist, or `total_steps` if every step up to it has completed.
    async fn get_resume_point(&self, run_id: &str, total_steps: usize) -> StateResult<usize> {
        let checkpoints = self.get_checkpoints(run_id).await?;
        let mut completed = vec![false; total_steps];
        for checkpoint in checkpoints {
            if checkpoint.status == StepStatus::Completed && checkpoint.step_index < total_steps {
                completed[checkpoint.step_index] = true;
            }
        }
        Ok(completed.iter().position(|done| !done).unwrap_or(total_steps))
    }
}

/// File-backed state store: one JSON file per execution record, one
/// JSON-lines file of checkpoints per run, all under `root_dir`.
pub struct FileStateStore {
    root_dir: PathBuf,
    guard: RwLock<()>,
}

impl FileStateStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            guard: RwLock::new(()),
        }
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(format!("{run_id}.record.json"))
    }

    fn checkpoints_path(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(format!("{run_id}.checkpoints.jsonl"))
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> StateResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, contents).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    #[instrument(skip(self, record), fields(run_id = %record.run_id))]
    async fn create_execution(&self, record: ExecutionRecord) -> StateResult<()> {
        let _lock = self.guard.write().await;
        let path = self.record_path(&record.run_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StateStoreError::AlreadyExists(record.run_id));
        }
        let json = serde_json::to_string_pretty(&record)?;
        self.write_atomic(&path, &json).await?;
        debug!("created execution record");
        Ok(())
    }

    async fn get_execution(&self, run_id: &str) -> StateResult<Option<ExecutionRecord>> {
        let _lock = self.guard.read().await;
        let path = self.record_path(run_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    #[instrument(skip(self, record), fields(run_id = %record.run_id))]
    async fn update_execution(&self, record: ExecutionRecord) -> StateResult<()> {
        let _lock = self.guard.write().await;
        let path = self.record_path(&record.run_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StateStoreError::NotFound(record.run_id));
        }
        let json = serde_json::to_string_pretty(&record)?;
        self.write_atomic(&path, &json).await?;
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: StepCheckpoint) -> StateResult<()> {
        let _lock = self.guard.write().await;
        let path = self.checkpoints_path(&checkpoint.run_id);

        let mut checkpoints = if fs::try_exists(&path).await.unwrap_or(false) {
            read_checkpoints(&path).await?
        } else {
            Vec::new()
        };

        if let Some(existing) = checkpoints
            .iter_mut()
            .find(|c: &&mut StepCheckpoint| c.step_index == checkpoint.step_index)
        {
            *existing = checkpoint;
        } else {
            checkpoints.push(checkpoint);
        }

        let mut contents = String::new();
        for checkpoint in &checkpoints {
            contents.push_str(&serde_json::to_string(checkpoint)?);
            contents.push('\n');
        }
        self.write_atomic(&path, &contents).await?;
        Ok(())
    }

    async fn get_checkpoints(&self, run_id: &str) -> StateResult<Vec<StepCheckpoint>> {
        let _lock = self.guard.read().await;
        let path = self.checkpoints_path(run_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        read_checkpoints(&path).await
    }
}

async fn read_checkpoints(path: &Path) -> StateResult<Vec<StepCheckpoint>> {
    let content = fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StateStoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(run_id: &str, step_index: usize, status: StepStatus) -> StepCheckpoint {
        StepCheckpoint {
            run_id: run_id.to_string(),
            step_index,
            step_name: format!("step-{step_index}"),
            status,
            started_at: Utc::now(),
            completed_at: None,
            outputs: None,
            error: None,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn create_then_get_execution_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let record = ExecutionRecord::new("run-1", "wf-1", "claude", 2, HashMap::new());
        store.create_execution(record.clone()).await.unwrap();

        let fetched = store.get_execution("run-1").await.unwrap().unwrap();
        assert_eq!(fetched.run_id, "run-1");
        assert_eq!(fetched.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn create_execution_rejects_duplicate_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let record = ExecutionRecord::new("run-1", "wf-1", "claude", 2, HashMap::new());
        store.create_execution(record.clone()).await.unwrap();

        let err = store.create_execution(record).await.unwrap_err();
        assert!(matches!(err, StateStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_execution_requires_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let record = ExecutionRecord::new("run-1", "wf-1", "claude", 2, HashMap::new());
        let err = store.update_execution(record).await.unwrap_err();
        assert!(matches!(err, StateStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn resume_point_is_smallest_incomplete_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store
            .save_checkpoint(checkpoint("run-1", 0, StepStatus::Completed))
            .await
            .unwrap();
        store
            .save_checkpoint(checkpoint("run-1", 1, StepStatus::Completed))
            .await
            .unwrap();
        store
            .save_checkpoint(checkpoint("run-1", 2, StepStatus::Failed))
            .await
            .unwrap();

        let resume_point = store.get_resume_point("run-1", 4).await.unwrap();
        assert_eq!(resume_point, 2);
    }

    #[tokio::test]
    async fn resume_point_is_zero_with_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let resume_point = store.get_resume_point("unknown-run", 3).await.unwrap();
        assert_eq!(resume_point, 0);
    }

    #[tokio::test]
    async fn resume_point_is_total_steps_when_all_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store
            .save_checkpoint(checkpoint("run-1", 0, StepStatus::Completed))
            .await
            .unwrap();
        store
            .save_checkpoint(checkpoint("run-1", 1, StepStatus::Completed))
            .await
            .unwrap();

        let resume_point = store.get_resume_point("run-1", 2).await.unwrap();
        assert_eq!(resume_point, 2);
    }

    #[tokio::test]
    async fn save_checkpoint_upserts_by_step_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store
            .save_checkpoint(checkpoint("run-1", 0, StepStatus::Running))
            .await
            .unwrap();
        store
            .save_checkpoint(checkpoint("run-1", 0, StepStatus::Completed))
            .await
            .unwrap();

        let checkpoints = store.get_checkpoints("run-1").await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].status, StepStatus::Completed);
    }
}
