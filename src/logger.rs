//! Append-only structured event log, one per run.
//!
//! The on-disk representation is JSON-lines (one `LogEntry` per line),
//! following the teacher's preference for line-oriented, streamable
//! artifacts over a single monolithic JSON document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error as trace_error, info};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("log already sealed for run {0}")]
    Sealed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type LoggerResult<T> = std::result::Result<T, LoggerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub event: String,
    pub step_name: Option<String>,
    pub step_index: Option<usize>,
    pub payload: serde_json::Value,
}

/// Append-only structured log for one run. Created via
/// [`ExecutionLogger::start_log`], sealed by [`ExecutionLogger::finish_log`].
#[async_trait]
pub trait ExecutionLogger: Send + Sync {
    async fn start_log(
        &self,
        run_id: &str,
        workflow_id: &str,
        workflow_name: &str,
        agent: &str,
        inputs: &serde_json::Value,
    ) -> LoggerResult<()>;

    async fn step_started(&self, run_id: &str, step_name: &str, step_index: usize) -> LoggerResult<()>;

    async fn step_completed(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        duration_ms: u64,
        output: &serde_json::Value,
    ) -> LoggerResult<()>;

    async fn step_failed(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        error: &str,
        duration_ms: u64,
    ) -> LoggerResult<()>;

    async fn step_retrying(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        attempt: u32,
        max_attempts: u32,
        delay_secs: f64,
    ) -> LoggerResult<()>;

    async fn finish_log(
        &self,
        run_id: &str,
        success: bool,
        outputs: &serde_json::Value,
        error: Option<&str>,
    ) -> LoggerResult<()>;
}

/// File-backed logger: one JSON-lines file per run under `root_dir`, plus a
/// small in-memory set tracking which runs have been sealed.
pub struct FileExecutionLogger {
    root_dir: PathBuf,
    sealed: Mutex<std::collections::HashSet<String>>,
}

impl FileExecutionLogger {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            sealed: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn log_path(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(format!("{run_id}.log.jsonl"))
    }

    async fn append(&self, run_id: &str, entry: LogEntry) -> LoggerResult<()> {
        {
            let sealed = self.sealed.lock().await;
            if sealed.contains(run_id) {
                return Err(LoggerError::Sealed(run_id.to_string()));
            }
        }

        let path = self.log_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    fn entry(level: LogLevel, event: &str, step_name: Option<&str>, step_index: Option<usize>, payload: serde_json::Value) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            event: event.to_string(),
            step_name: step_name.map(str::to_string),
            step_index,
            payload,
        }
    }
}

#[async_trait]
impl ExecutionLogger for FileExecutionLogger {
    async fn start_log(
        &self,
        run_id: &str,
        workflow_id: &str,
        workflow_name: &str,
        agent: &str,
        inputs: &serde_json::Value,
    ) -> LoggerResult<()> {
        {
            let mut sealed = self.sealed.lock().await;
            sealed.remove(run_id);
        }
        info!(run_id, workflow_id, "run started");
        self.append(
            run_id,
            Self::entry(
                LogLevel::Info,
                "run_started",
                None,
                None,
                serde_json::json!({
                    "workflow_id": workflow_id,
                    "workflow_name": workflow_name,
                    "agent": agent,
                    "inputs": inputs,
                }),
            ),
        )
        .await
    }

    async fn step_started(&self, run_id: &str, step_name: &str, step_index: usize) -> LoggerResult<()> {
        self.append(
            run_id,
            Self::entry(
                LogLevel::Info,
                "step_started",
                Some(step_name),
                Some(step_index),
                serde_json::Value::Null,
            ),
        )
        .await
    }

    async fn step_completed(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        duration_ms: u64,
        output: &serde_json::Value,
    ) -> LoggerResult<()> {
        self.append(
            run_id,
            Self::entry(
                LogLevel::Info,
                "step_completed",
                Some(step_name),
                Some(step_index),
                serde_json::json!({ "duration_ms": duration_ms, "output": output }),
            ),
        )
        .await
    }

    async fn step_failed(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        error: &str,
        duration_ms: u64,
    ) -> LoggerResult<()> {
        trace_error!(run_id, step_name, error, "step failed");
        self.append(
            run_id,
            Self::entry(
                LogLevel::Error,
                "step_failed",
                Some(step_name),
                Some(step_index),
                serde_json::json!({ "error": error, "duration_ms": duration_ms }),
            ),
        )
        .await
    }

    async fn step_retrying(
        &self,
        run_id: &str,
        step_name: &str,
        step_index: usize,
        attempt: u32,
        max_attempts: u32,
        delay_secs: f64,
    ) -> LoggerResult<()> {
        self.append(
            run_id,
            Self::entry(
                LogLevel::Warn,
                "step_retrying",
                Some(step_name),
                Some(step_index),
                serde_json::json!({
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "delay_secs": delay_secs,
                }),
            ),
        )
        .await
    }

    async fn finish_log(
        &self,
        run_id: &str,
        success: bool,
        outputs: &serde_json::Value,
        error: Option<&str>,
    ) -> LoggerResult<()> {
        let event = if success { "run_completed" } else { "run_failed" };
        info!(run_id, success, "run finished");
        self.append(
            run_id,
            Self::entry(
                if success { LogLevel::Info } else { LogLevel::Error },
                event,
                None,
                None,
                serde_json::json!({ "outputs": outputs, "error": error }),
            ),
        )
        .await?;

        let mut sealed = self.sealed.lock().await;
        sealed.insert(run_id.to_string());
        Ok(())
    }
}

/// Read back every entry written for a run, in append order. Not part of
/// the core contract; a convenience used by tests and forensic tooling.
pub async fn read_log(path: &Path) -> LoggerResult<Vec<LogEntry>> {
    let content = fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(LoggerError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_log_emits_run_started() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileExecutionLogger::new(dir.path());
        logger
            .start_log("run-1", "wf-1", "demo", "claude", &serde_json::json!({}))
            .await
            .unwrap();

        let entries = read_log(&logger.log_path("run-1")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "run_started");
    }

    #[tokio::test]
    async fn finish_log_seals_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileExecutionLogger::new(dir.path());
        logger
            .start_log("run-1", "wf-1", "demo", "claude", &serde_json::json!({}))
            .await
            .unwrap();
        logger
            .finish_log("run-1", true, &serde_json::json!({}), None)
            .await
            .unwrap();

        let err = logger.step_started("run-1", "step", 0).await.unwrap_err();
        assert!(matches!(err, LoggerError::Sealed(_)));
    }

    #[tokio::test]
    async fn logs_entries_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileExecutionLogger::new(dir.path());
        logger
            .start_log("run-1", "wf-1", "demo", "claude", &serde_json::json!({}))
            .await
            .unwrap();
        logger.step_started("run-1", "step-a", 0).await.unwrap();
        logger
            .step_completed("run-1", "step-a", 0, 10, &serde_json::json!("ok"))
            .await
            .unwrap();
        logger
            .finish_log("run-1", true, &serde_json::json!({"step-a": "ok"}), None)
            .await
            .unwrap();

        let entries = read_log(&logger.log_path("run-1")).await.unwrap();
        let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["run_started", "step_started", "step_completed", "run_completed"]
        );
    }
}
