//! Concurrent registry of active jobs
//!
//! Owns all state transitions and per-owner admission control. The map
//! itself is guarded by an `RwLock`; each handle sits behind its own
//! `Mutex`, so one job's ingestion never blocks another's, and status
//! reads either see a whole handle or a not-found fallback.

use crate::error::SupervisorError;
use crate::jobs::classifier::parse_backtest_summary;
use crate::models::{
    JobHandle, JobKind, JobSnapshot, JobStatus, LogSeverity, RunRecord,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of finalizing a job, for the caller to persist and count
pub struct JobCompletion {
    pub kind: JobKind,
    pub owner_id: i64,
    pub status: JobStatus,
    pub duration_secs: f64,
    /// Run record to persist, present only for completed backtests
    pub record: Option<RunRecord>,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Mutex<JobHandle>>>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn insert(&self, handle: JobHandle) -> Arc<Mutex<JobHandle>> {
        let id = handle.id.clone();
        let entry = Arc::new(Mutex::new(handle));
        self.jobs.write().await.insert(id, entry.clone());
        entry
    }

    /// Admission and insert for live jobs in one step: the owner check
    /// runs under the map's write lock, so two concurrent launches for
    /// the same owner cannot both get a handle in.
    pub async fn try_insert_live(
        &self,
        handle: JobHandle,
    ) -> Result<Arc<Mutex<JobHandle>>, SupervisorError> {
        let mut jobs = self.jobs.write().await;
        for entry in jobs.values() {
            let existing = entry.lock().await;
            if existing.owner_id == handle.owner_id
                && existing.kind == JobKind::Live
                && existing.status == JobStatus::Running
            {
                return Err(SupervisorError::AlreadyRunning);
            }
        }
        let id = handle.id.clone();
        let entry = Arc::new(Mutex::new(handle));
        jobs.insert(id, entry.clone());
        Ok(entry)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<JobHandle>>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        let entry = self.get(id).await?;
        let handle = entry.lock().await;
        Some(handle.snapshot())
    }

    pub async fn snapshots_for_owner(&self, owner_id: i64) -> Vec<JobSnapshot> {
        let entries: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut snapshots = Vec::new();
        for entry in entries {
            let handle = entry.lock().await;
            if handle.owner_id == owner_id {
                snapshots.push(handle.snapshot());
            }
        }
        snapshots
    }

    /// Admission control: at most one running live job per owner
    pub async fn has_running_live(&self, owner_id: i64) -> bool {
        let entries: Vec<_> = self.jobs.read().await.values().cloned().collect();
        for entry in entries {
            let handle = entry.lock().await;
            if handle.owner_id == owner_id
                && handle.kind == JobKind::Live
                && handle.status == JobStatus::Running
            {
                return true;
            }
        }
        false
    }

    /// Request a stop: mark the handle terminal immediately and signal
    /// the ingestion task to kill the process. Returns the completion
    /// on a transition, `Ok(None)` when the job was already terminal
    /// (stop is idempotent), and `NotFound` for unknown ids.
    pub async fn stop(self: &Arc<Self>, id: &str) -> Result<Option<JobCompletion>, SupervisorError> {
        let entry = self.get(id).await.ok_or(SupervisorError::NotFound)?;
        let mut handle = entry.lock().await;
        if handle.status.is_terminal() {
            debug!(job_id = %id, status = ?handle.status, "stop requested on terminal job");
            return Ok(None);
        }
        handle.status = JobStatus::Stopped;
        handle.ended_at = Some(Utc::now());
        handle.push_log(LogSeverity::Info, "stop requested, terminating process");
        handle.request_stop();
        info!(job_id = %id, "job stopped by request");
        let completion = JobCompletion {
            kind: handle.kind,
            owner_id: handle.owner_id,
            status: JobStatus::Stopped,
            duration_secs: duration_secs(&handle),
            record: None,
        };
        drop(handle);
        self.schedule_eviction(id.to_string());
        Ok(Some(completion))
    }

    /// Reconcile a process exit. No-op if the handle is already
    /// terminal (e.g. the job was stopped and the exit callback fires
    /// later).
    ///
    /// Exit code 0 completes a live job outright; a backtest
    /// additionally needs a parseable result payload, otherwise it is
    /// forced to failed.
    pub async fn finalize(
        self: &Arc<Self>,
        id: &str,
        exit_code: Option<i32>,
        payload: Option<String>,
    ) -> Option<JobCompletion> {
        let entry = self.get(id).await?;
        let mut handle = entry.lock().await;
        if handle.status.is_terminal() {
            debug!(job_id = %id, "exit observed on terminal job, ignoring");
            return None;
        }

        let exit_ok = exit_code == Some(0);
        let mut record = None;

        let status = match (handle.kind, exit_ok) {
            (_, false) => {
                handle.push_log(
                    LogSeverity::Error,
                    format!("process exited with code {:?}", exit_code),
                );
                JobStatus::Failed
            }
            (JobKind::Live, true) => JobStatus::Completed,
            (JobKind::Backtest, true) => match payload {
                Some(raw) => match parse_backtest_summary(&raw) {
                    Ok(summary) => {
                        record = Some(RunRecord {
                            owner_id: handle.owner_id,
                            summary: summary.clone(),
                            settings: handle.settings.clone(),
                            created_at: Utc::now(),
                        });
                        handle.result = Some(summary);
                        JobStatus::Completed
                    }
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "result payload parse failed");
                        handle.push_log(LogSeverity::Error, e.to_string());
                        JobStatus::Failed
                    }
                },
                None => {
                    warn!(job_id = %id, "backtest exited cleanly but produced no result payload");
                    handle.push_log(
                        LogSeverity::Error,
                        "no result payload found in process output",
                    );
                    JobStatus::Failed
                }
            },
        };

        handle.status = status;
        handle.ended_at = Some(Utc::now());
        info!(job_id = %id, status = ?status, "job finalized");

        let completion = JobCompletion {
            kind: handle.kind,
            owner_id: handle.owner_id,
            status,
            duration_secs: duration_secs(&handle),
            record,
        };
        drop(handle);
        self.schedule_eviction(id.to_string());
        Some(completion)
    }

    /// Demote a completed backtest whose run record could not be
    /// persisted. The invariant is that `completed` implies a durable
    /// record exists.
    pub async fn mark_persist_failure(&self, id: &str, message: &str) {
        if let Some(entry) = self.get(id).await {
            let mut handle = entry.lock().await;
            handle.push_log(LogSeverity::Error, message);
            handle.status = JobStatus::Failed;
            handle.result = None;
        }
    }

    /// Remove a terminal handle after the retention period
    fn schedule_eviction(self: &Arc<Self>, id: String) {
        let registry = Arc::clone(self);
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            registry.jobs.write().await.remove(&id);
            debug!(job_id = %id, "job handle evicted");
        });
    }

    #[doc(hidden)]
    pub async fn evict_now(&self, id: &str) {
        self.jobs.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn duration_secs(handle: &JobHandle) -> f64 {
    handle
        .ended_at
        .map(|end| (end - handle.started_at).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0)
}
