//! In-memory job handle and its read model

use crate::models::records::BacktestSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::watch;

/// How many recent log entries a status read returns
pub const LOG_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backtest,
    Live,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backtest => "backtest",
            JobKind::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: LogSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
}

/// Telemetry extracted from a live job's log stream.
///
/// Each field holds the most recently observed value and is never
/// cleared once set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_signal: Option<TradeSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>,
}

/// Caller-supplied run configuration, immutable after launch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    pub balance: f64,
    pub leverage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_risk: Option<f64>,
}

/// In-memory record of one external job, owned by the registry.
///
/// Only the job's ingestion task writes logs/live state/result; the
/// stop path writes status/ended_at from the requesting task. All
/// access goes through the registry's per-handle mutex.
pub struct JobHandle {
    pub id: String,
    pub kind: JobKind,
    pub owner_id: i64,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub live_state: LiveState,
    pub result: Option<BacktestSummary>,
    pub settings: JobSettings,
    logs: VecDeque<LogEntry>,
    log_cap: usize,
    stop_tx: watch::Sender<bool>,
}

impl JobHandle {
    pub fn new(id: String, kind: JobKind, owner_id: i64, settings: JobSettings, log_cap: usize) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            id,
            kind,
            owner_id,
            status: JobStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            live_state: LiveState::default(),
            result: None,
            settings,
            logs: VecDeque::new(),
            log_cap: log_cap.max(1),
            stop_tx,
        }
    }

    /// Append a log entry, dropping the oldest once the ring is full
    pub fn push_entry(&mut self, entry: LogEntry) {
        if self.logs.len() >= self.log_cap {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    pub fn push_log(&mut self, severity: LogSeverity, message: impl Into<String>) {
        self.push_entry(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        });
    }

    /// Last `n` log entries in emission order
    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.logs.len().saturating_sub(n);
        self.logs.iter().skip(skip).cloned().collect()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Receiver resolves when a stop has been requested
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Signal the ingestion task to kill the child process
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            logs: self.recent_logs(LOG_WINDOW),
            start_time: self.started_at,
            end_time: self.ended_at,
            settings: self.settings.clone(),
            result: self.result.clone(),
            live: if self.kind == JobKind::Live {
                Some(self.live_state.clone())
            } else {
                None
            },
        }
    }
}

/// Serializable point-in-time view of a job handle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub settings: JobSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BacktestSummary>,
    #[serde(flatten)]
    pub live: Option<LiveState>,
}

/// Decode `{kind}-{ownerId}-{timestamp}` job ids.
///
/// Used by the status fallback after a handle has been evicted.
pub fn parse_job_id(id: &str) -> Option<(JobKind, i64)> {
    let mut parts = id.splitn(3, '-');
    let kind = match parts.next()? {
        "backtest" => JobKind::Backtest,
        "live" => JobKind::Live,
        _ => return None,
    };
    let owner_id = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((kind, owner_id))
}
