//! Data models for job handles and persisted records

pub mod job;
pub mod records;

pub use job::{
    parse_job_id, JobHandle, JobKind, JobSettings, JobSnapshot, JobStatus, LiveState, LogEntry,
    LogSeverity, TradeSignal,
};
pub use records::{BacktestSummary, Credentials, OwnerSettings, RunRecord};
