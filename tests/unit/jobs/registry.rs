//! Unit tests for the job registry state machine

use botrix::error::SupervisorError;
use botrix::jobs::JobRegistry;
use botrix::models::{JobHandle, JobKind, JobSettings, JobStatus};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> JobSettings {
    JobSettings {
        balance: 10000.0,
        leverage: 1,
        period: None,
        timeframe: None,
        max_risk: None,
    }
}

fn handle(id: &str, kind: JobKind, owner_id: i64) -> JobHandle {
    JobHandle::new(id.to_string(), kind, owner_id, settings(), 1000)
}

fn registry() -> Arc<JobRegistry> {
    Arc::new(JobRegistry::new(Duration::from_secs(300)))
}

const PAYLOAD: &str = "{\"initialBalance\":10000.0,\"finalBalance\":13157.56,\
                       \"netProfit\":3157.56,\"winRate\":76.18,\"maxDrawdown\":-3.75,\
                       \"totalTrades\":1956,\"winningTrades\":1490,\"losingTrades\":463}";

#[tokio::test]
async fn inserted_job_is_immediately_visible_as_running() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;

    let snapshot = registry.snapshot("backtest-1-100").await.expect("found");
    assert_eq!(snapshot.status, JobStatus::Running);
    assert!(snapshot.result.is_none());
}

#[tokio::test]
async fn live_admission_control_sees_running_jobs() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;

    assert!(registry.has_running_live(1).await);
    assert!(!registry.has_running_live(2).await);
}

#[tokio::test]
async fn backtests_do_not_count_toward_live_admission() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;
    assert!(!registry.has_running_live(1).await);
}

#[tokio::test]
async fn terminal_live_jobs_do_not_block_admission() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;
    registry.stop("live-1-100").await.expect("stop");
    assert!(!registry.has_running_live(1).await);
}

#[tokio::test]
async fn atomic_live_insert_rejects_a_second_running_job() {
    let registry = registry();
    registry
        .try_insert_live(handle("live-1-100", JobKind::Live, 1))
        .await
        .expect("first insert");

    let second = registry
        .try_insert_live(handle("live-1-200", JobKind::Live, 1))
        .await;
    assert!(matches!(second, Err(SupervisorError::AlreadyRunning)));
    assert_eq!(registry.len().await, 1);

    // A different owner and a terminal job do not block
    registry
        .try_insert_live(handle("live-2-100", JobKind::Live, 2))
        .await
        .expect("other owner admitted");
    registry.stop("live-1-100").await.expect("stop");
    registry
        .try_insert_live(handle("live-1-300", JobKind::Live, 1))
        .await
        .expect("admitted after the previous job ended");
}

#[tokio::test]
async fn stop_marks_terminal_immediately_and_is_idempotent() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;

    let first = registry.stop("live-1-100").await.expect("stop");
    assert!(first.is_some());
    let snapshot = registry.snapshot("live-1-100").await.expect("found");
    assert_eq!(snapshot.status, JobStatus::Stopped);
    assert!(snapshot.end_time.is_some());

    // Second stop is a no-op, never an error
    let second = registry.stop("live-1-100").await.expect("stop again");
    assert!(second.is_none());
}

#[tokio::test]
async fn stop_on_unknown_job_is_not_found() {
    let registry = registry();
    let result = registry.stop("live-9-1").await;
    assert!(matches!(result, Err(SupervisorError::NotFound)));
}

#[tokio::test]
async fn clean_exit_with_payload_completes_a_backtest() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;

    let completion = registry
        .finalize("backtest-1-100", Some(0), Some(PAYLOAD.to_string()))
        .await
        .expect("finalized");
    assert_eq!(completion.status, JobStatus::Completed);
    let record = completion.record.expect("run record");
    assert_eq!(record.summary.net_profit, 3157.56);
    assert_eq!(record.owner_id, 1);

    let snapshot = registry.snapshot("backtest-1-100").await.expect("found");
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.result.expect("result").net_profit, 3157.56);
}

#[tokio::test]
async fn clean_exit_without_payload_fails_a_backtest() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;

    let completion = registry
        .finalize("backtest-1-100", Some(0), None)
        .await
        .expect("finalized");
    assert_eq!(completion.status, JobStatus::Failed);
    assert!(completion.record.is_none());

    let snapshot = registry.snapshot("backtest-1-100").await.expect("found");
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.result.is_none());
}

#[tokio::test]
async fn malformed_payload_fails_a_backtest() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;

    let completion = registry
        .finalize("backtest-1-100", Some(0), Some("{\"a\":1}".to_string()))
        .await
        .expect("finalized");
    assert_eq!(completion.status, JobStatus::Failed);
}

#[tokio::test]
async fn nonzero_exit_fails_any_kind() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;

    let completion = registry
        .finalize("live-1-100", Some(3), None)
        .await
        .expect("finalized");
    assert_eq!(completion.status, JobStatus::Failed);
}

#[tokio::test]
async fn clean_exit_completes_a_live_job_without_payload() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;

    let completion = registry
        .finalize("live-1-100", Some(0), None)
        .await
        .expect("finalized");
    assert_eq!(completion.status, JobStatus::Completed);
}

#[tokio::test]
async fn exit_after_stop_is_a_noop() {
    let registry = registry();
    registry.insert(handle("live-1-100", JobKind::Live, 1)).await;
    registry.stop("live-1-100").await.expect("stop");

    // The eventual exit callback must not override the stopped status
    let completion = registry.finalize("live-1-100", Some(0), None).await;
    assert!(completion.is_none());

    let snapshot = registry.snapshot("live-1-100").await.expect("found");
    assert_eq!(snapshot.status, JobStatus::Stopped);
}

#[tokio::test]
async fn evicted_handles_are_gone() {
    let registry = registry();
    registry.insert(handle("backtest-1-100", JobKind::Backtest, 1)).await;
    registry.evict_now("backtest-1-100").await;
    assert!(registry.snapshot("backtest-1-100").await.is_none());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn log_ring_drops_oldest_entries() {
    let registry = registry();
    let entry = registry.insert(JobHandle::new(
        "backtest-1-100".to_string(),
        JobKind::Backtest,
        1,
        settings(),
        10,
    ))
    .await;

    {
        let mut handle = entry.lock().await;
        for i in 0..25 {
            handle.push_log(botrix::models::LogSeverity::Info, format!("line {}", i));
        }
        assert_eq!(handle.log_count(), 10);
        let logs = handle.recent_logs(50);
        assert_eq!(logs.first().expect("first").message, "line 15");
        assert_eq!(logs.last().expect("last").message, "line 24");
    }
}
