//! Test utilities for API server integration tests
//!
//! Stub shell scripts stand in for the external Python programs so the
//! full launch -> stream -> finalize path runs against real processes.

use async_trait::async_trait;
use axum_test::TestServer;
use botrix::config::BotCommand;
use botrix::core::http::{create_router, AppState, HealthStatus};
use botrix::db::{CredentialStore, MemoryStore, RunRecordStore};
use botrix::error::SupervisorError;
use botrix::jobs::{JobContext, JobRegistry};
use botrix::metrics::Metrics;
use botrix::models::{Credentials, RunRecord};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

#[allow(dead_code)]
pub struct TestApiServer {
    pub server: TestServer,
    pub ctx: Arc<JobContext>,
    pub store: Arc<MemoryStore>,
    dir: PathBuf,
}

#[allow(dead_code)]
impl TestApiServer {
    /// Spin up a server whose backtest/live "bots" are the given shell
    /// script bodies.
    pub async fn with_scripts(backtest: &str, live: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(backtest, live, store.clone(), store.clone(), store).await
    }

    /// Like [`with_scripts`] but with substitutable credential and run
    /// record stores; `store` always backs the settings.
    pub async fn build(
        backtest: &str,
        live: &str,
        store: Arc<MemoryStore>,
        credentials: Arc<dyn CredentialStore>,
        runs: Arc<dyn RunRecordStore>,
    ) -> Self {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "botrix-test-{}-{}",
            std::process::id(),
            seq
        ));
        std::fs::create_dir_all(&dir).expect("create test dir");
        let backtest_script = dir.join("backtest.sh");
        let live_script = dir.join("live.sh");
        std::fs::write(&backtest_script, backtest).expect("write backtest script");
        std::fs::write(&live_script, live).expect("write live script");

        let registry = Arc::new(JobRegistry::new(Duration::from_secs(300)));
        let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
        let ctx = Arc::new(JobContext::new(
            registry,
            credentials,
            store.clone(),
            runs,
            metrics,
            BotCommand {
                program: "/bin/sh".to_string(),
                backtest_script,
                live_script,
            },
            1000,
        ));

        let state = AppState {
            ctx: ctx.clone(),
            health: Arc::new(RwLock::new(HealthStatus::default())),
            start_time: Arc::new(Instant::now()),
        };
        let server = TestServer::new(create_router(state)).expect("start test server");

        Self {
            server,
            ctx,
            store,
            dir,
        }
    }

    pub async fn new() -> Self {
        Self::with_scripts("exit 0\n", "exit 0\n").await
    }

    pub async fn status(&self, job_id: &str) -> Value {
        self.server
            .get(&format!("/api/jobs/{}", job_id))
            .await
            .json()
    }

    /// Poll until the job leaves `running` (or fail after ~5s)
    pub async fn wait_for_terminal(&self, job_id: &str) -> Value {
        for _ in 0..100 {
            let body = self.status(job_id).await;
            if body["job"]["status"] != "running" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }
}

impl Drop for TestApiServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Credential store whose lookups take a while, so concurrent launches
/// overlap between the admission check and the handle insert.
pub struct SlowCredentials {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl CredentialStore for SlowCredentials {
    async fn get_credentials(
        &self,
        owner_id: i64,
    ) -> Result<Option<Credentials>, SupervisorError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.inner.get_credentials(owner_id).await
    }
}

/// Run record store that rejects every insert
pub struct UnavailableRuns;

#[async_trait]
impl RunRecordStore for UnavailableRuns {
    async fn insert_run_record(&self, _record: &RunRecord) -> Result<(), SupervisorError> {
        Err(SupervisorError::Storage(
            "run record store unavailable".to_string(),
        ))
    }

    async fn latest_run_record(
        &self,
        _owner_id: i64,
    ) -> Result<Option<RunRecord>, SupervisorError> {
        Ok(None)
    }

    async fn run_records_for_owner(
        &self,
        _owner_id: i64,
    ) -> Result<Vec<RunRecord>, SupervisorError> {
        Ok(Vec::new())
    }
}
