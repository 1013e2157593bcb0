//! Postgres-backed durable store

use crate::db::{CredentialStore, RunRecordStore, SettingsStore};
use crate::error::SupervisorError;
use crate::models::{BacktestSummary, Credentials, JobSettings, OwnerSettings, RunRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls, Row};

pub struct PgStore {
    client: Client,
}

impl PgStore {
    /// Connect and initialize the schema. Callers treat failure as
    /// fatal: the supervisor does not start without its durable store.
    pub async fn connect(database_url: &str) -> Result<Self, SupervisorError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| SupervisorError::Storage(format!("failed to connect: {}", e)))?;

        // Drive the connection on its own task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SupervisorError> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS owner_settings (
                    owner_id BIGINT PRIMARY KEY,
                    balance DOUBLE PRECISION NOT NULL,
                    leverage INT NOT NULL,
                    max_risk DOUBLE PRECISION NOT NULL,
                    is_running BOOLEAN NOT NULL DEFAULT FALSE,
                    active_job_id TEXT
                );
                CREATE TABLE IF NOT EXISTS owner_credentials (
                    owner_id BIGINT PRIMARY KEY,
                    public_key TEXT NOT NULL,
                    secret_key TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS run_records (
                    id BIGSERIAL PRIMARY KEY,
                    owner_id BIGINT NOT NULL,
                    initial_balance DOUBLE PRECISION NOT NULL,
                    final_balance DOUBLE PRECISION NOT NULL,
                    net_profit DOUBLE PRECISION NOT NULL,
                    win_rate DOUBLE PRECISION NOT NULL,
                    max_drawdown DOUBLE PRECISION NOT NULL,
                    total_trades BIGINT NOT NULL,
                    winning_trades BIGINT NOT NULL,
                    losing_trades BIGINT NOT NULL,
                    settings_json TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );",
            )
            .await
            .map_err(|e| SupervisorError::Storage(format!("failed to create schema: {}", e)))
    }
}

fn storage_err(e: tokio_postgres::Error) -> SupervisorError {
    SupervisorError::Storage(e.to_string())
}

fn settings_row(row: &Row) -> OwnerSettings {
    OwnerSettings {
        owner_id: row.get("owner_id"),
        balance: row.get("balance"),
        leverage: row.get::<_, i32>("leverage") as u32,
        max_risk: row.get("max_risk"),
        is_running: row.get("is_running"),
        active_job_id: row.get("active_job_id"),
    }
}

fn run_record_row(row: &Row) -> Result<RunRecord, SupervisorError> {
    let settings_json: String = row.get("settings_json");
    let settings: JobSettings = serde_json::from_str(&settings_json)
        .map_err(|e| SupervisorError::Storage(format!("corrupt settings json: {}", e)))?;
    Ok(RunRecord {
        owner_id: row.get("owner_id"),
        summary: BacktestSummary {
            initial_balance: row.get("initial_balance"),
            final_balance: row.get("final_balance"),
            net_profit: row.get("net_profit"),
            win_rate: row.get("win_rate"),
            max_drawdown: row.get("max_drawdown"),
            total_trades: row.get("total_trades"),
            winning_trades: row.get("winning_trades"),
            losing_trades: row.get("losing_trades"),
        },
        settings,
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
    })
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_credentials(
        &self,
        owner_id: i64,
    ) -> Result<Option<Credentials>, SupervisorError> {
        let row = self
            .client
            .query_opt(
                "SELECT public_key, secret_key FROM owner_credentials WHERE owner_id = $1",
                &[&owner_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| Credentials {
            public: r.get("public_key"),
            secret: r.get("secret_key"),
        }))
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_settings(
        &self,
        owner_id: i64,
    ) -> Result<Option<OwnerSettings>, SupervisorError> {
        let row = self
            .client
            .query_opt("SELECT * FROM owner_settings WHERE owner_id = $1", &[&owner_id])
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(settings_row))
    }

    async fn put_settings(&self, settings: &OwnerSettings) -> Result<(), SupervisorError> {
        self.client
            .execute(
                "INSERT INTO owner_settings
                    (owner_id, balance, leverage, max_risk, is_running, active_job_id)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (owner_id) DO UPDATE SET
                    balance = EXCLUDED.balance,
                    leverage = EXCLUDED.leverage,
                    max_risk = EXCLUDED.max_risk,
                    is_running = EXCLUDED.is_running,
                    active_job_id = EXCLUDED.active_job_id",
                &[
                    &settings.owner_id,
                    &settings.balance,
                    &(settings.leverage as i32),
                    &settings.max_risk,
                    &settings.is_running,
                    &settings.active_job_id,
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn set_live_flag(
        &self,
        owner_id: i64,
        running: bool,
        job_id: Option<&str>,
    ) -> Result<(), SupervisorError> {
        let updated = self
            .client
            .execute(
                "UPDATE owner_settings SET is_running = $2, active_job_id = $3
                 WHERE owner_id = $1",
                &[&owner_id, &running, &job_id],
            )
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            let mut defaults = OwnerSettings::defaults_for(owner_id);
            defaults.is_running = running;
            defaults.active_job_id = job_id.map(String::from);
            self.put_settings(&defaults).await?;
        }
        Ok(())
    }

    async fn owners_with_running_flag(&self) -> Result<Vec<i64>, SupervisorError> {
        let rows = self
            .client
            .query(
                "SELECT owner_id FROM owner_settings WHERE is_running = TRUE",
                &[],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.iter().map(|r| r.get("owner_id")).collect())
    }
}

#[async_trait]
impl RunRecordStore for PgStore {
    async fn insert_run_record(&self, record: &RunRecord) -> Result<(), SupervisorError> {
        let settings_json = serde_json::to_string(&record.settings)
            .map_err(|e| SupervisorError::Storage(e.to_string()))?;
        self.client
            .execute(
                "INSERT INTO run_records
                    (owner_id, initial_balance, final_balance, net_profit, win_rate,
                     max_drawdown, total_trades, winning_trades, losing_trades,
                     settings_json, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &record.owner_id,
                    &record.summary.initial_balance,
                    &record.summary.final_balance,
                    &record.summary.net_profit,
                    &record.summary.win_rate,
                    &record.summary.max_drawdown,
                    &record.summary.total_trades,
                    &record.summary.winning_trades,
                    &record.summary.losing_trades,
                    &settings_json,
                    &record.created_at,
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn latest_run_record(
        &self,
        owner_id: i64,
    ) -> Result<Option<RunRecord>, SupervisorError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM run_records WHERE owner_id = $1
                 ORDER BY created_at DESC LIMIT 1",
                &[&owner_id],
            )
            .await
            .map_err(storage_err)?;
        row.as_ref().map(run_record_row).transpose()
    }

    async fn run_records_for_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<RunRecord>, SupervisorError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM run_records WHERE owner_id = $1
                 ORDER BY created_at DESC",
                &[&owner_id],
            )
            .await
            .map_err(storage_err)?;
        rows.iter().map(run_record_row).collect()
    }
}
