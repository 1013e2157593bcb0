//! Durable storage collaborators
//!
//! The supervisor only ever touches storage through these traits:
//! credentials for live launches, the per-owner settings row carrying
//! the live flag, and the immutable run records written for completed
//! backtests. `PgStore` is the production implementation; `MemoryStore`
//! backs tests and credential-less local runs.

pub mod memory;
pub mod postgres;

use crate::error::SupervisorError;
use crate::models::{Credentials, OwnerSettings, RunRecord};
use async_trait::async_trait;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credentials(
        &self,
        owner_id: i64,
    ) -> Result<Option<Credentials>, SupervisorError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self, owner_id: i64)
        -> Result<Option<OwnerSettings>, SupervisorError>;

    /// Upsert the whole settings row (at most one per owner)
    async fn put_settings(&self, settings: &OwnerSettings) -> Result<(), SupervisorError>;

    /// Mutate only the live flag and active job id
    async fn set_live_flag(
        &self,
        owner_id: i64,
        running: bool,
        job_id: Option<&str>,
    ) -> Result<(), SupervisorError>;

    /// Owners whose settings row still claims a running live job
    async fn owners_with_running_flag(&self) -> Result<Vec<i64>, SupervisorError>;
}

#[async_trait]
pub trait RunRecordStore: Send + Sync {
    async fn insert_run_record(&self, record: &RunRecord) -> Result<(), SupervisorError>;

    async fn latest_run_record(
        &self,
        owner_id: i64,
    ) -> Result<Option<RunRecord>, SupervisorError>;

    /// Every run record for the owner, newest first
    async fn run_records_for_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<RunRecord>, SupervisorError>;
}

pub use memory::MemoryStore;
pub use postgres::PgStore;
