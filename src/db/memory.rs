//! In-memory store for tests and local development

use crate::db::{CredentialStore, RunRecordStore, SettingsStore};
use crate::error::SupervisorError;
use crate::models::{Credentials, OwnerSettings, RunRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<i64, Credentials>>,
    settings: RwLock<HashMap<i64, OwnerSettings>>,
    runs: RwLock<Vec<RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed credentials for an owner (tests)
    pub async fn add_credentials(&self, owner_id: i64, public: &str, secret: &str) {
        self.credentials.write().await.insert(
            owner_id,
            Credentials {
                public: public.to_string(),
                secret: secret.to_string(),
            },
        );
    }

    pub async fn run_record_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credentials(
        &self,
        owner_id: i64,
    ) -> Result<Option<Credentials>, SupervisorError> {
        Ok(self.credentials.read().await.get(&owner_id).cloned())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(
        &self,
        owner_id: i64,
    ) -> Result<Option<OwnerSettings>, SupervisorError> {
        Ok(self.settings.read().await.get(&owner_id).cloned())
    }

    async fn put_settings(&self, settings: &OwnerSettings) -> Result<(), SupervisorError> {
        self.settings
            .write()
            .await
            .insert(settings.owner_id, settings.clone());
        Ok(())
    }

    async fn set_live_flag(
        &self,
        owner_id: i64,
        running: bool,
        job_id: Option<&str>,
    ) -> Result<(), SupervisorError> {
        let mut settings = self.settings.write().await;
        let entry = settings
            .entry(owner_id)
            .or_insert_with(|| OwnerSettings::defaults_for(owner_id));
        entry.is_running = running;
        entry.active_job_id = job_id.map(String::from);
        Ok(())
    }

    async fn owners_with_running_flag(&self) -> Result<Vec<i64>, SupervisorError> {
        Ok(self
            .settings
            .read()
            .await
            .values()
            .filter(|s| s.is_running)
            .map(|s| s.owner_id)
            .collect())
    }
}

#[async_trait]
impl RunRecordStore for MemoryStore {
    async fn insert_run_record(&self, record: &RunRecord) -> Result<(), SupervisorError> {
        self.runs.write().await.push(record.clone());
        Ok(())
    }

    async fn latest_run_record(
        &self,
        owner_id: i64,
    ) -> Result<Option<RunRecord>, SupervisorError> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn run_records_for_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<RunRecord>, SupervisorError> {
        let mut records: Vec<RunRecord> = self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
