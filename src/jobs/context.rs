//! Job context for dependency injection
//!
//! Bundles the registry, the storage collaborators, and the bot command
//! template so handlers and tests can run against isolated instances
//! instead of process-wide singletons.

use crate::config::BotCommand;
use crate::db::{CredentialStore, RunRecordStore, SettingsStore};
use crate::jobs::registry::JobRegistry;
use crate::metrics::Metrics;
use std::sync::Arc;

pub struct JobContext {
    pub registry: Arc<JobRegistry>,
    pub credentials: Arc<dyn CredentialStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub runs: Arc<dyn RunRecordStore>,
    pub metrics: Arc<Metrics>,
    pub bot: BotCommand,
    pub log_buffer_cap: usize,
}

impl JobContext {
    pub fn new(
        registry: Arc<JobRegistry>,
        credentials: Arc<dyn CredentialStore>,
        settings: Arc<dyn SettingsStore>,
        runs: Arc<dyn RunRecordStore>,
        metrics: Arc<Metrics>,
        bot: BotCommand,
        log_buffer_cap: usize,
    ) -> Self {
        Self {
            registry,
            credentials,
            settings,
            runs,
            metrics,
            bot,
            log_buffer_cap,
        }
    }
}
