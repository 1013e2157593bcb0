//! Environment-based configuration
//!
//! All settings come from environment variables (loaded from `.env` by
//! the binaries) with sensible local-development defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Get the current environment (production, sandbox, development)
pub fn get_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// HTTP port for the API server
pub fn get_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

/// Postgres connection string for the durable store
pub fn get_database_url() -> String {
    env::var("DATABASE_URL")
        .unwrap_or_else(|_| "host=localhost port=5432 user=postgres dbname=botrix".to_string())
}

/// How long terminal job handles stay queryable before eviction
pub fn get_job_retention() -> Duration {
    let secs = env::var("JOB_RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300);
    Duration::from_secs(secs)
}

/// Cap on the in-memory log ring buffer per job (oldest entries drop)
pub fn get_log_buffer_cap() -> usize {
    env::var("LOG_BUFFER_CAP")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
}

/// Interpreter and scripts for the external bot programs
#[derive(Debug, Clone)]
pub struct BotCommand {
    pub program: String,
    pub backtest_script: PathBuf,
    pub live_script: PathBuf,
}

impl BotCommand {
    pub fn from_env() -> Self {
        Self {
            program: env::var("BOT_PROGRAM").unwrap_or_else(|_| "python3".to_string()),
            backtest_script: env::var("BACKTEST_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("Backend-Bot/backtest.py")),
            live_script: env::var("LIVE_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("Backend-Bot/live_trading.py")),
        }
    }
}
