//! Persisted records and external-collaborator data shapes

use crate::models::job::JobSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary metrics embedded in a backtest run's output payload.
///
/// `win_rate` and `max_drawdown` are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub net_profit: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
}

/// One immutable row per completed backtest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub owner_id: i64,
    #[serde(flatten)]
    pub summary: BacktestSummary,
    pub settings: JobSettings,
    pub created_at: DateTime<Utc>,
}

/// Durable per-owner settings row, at most one per owner.
///
/// `is_running` / `active_job_id` form the live flag that boot-time
/// recovery reconciles after a process-manager restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSettings {
    pub owner_id: i64,
    pub balance: f64,
    pub leverage: u32,
    pub max_risk: f64,
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
}

impl OwnerSettings {
    /// Defaults created on first settings read for an owner
    pub fn defaults_for(owner_id: i64) -> Self {
        Self {
            owner_id,
            balance: 1000.0,
            leverage: 1,
            max_risk: 2.0,
            is_running: false,
            active_job_id: None,
        }
    }
}

/// Exchange API key pair, opaque to the supervisor
#[derive(Debug, Clone)]
pub struct Credentials {
    pub public: String,
    pub secret: String,
}
