//! Botrix - supervisor for external trading bot processes
//!
//! Launches long-running backtest and live-trading programs, streams
//! their interleaved stdout/stderr into per-job log buffers, extracts
//! the embedded result payload, and serves job status over HTTP.

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
