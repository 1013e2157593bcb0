//! HTTP endpoint server using Axum

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::error::SupervisorError;
use crate::jobs::launcher::{settle, start_job, LaunchRequest};
use crate::jobs::JobContext;
use crate::models::{
    parse_job_id, JobKind, JobSettings, JobSnapshot, JobStatus, OwnerSettings,
};

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<JobContext>,
    pub health: Arc<RwLock<HealthStatus>>,
    pub start_time: Arc<Instant>,
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "uptime_seconds": uptime_seconds,
        "service": "botrix-job-supervisor"
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .ctx
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.ctx.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.ctx.metrics.http_requests_in_flight.dec();

    state.ctx.metrics.http_requests_total.inc();
    state
        .ctx
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBacktestRequest {
    owner_id: i64,
    balance: f64,
    leverage: u32,
    period: Option<String>,
    timeframe: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartLiveRequest {
    owner_id: i64,
    balance: f64,
    leverage: u32,
    max_risk: Option<f64>,
}

async fn start_backtest(
    State(state): State<AppState>,
    Json(request): Json<StartBacktestRequest>,
) -> Result<Json<Value>, SupervisorError> {
    let job_id = start_job(
        &state.ctx,
        LaunchRequest {
            kind: JobKind::Backtest,
            owner_id: request.owner_id,
            settings: JobSettings {
                balance: request.balance,
                leverage: request.leverage,
                period: request.period,
                timeframe: request.timeframe,
                max_risk: None,
            },
        },
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Backtest started",
        "jobId": job_id
    })))
}

async fn start_live(
    State(state): State<AppState>,
    Json(request): Json<StartLiveRequest>,
) -> Result<Json<Value>, SupervisorError> {
    let job_id = start_job(
        &state.ctx,
        LaunchRequest {
            kind: JobKind::Live,
            owner_id: request.owner_id,
            settings: JobSettings {
                balance: request.balance,
                leverage: request.leverage,
                period: None,
                timeframe: None,
                max_risk: request.max_risk,
            },
        },
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Live trading started",
        "jobId": job_id
    })))
}

/// Poll a job's current state.
///
/// Registry first; after eviction a backtest id falls back to the
/// owner's most recent persisted run record, synthesized as a completed
/// snapshot with empty logs.
async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, SupervisorError> {
    if let Some(snapshot) = state.ctx.registry.snapshot(&id).await {
        return Ok(Json(json!({ "success": true, "job": snapshot })));
    }

    if let Some((JobKind::Backtest, owner_id)) = parse_job_id(&id) {
        if let Some(record) = state.ctx.runs.latest_run_record(owner_id).await? {
            let snapshot = JobSnapshot {
                id,
                kind: JobKind::Backtest,
                status: JobStatus::Completed,
                logs: Vec::new(),
                start_time: record.created_at,
                end_time: Some(record.created_at),
                settings: record.settings,
                result: Some(record.summary),
                live: None,
            };
            return Ok(Json(json!({ "success": true, "job": snapshot })));
        }
    }

    Err(SupervisorError::NotFound)
}

/// Stop a running job. A second stop on the same job is a no-op, never
/// an error.
async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, SupervisorError> {
    match state.ctx.registry.stop(&id).await? {
        Some(completion) => {
            settle(&state.ctx, &id, completion).await;
            Ok(Json(json!({ "success": true, "message": "Job stopped" })))
        }
        None => Ok(Json(json!({
            "success": false,
            "message": "Job already finished"
        }))),
    }
}

async fn owner_jobs(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Value>, SupervisorError> {
    let jobs = state.ctx.registry.snapshots_for_owner(owner_id).await;
    Ok(Json(json!({ "success": true, "jobs": jobs })))
}

/// Full backtest history for an owner, newest first
async fn owner_results(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Value>, SupervisorError> {
    let results = state.ctx.runs.run_records_for_owner(owner_id).await?;
    Ok(Json(json!({ "success": true, "results": results })))
}

/// Durable per-owner settings; a default row is created on first read
async fn owner_settings(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<Json<Value>, SupervisorError> {
    let settings = match state.ctx.settings.get_settings(owner_id).await? {
        Some(settings) => settings,
        None => {
            let defaults = OwnerSettings::defaults_for(owner_id);
            state.ctx.settings.put_settings(&defaults).await?;
            defaults
        }
    };
    Ok(Json(json!({ "success": true, "settings": settings })))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/jobs/backtest", post(start_backtest))
        .route("/api/jobs/live", post(start_live))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/jobs/{id}/stop", post(stop_job))
        .route("/api/owners/{ownerId}/jobs", get(owner_jobs))
        .route("/api/owners/{ownerId}/results", get(owner_results))
        .route("/api/owners/{ownerId}/settings", get(owner_settings))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(
    port: u16,
    ctx: Arc<JobContext>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState {
        ctx,
        health: Arc::new(RwLock::new(HealthStatus::default())),
        start_time: Arc::new(Instant::now()),
    };
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    axum::serve(listener, app).await?;

    Ok(())
}
