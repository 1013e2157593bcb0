//! External process launcher and per-job ingestion loop
//!
//! Spawning returns the job id synchronously; one tokio task per job
//! then owns the child process, feeds its stdout/stderr through the
//! output classifier, and reconciles the eventual exit with the
//! registry. Credentials travel only through the child's environment,
//! never argv.

use crate::error::SupervisorError;
use crate::jobs::classifier::{OutputClassifier, OutputEvent, StreamOrigin};
use crate::jobs::context::JobContext;
use crate::jobs::registry::JobCompletion;
use crate::jobs::telemetry::TelemetryPatterns;
use crate::models::{Credentials, JobHandle, JobKind, JobSettings, JobStatus, LogSeverity};
use chrono::Utc;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

const PUBLIC_KEY_ENV: &str = "BITFINEX_PUBLIC_KEY";
const SECRET_KEY_ENV: &str = "BITFINEX_SECRET_KEY";

pub struct LaunchRequest {
    pub kind: JobKind,
    pub owner_id: i64,
    pub settings: JobSettings,
}

/// Validate, admit, and launch a job. Returns the new job id
/// immediately; all further activity is asynchronous.
pub async fn start_job(
    ctx: &Arc<JobContext>,
    req: LaunchRequest,
) -> Result<String, SupervisorError> {
    if !(req.settings.balance > 0.0) {
        return Err(SupervisorError::InvalidSettings(
            "a positive balance is required".to_string(),
        ));
    }

    // Fast-fail check; the authoritative one happens atomically at
    // insert time below, after the credential lookup has awaited.
    let credentials = match req.kind {
        JobKind::Live => {
            if ctx.registry.has_running_live(req.owner_id).await {
                return Err(SupervisorError::AlreadyRunning);
            }
            Some(
                ctx.credentials
                    .get_credentials(req.owner_id)
                    .await?
                    .ok_or(SupervisorError::MissingCredentials)?,
            )
        }
        JobKind::Backtest => None,
    };

    let job_id = format!(
        "{}-{}-{}",
        req.kind.as_str(),
        req.owner_id,
        Utc::now().timestamp_millis()
    );

    let handle = JobHandle::new(
        job_id.clone(),
        req.kind,
        req.owner_id,
        req.settings.clone(),
        ctx.log_buffer_cap,
    );
    let stop_rx = handle.subscribe_stop();
    let entry = match req.kind {
        JobKind::Live => ctx.registry.try_insert_live(handle).await?,
        JobKind::Backtest => ctx.registry.insert(handle).await,
    };

    info!(
        job_id = %job_id,
        owner_id = req.owner_id,
        kind = req.kind.as_str(),
        "launching external job"
    );

    let mut command = build_command(ctx, req.kind, req.owner_id, &req.settings, credentials);
    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            // Launch error: the handle exists and is finalized failed
            error!(job_id = %job_id, error = %e, "failed to spawn external process");
            {
                let mut handle = entry.lock().await;
                handle.push_log(
                    LogSeverity::Error,
                    format!("failed to start process: {}", e),
                );
            }
            if let Some(completion) = ctx.registry.finalize(&job_id, None, None).await {
                settle(ctx, &job_id, completion).await;
            }
            return Ok(job_id);
        }
    };

    if req.kind == JobKind::Live {
        // Record the durable live flag so a restart can reconcile it
        let mut settings = ctx
            .settings
            .get_settings(req.owner_id)
            .await?
            .unwrap_or_else(|| crate::models::OwnerSettings::defaults_for(req.owner_id));
        settings.balance = req.settings.balance;
        settings.leverage = req.settings.leverage;
        if let Some(max_risk) = req.settings.max_risk {
            settings.max_risk = max_risk;
        }
        settings.is_running = true;
        settings.active_job_id = Some(job_id.clone());
        ctx.settings.put_settings(&settings).await?;
    }

    ctx.metrics.jobs_started_total.inc();
    ctx.metrics.jobs_active.inc();

    let ctx = Arc::clone(ctx);
    let id = job_id.clone();
    tokio::spawn(async move {
        run_ingestion(ctx, id, entry, child, stop_rx).await;
    });

    Ok(job_id)
}

fn build_command(
    ctx: &JobContext,
    kind: JobKind,
    owner_id: i64,
    settings: &JobSettings,
    credentials: Option<Credentials>,
) -> Command {
    let script = match kind {
        JobKind::Backtest => &ctx.bot.backtest_script,
        JobKind::Live => &ctx.bot.live_script,
    };
    let mut command = Command::new(&ctx.bot.program);
    command
        .arg(script)
        .arg("--balance")
        .arg(settings.balance.to_string())
        .arg("--leverage")
        .arg(settings.leverage.to_string())
        .arg("--user-id")
        .arg(owner_id.to_string());

    match kind {
        JobKind::Backtest => {
            command
                .arg("--mode")
                .arg("backtest")
                .arg("--period")
                .arg(settings.period.as_deref().unwrap_or("7"))
                .arg("--timeframe")
                .arg(settings.timeframe.as_deref().unwrap_or("1m"));
        }
        JobKind::Live => {
            command
                .arg("--max-risk")
                .arg(settings.max_risk.unwrap_or(2.0).to_string());
        }
    }

    if let Some(creds) = credentials {
        command.env(PUBLIC_KEY_ENV, creds.public);
        command.env(SECRET_KEY_ENV, creds.secret);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Single-writer ingestion loop: reads both streams chunk-wise, applies
/// classifier events to the handle, waits for exit, then finalizes.
async fn run_ingestion(
    ctx: Arc<JobContext>,
    job_id: String,
    entry: Arc<Mutex<JobHandle>>,
    mut child: Child,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut classifier = OutputClassifier::new();
    let telemetry = TelemetryPatterns::new();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();
    let mut stop_seen = false;
    let mut exit_code = None;

    loop {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf), if stdout_open => {
                match read {
                    Ok(0) | Err(_) => stdout_open = false,
                    Ok(n) => {
                        let events = classifier.push_chunk(StreamOrigin::Stdout, &out_buf[..n]);
                        apply_events(&entry, &telemetry, events).await;
                    }
                }
            }
            read = read_chunk(&mut stderr, &mut err_buf), if stderr_open => {
                match read {
                    Ok(0) | Err(_) => stderr_open = false,
                    Ok(n) => {
                        let events = classifier.push_chunk(StreamOrigin::Stderr, &err_buf[..n]);
                        apply_events(&entry, &telemetry, events).await;
                    }
                }
            }
            status = child.wait() => {
                match status {
                    Ok(status) => exit_code = status.code(),
                    Err(e) => warn!(job_id = %job_id, error = %e, "wait on child process failed"),
                }
                break;
            }
            changed = stop_rx.changed(), if !stop_seen => {
                stop_seen = true;
                if changed.is_ok() {
                    if let Err(e) = child.start_kill() {
                        warn!(job_id = %job_id, error = %e, "failed to kill child process");
                    }
                }
            }
        }
    }

    // Drain whatever the process flushed before exiting
    if stdout_open {
        if let Some(mut stream) = stdout.take() {
            loop {
                match stream.read(&mut out_buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let events = classifier.push_chunk(StreamOrigin::Stdout, &out_buf[..n]);
                        apply_events(&entry, &telemetry, events).await;
                    }
                }
            }
        }
    }
    if stderr_open {
        if let Some(mut stream) = stderr.take() {
            loop {
                match stream.read(&mut err_buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let events = classifier.push_chunk(StreamOrigin::Stderr, &err_buf[..n]);
                        apply_events(&entry, &telemetry, events).await;
                    }
                }
            }
        }
    }
    let trailing = classifier.flush();
    apply_events(&entry, &telemetry, trailing).await;

    let payload = classifier.take_payload();
    if let Some(completion) = ctx
        .registry
        .finalize(&job_id, exit_code, payload)
        .await
    {
        settle(&ctx, &job_id, completion).await;
    } else if stop_seen {
        // Stop path already settled the handle; the flag was cleared
        // there as well.
        info!(job_id = %job_id, "process exit reconciled after stop");
    }

    ctx.metrics.jobs_active.dec();
}

/// Persist the outcome and clear the durable live flag.
///
/// The terminal counters reflect the post-persistence status: a
/// completed backtest whose record cannot be written counts as failed.
pub(crate) async fn settle(ctx: &Arc<JobContext>, job_id: &str, completion: JobCompletion) {
    let mut status = completion.status;
    if let Some(record) = completion.record {
        if let Err(e) = ctx.runs.insert_run_record(&record).await {
            error!(job_id = %job_id, error = %e, "failed to persist run record");
            ctx.registry
                .mark_persist_failure(job_id, "failed to persist run record")
                .await;
            status = JobStatus::Failed;
        }
    }

    ctx.metrics.record_terminal(status);
    ctx.metrics
        .job_duration_seconds
        .observe(completion.duration_secs);

    if completion.kind == JobKind::Live && status != JobStatus::Running {
        if let Err(e) = ctx
            .settings
            .set_live_flag(completion.owner_id, false, None)
            .await
        {
            error!(
                job_id = %job_id,
                owner_id = completion.owner_id,
                error = %e,
                "failed to clear live flag"
            );
        }
    }
}

async fn read_chunk<R: AsyncReadExt + Unpin>(
    stream: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stream.as_mut() {
        Some(stream) => stream.read(buf).await,
        None => Ok(0),
    }
}

async fn apply_events(
    entry: &Arc<Mutex<JobHandle>>,
    telemetry: &TelemetryPatterns,
    events: Vec<OutputEvent>,
) {
    if events.is_empty() {
        return;
    }
    let mut handle = entry.lock().await;
    for event in events {
        match event {
            OutputEvent::Log(log) => {
                if handle.kind == JobKind::Live {
                    telemetry.apply(&log.message, &mut handle.live_state);
                }
                handle.push_entry(log);
            }
            OutputEvent::Payload(_) => {
                // Classifier retains the payload until finalization
            }
        }
    }
}
