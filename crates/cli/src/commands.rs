//! Handlers for every `queuectl` subcommand.
//!
//! One-shot handlers write their human-readable result to `out` and return
//! errors to `main`, which prints them and exits non-zero.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use queuectl_core::{parse_job, validate_entry, Job, JobId, JobState, DEFAULT_TIMEOUT};
use queuectl_infra::jobs::{JobStore, LivenessMarker, PoolConfig, PoolError, WorkerPool};
use queuectl_infra::{ConfigStore, MetricsRecorder, QueueSettings};

const RULE_WIDTH: usize = 80;

/// Validate a JSON submission and persist it as a pending job.
pub async fn enqueue<S, W>(store: &S, payload: &str, out: &mut W) -> Result<JobId>
where
    S: JobStore + ConfigStore,
    W: Write,
{
    let settings = QueueSettings::load(store)
        .await
        .context("failed to read configuration")?;
    let job = parse_job(payload, settings.max_retries)?;
    let job = store.create(job).await.context("failed to enqueue job")?;

    writeln!(out, "Job enqueued successfully: {}", job.id)?;
    Ok(job.id)
}

/// Run a pool of `count` workers until `shutdown` fires, then drain it.
pub async fn run_workers<S>(
    store: Arc<S>,
    marker: LivenessMarker,
    count: usize,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: JobStore + MetricsRecorder + ConfigStore + 'static,
{
    let settings = QueueSettings::load(store.as_ref())
        .await
        .context("failed to read configuration")?;
    let config = PoolConfig::default()
        .with_retry_policy(settings.retry_policy())
        .with_marker(marker);

    let mut pool = WorkerPool::new(store, config);
    pool.start(count).context("failed to start workers")?;
    info!(
        workers = count,
        backoff_base = settings.backoff_base,
        "workers running; press Ctrl+C to stop"
    );

    shutdown.cancelled().await;
    pool.stop().await.context("failed to stop workers")?;
    Ok(())
}

/// Ask the pool named by the liveness marker to stop.
pub fn stop_workers<W: Write>(marker: &LivenessMarker, out: &mut W) -> Result<()> {
    match marker.signal_stop() {
        Ok(pool) => {
            writeln!(
                out,
                "Sent stop signal to worker process (PID: {}). Waiting for graceful shutdown...",
                pool.pid
            )?;
            Ok(())
        }
        Err(PoolError::NotRunning) => {
            writeln!(out, "No workers are running")?;
            Ok(())
        }
        Err(e) => Err(e).context("failed to stop workers"),
    }
}

pub async fn status<S, W>(store: &S, marker: &LivenessMarker, out: &mut W) -> Result<()>
where
    S: JobStore,
    W: Write,
{
    let counts = store
        .counts_by_state()
        .await
        .context("failed to count jobs")?;
    let workers = marker
        .active()
        .context("failed to read worker pid file")?
        .map(|m| m.workers)
        .unwrap_or(0);

    writeln!(out, "Job Queue Status")?;
    writeln!(out, "================")?;
    for state in JobState::ALL {
        let label = format!("{}:", capitalize(state.as_str()));
        writeln!(out, "{label:<12}{}", counts.get(state))?;
    }
    writeln!(out)?;
    writeln!(out, "Active Workers: {workers}")?;
    Ok(())
}

pub async fn list<S, W>(store: &S, state: Option<JobState>, out: &mut W) -> Result<()>
where
    S: JobStore,
    W: Write,
{
    let jobs = match state {
        Some(state) => store.list_by_state(state).await,
        None => store.list_all().await,
    }
    .context("failed to list jobs")?;

    if jobs.is_empty() {
        match state {
            Some(state) => writeln!(out, "No jobs found with state: {state}")?,
            None => writeln!(out, "No jobs found")?,
        }
        return Ok(());
    }

    write_job_table(&jobs, out)
}

pub async fn dlq_list<S, W>(store: &S, out: &mut W) -> Result<()>
where
    S: JobStore,
    W: Write,
{
    let jobs = store
        .list_by_state(JobState::Dead)
        .await
        .context("failed to list dead letter queue")?;

    if jobs.is_empty() {
        writeln!(out, "No jobs in Dead Letter Queue")?;
        return Ok(());
    }

    writeln!(out, "Dead Letter Queue Jobs ({})", jobs.len())?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    write_job_table(&jobs, out)
}

pub async fn dlq_retry<S, W>(store: &S, id: &str, out: &mut W) -> Result<()>
where
    S: JobStore,
    W: Write,
{
    let id = JobId::new(id)?;
    store
        .retry_dead(&id)
        .await
        .with_context(|| format!("failed to retry job {id}"))?;

    writeln!(out, "Job {id} has been reset to pending state and will be retried")?;
    Ok(())
}

pub async fn config_set<S, W>(store: &S, key: &str, value: &str, out: &mut W) -> Result<()>
where
    S: ConfigStore,
    W: Write,
{
    validate_entry(key, value)?;
    store
        .set_config(key, value)
        .await
        .with_context(|| format!("failed to set {key}"))?;

    writeln!(out, "Configuration '{key}' set to '{value}'")?;
    Ok(())
}

pub async fn config_get<S, W>(store: &S, key: &str, out: &mut W) -> Result<()>
where
    S: ConfigStore,
    W: Write,
{
    let Some(value) = store
        .get_config(key)
        .await
        .with_context(|| format!("failed to read {key}"))?
    else {
        bail!("configuration key not found: {key}");
    };

    writeln!(out, "{value}")?;
    Ok(())
}

pub async fn config_list<S, W>(store: &S, out: &mut W) -> Result<()>
where
    S: ConfigStore,
    W: Write,
{
    let entries = store
        .list_config()
        .await
        .context("failed to list configuration")?;

    if entries.is_empty() {
        writeln!(out, "No configuration set")?;
        return Ok(());
    }

    writeln!(out, "Configuration:")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "{:<20} {}", "KEY", "VALUE")?;
    writeln!(out, "{}", "-".repeat(50))?;
    for entry in entries {
        writeln!(out, "{:<20} {}", entry.key, entry.value)?;
    }
    Ok(())
}

pub async fn show<S, W>(store: &S, id: &str, out: &mut W) -> Result<()>
where
    S: JobStore,
    W: Write,
{
    let id = JobId::new(id)?;
    let Some(job) = store
        .get(&id)
        .await
        .with_context(|| format!("failed to load job {id}"))?
    else {
        bail!("job not found: {id}");
    };

    writeln!(out, "Job Details")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out, "{:<20} {}", "ID:", job.id)?;
    writeln!(out, "{:<20} {}", "Command:", job.command)?;
    writeln!(out, "{:<20} {}", "State:", job.state)?;
    writeln!(out, "{:<20} {}", "Attempts:", job.attempts)?;
    writeln!(out, "{:<20} {}", "Max Retries:", job.max_retries)?;
    match job.timeout_seconds {
        Some(secs) => writeln!(out, "{:<20} {secs} seconds", "Timeout:")?,
        None => writeln!(
            out,
            "{:<20} default ({} minutes)",
            "Timeout:",
            DEFAULT_TIMEOUT.as_secs() / 60
        )?,
    }
    writeln!(out, "{:<20} {}", "Created At:", job.created_at.to_rfc3339())?;
    writeln!(out, "{:<20} {}", "Updated At:", job.updated_at.to_rfc3339())?;
    if let Some(retry_at) = job.next_retry_at {
        writeln!(out, "{:<20} {}", "Next Retry At:", retry_at.to_rfc3339())?;
    }
    if let Some(worker) = &job.locked_by {
        writeln!(out, "{:<20} {worker}", "Locked By:")?;
    }
    if !job.last_error.is_empty() {
        writeln!(out, "{:<20} {}", "Last Error:", job.last_error)?;
    }

    writeln!(out)?;
    writeln!(out, "Output")?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    if job.output.is_empty() {
        writeln!(out, "(No output available)")?;
    } else {
        writeln!(out, "{}", job.output)?;
    }
    Ok(())
}

fn write_job_table<W: Write>(jobs: &[Job], out: &mut W) -> Result<()> {
    writeln!(
        out,
        "{:<20} {:<12} {:<10} {:<12} {:<25}",
        "ID", "STATE", "ATTEMPTS", "MAX_RETRIES", "CREATED_AT"
    )?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    for job in jobs {
        writeln!(
            out,
            "{:<20} {:<12} {:<10} {:<12} {:<25}",
            job.id.as_str(),
            job.state.as_str(),
            job.attempts,
            job.max_retries,
            job.created_at.to_rfc3339()
        )?;
    }
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
