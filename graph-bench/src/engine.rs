//! Benchmark run orchestration.
//!
//! Spawns one task per worker, the aggregator, the progress reporter and a
//! supervisor over the worker [`JoinSet`]. Whatever stops the run, the
//! cumulative statistics merged so far are returned.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::executor::QueryExecutor;
use crate::limiter::RequestLimiter;
use crate::reporter::ProgressReporter;
use crate::shutdown::{ShutdownSignal, StopReason};
use crate::stats::{AggregateStats, InstantStats, ProgressCounters};
use crate::worker::{plan_workers, run_worker, ErrorPolicy, WorkerContext};
use crate::workload::WorkloadSpec;

/// Run parameters resolved from configuration and command line
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: u64,
    /// Records the aggregator waits for before stopping the run
    pub total_requests: u64,
    /// Workers ignore their quota and run until stopped
    pub continuous: bool,
    pub rate_cap: Option<u32>,
    pub seed: u64,
    pub error_policy: ErrorPolicy,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
    pub update_tick: Duration,
    pub exclude_failed_latency: bool,
    pub log_queries: bool,
    pub show_progress: bool,
}

impl EngineSettings {
    pub fn from_config(config: &BenchConfig, continuous: bool, log_queries: bool) -> Self {
        Self {
            workers: config.parameters.num_clients,
            total_requests: config.parameters.num_requests,
            continuous,
            rate_cap: config.rate_cap(),
            seed: config.parameters.random_seed,
            error_policy: ErrorPolicy::from_continue_flag(config.continue_on_error),
            queue_capacity: config.queue_capacity(),
            drain_timeout: config.drain_timeout(),
            update_tick: config.update_tick(),
            exclude_failed_latency: config.latency.exclude_failed,
            log_queries,
            show_progress: true,
        }
    }
}

/// Everything a finished run hands to result compilation
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: AggregateStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub reason: StopReason,
    /// Requests the workers completed, including any the aggregator never saw
    pub issued: u64,
}

impl RunOutcome {
    /// Requests that finished but never reached the statistics, e.g. when
    /// the drain timed out
    pub fn unaggregated(&self) -> u64 {
        self.issued.saturating_sub(self.stats.total_requests())
    }
}

/// Drive `executors` (one per worker) through the workload until the run stops
pub async fn run_benchmark<E: QueryExecutor>(
    spec: Arc<WorkloadSpec>,
    settings: &EngineSettings,
    executors: Vec<E>,
    shutdown: ShutdownSignal,
) -> Result<RunOutcome> {
    if settings.workers == 0 {
        return Err(BenchError::Config("at least one worker is required".to_string()));
    }
    if executors.len() as u64 != settings.workers {
        return Err(BenchError::Config(format!(
            "{} executors supplied for {} workers",
            executors.len(),
            settings.workers
        )));
    }

    let distribution = Arc::new(spec.distribution()?);
    let query_count = spec.query_count();
    let cumulative =
        AggregateStats::new(query_count)?.exclude_failed_latency(settings.exclude_failed_latency);
    let instant = InstantStats::new(
        AggregateStats::new(query_count)?.exclude_failed_latency(settings.exclude_failed_latency),
    );
    let progress = Arc::new(ProgressCounters::new());
    let limiter = Arc::new(RequestLimiter::from_cap(settings.rate_cap, settings.workers)?);
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));

    let plans = plan_workers(settings.total_requests, settings.workers, settings.continuous);
    let per_worker = settings.total_requests / settings.workers;
    let remainder = settings.total_requests % settings.workers;
    info!(
        clients = settings.workers,
        per_client = per_worker,
        total = settings.total_requests,
        continuous = settings.continuous,
        "Starting benchmark"
    );
    if remainder > 0 && !settings.continuous {
        info!(requests = per_worker + remainder, "Last client absorbs the remainder");
    }

    let started_at = Utc::now();
    let started = Instant::now();

    let aggregator = tokio::spawn(
        Aggregator::new(cumulative, instant.clone(), Arc::clone(&progress), settings.total_requests)
            .run(rx, shutdown.clone(), settings.drain_timeout),
    );

    let reporter = settings.show_progress.then(|| {
        let total = (!settings.continuous).then_some(settings.total_requests);
        let reporter = ProgressReporter::new(Arc::clone(&progress), instant, settings.update_tick, total);
        tokio::spawn(reporter.run(shutdown.clone()))
    });

    let mut workers = JoinSet::new();
    for (plan, executor) in plans.into_iter().zip(executors) {
        let ctx = WorkerContext {
            spec: Arc::clone(&spec),
            distribution: Arc::clone(&distribution),
            limiter: Arc::clone(&limiter),
            results: tx.clone(),
            shutdown: shutdown.clone(),
            error_policy: settings.error_policy,
            seed: settings.seed,
            log_queries: settings.log_queries,
        };
        workers.spawn(run_worker(ctx, plan, executor));
    }
    // the queue closes once every worker has dropped its sender
    drop(tx);

    let mut supervisor = tokio::spawn(supervise(workers, shutdown.clone()));

    let stats = aggregator
        .await
        .map_err(|e| BenchError::Other(format!("aggregator task failed: {}", e)))?;

    // The aggregator only returns once the run is stopping, so workers are
    // finishing their current request at most.
    let issued = match tokio::time::timeout(settings.drain_timeout, &mut supervisor).await {
        Ok(Ok(issued)) => issued,
        Ok(Err(e)) => {
            error!(error = %e, "Supervisor task failed");
            stats.total_requests()
        }
        Err(_) => {
            warn!("Workers did not stop within the drain timeout, aborting them");
            supervisor.abort();
            stats.total_requests()
        }
    };

    let duration = started.elapsed();
    let finished_at = Utc::now();

    // no-op when a reason was already recorded
    shutdown.initiate(StopReason::Completed);
    let reason = shutdown.reason().unwrap_or(StopReason::Completed);

    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter task failed");
        }
    }

    let unaggregated = issued.saturating_sub(stats.total_requests());
    if unaggregated > 0 {
        warn!(
            unaggregated,
            aggregated = stats.total_requests(),
            "Some completed requests are missing from the results"
        );
    }

    info!(
        reason = %reason,
        requests = stats.total_requests(),
        errors = stats.total_errors(),
        duration_secs = duration.as_secs_f64(),
        "Benchmark finished"
    );

    Ok(RunOutcome {
        stats,
        started_at,
        finished_at,
        duration,
        reason,
        issued,
    })
}

/// Join every worker. A panicking worker stops the run.
async fn supervise(mut workers: JoinSet<u64>, shutdown: ShutdownSignal) -> u64 {
    let mut issued = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(count) => issued += count,
            Err(e) if e.is_panic() => {
                let cause = panic_message(e.into_panic());
                error!(cause = %cause, "Worker panicked");
                shutdown.initiate(StopReason::Fatal(format!("worker panicked: {}", cause)));
            }
            Err(e) => warn!(error = %e, "Worker task cancelled"),
        }
    }
    issued
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = BenchConfig::default();
        config.continue_on_error = true;
        config.parameters.num_clients = 8;
        config.parameters.rps = 100;
        config.latency.exclude_failed = true;

        let settings = EngineSettings::from_config(&config, true, false);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.total_requests, 1_000_000);
        assert!(settings.continuous);
        assert_eq!(settings.rate_cap, Some(100));
        assert_eq!(settings.error_policy, ErrorPolicy::Continue);
        assert_eq!(settings.queue_capacity, 8);
        assert!(settings.exclude_failed_latency);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bad".to_string())), "bad");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic payload");
    }
}
