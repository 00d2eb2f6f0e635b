//! Request-issuing workers.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::distribution::CumulativeDistribution;
use crate::executor::QueryExecutor;
use crate::limiter::RequestLimiter;
use crate::record::ResultRecord;
use crate::shutdown::{ShutdownSignal, StopReason};
use crate::templater::Templater;
use crate::workload::WorkloadSpec;

/// What a worker does after a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log the failure and keep issuing requests
    Continue,
    /// Report the failure and stop the whole run
    Abort,
}

impl ErrorPolicy {
    pub fn from_continue_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        }
    }
}

/// Request ordinals handed out to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdinalSequence {
    next: u64,
    stride: u64,
}

impl OrdinalSequence {
    pub fn new(start: u64, stride: u64) -> Self {
        Self { next: start, stride }
    }

    pub fn next_ordinal(&mut self) -> u64 {
        let ordinal = self.next;
        self.next = self.next.wrapping_add(self.stride);
        ordinal
    }
}

/// Share of the run assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    pub worker_id: u64,
    /// `None` runs until stopped
    pub requests: Option<u64>,
    pub ordinals: OrdinalSequence,
}

/// Split `total` requests over `workers`. The last worker takes the
/// remainder. Continuous workers have no quota and interleave ordinals.
pub fn plan_workers(total: u64, workers: u64, continuous: bool) -> Vec<WorkerPlan> {
    let workers = workers.max(1);
    let per_worker = total / workers;
    let remainder = total % workers;

    (0..workers)
        .map(|worker_id| {
            if continuous {
                WorkerPlan {
                    worker_id,
                    requests: None,
                    ordinals: OrdinalSequence::new(worker_id, workers),
                }
            } else {
                let extra = if worker_id == workers - 1 { remainder } else { 0 };
                WorkerPlan {
                    worker_id,
                    requests: Some(per_worker + extra),
                    ordinals: OrdinalSequence::new(worker_id * per_worker, 1),
                }
            }
        })
        .collect()
}

/// Everything a worker shares with its siblings
#[derive(Clone)]
pub struct WorkerContext {
    pub spec: Arc<WorkloadSpec>,
    pub distribution: Arc<CumulativeDistribution>,
    pub limiter: Arc<RequestLimiter>,
    pub results: mpsc::Sender<ResultRecord>,
    pub shutdown: ShutdownSignal,
    pub error_policy: ErrorPolicy,
    pub seed: u64,
    pub log_queries: bool,
}

/// Issue the planned requests through `executor`. Returns the number of
/// requests that got a reply or an error.
pub async fn run_worker<E: QueryExecutor>(
    ctx: WorkerContext,
    plan: WorkerPlan,
    mut executor: E,
) -> u64 {
    let WorkerPlan {
        worker_id,
        requests,
        mut ordinals,
    } = plan;
    let mut rng = StdRng::seed_from_u64(ctx.seed.wrapping_add(worker_id));
    let templater = Templater::for_spec(&ctx.spec);
    let mut issued = 0u64;

    debug!(worker_id, requests = ?requests, "Worker started");

    while requests.map_or(true, |quota| issued < quota) {
        if ctx.shutdown.is_shutdown_requested() {
            break;
        }

        let query_index = ctx.distribution.sample(&mut rng);
        let template = ctx.spec.query(query_index);
        let query = templater.render(&template.text, ordinals.next_ordinal(), &mut rng);

        if ctx.limiter.is_limited() {
            tokio::select! {
                _ = ctx.limiter.acquire() => {}
                _ = ctx.shutdown.cancelled() => break,
            }
        }

        if ctx.log_queries {
            debug!(worker_id, query = %query, read_only = template.read_only, "Issuing query");
        }

        let started = Instant::now();
        let result = executor.execute(&query, template.read_only).await;
        let elapsed = started.elapsed();

        let (record, failure) = match result {
            Ok(outcome) => (ResultRecord::success(query_index, elapsed, &outcome), None),
            Err(e) => (ResultRecord::failure(query_index, elapsed), Some(e)),
        };
        issued += 1;

        if let Some(e) = &failure {
            match ctx.error_policy {
                ErrorPolicy::Continue => {
                    warn!(worker_id, query_index, error = %e, "Query failed, continuing");
                }
                ErrorPolicy::Abort => {
                    error!(worker_id, query_index, query = %query, error = %e, "Query failed");
                }
            }
        }

        if ctx.results.send(record).await.is_err() {
            debug!(worker_id, "Result queue closed");
            break;
        }

        if let (Some(e), ErrorPolicy::Abort) = (failure, ctx.error_policy) {
            ctx.shutdown.initiate(StopReason::Fatal(format!(
                "worker {} aborted on query {}: {}",
                worker_id, query_index, e
            )));
            break;
        }
    }

    debug!(worker_id, issued, "Worker finished");
    issued
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_worker_takes_remainder() {
        let plans = plan_workers(10, 3, false);
        let quotas: Vec<u64> = plans.iter().map(|p| p.requests.unwrap()).collect();
        assert_eq!(quotas, vec![3, 3, 4]);
        assert_eq!(quotas.iter().sum::<u64>(), 10);
    }

    #[test]
    fn test_fixed_ordinals_do_not_overlap() {
        let plans = plan_workers(10, 3, false);
        let mut seen = Vec::new();
        for plan in plans {
            let mut ordinals = plan.ordinals;
            for _ in 0..plan.requests.unwrap() {
                seen.push(ordinals.next_ordinal());
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_continuous_ordinals_interleave() {
        let plans = plan_workers(100, 4, true);
        assert!(plans.iter().all(|p| p.requests.is_none()));

        let mut ordinals = plans[1].ordinals;
        let drawn: Vec<u64> = (0..3).map(|_| ordinals.next_ordinal()).collect();
        assert_eq!(drawn, vec![1, 5, 9]);
    }

    #[test]
    fn test_more_workers_than_requests() {
        let plans = plan_workers(2, 5, false);
        let quotas: Vec<u64> = plans.iter().map(|p| p.requests.unwrap()).collect();
        assert_eq!(quotas, vec![0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_error_policy_from_flag() {
        assert_eq!(ErrorPolicy::from_continue_flag(true), ErrorPolicy::Continue);
        assert_eq!(ErrorPolicy::from_continue_flag(false), ErrorPolicy::Abort);
    }
}
