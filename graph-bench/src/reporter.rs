//! Periodic progress line on stdout.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::shutdown::ShutdownSignal;
use crate::stats::{InstantStats, ProgressCounters, WindowLatency};

/// Values shown on one progress line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    pub elapsed_secs: f64,
    /// `None` when the run has no finite total
    pub completion_pct: Option<f64>,
    pub requests: u64,
    pub errors: u64,
    pub error_pct: f64,
    /// Requests per second since the previous tick
    pub interval_rate: f64,
    pub window: WindowLatency,
}

impl ProgressLine {
    pub fn compute(
        elapsed: Duration,
        total: Option<u64>,
        requests: u64,
        errors: u64,
        previous_requests: u64,
        since_previous: Duration,
        window: WindowLatency,
    ) -> Self {
        let secs = since_previous.as_secs_f64();
        let interval_rate = if secs > 0.0 {
            requests.saturating_sub(previous_requests) as f64 / secs
        } else {
            0.0
        };
        let error_pct = if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64 * 100.0
        };
        let completion_pct = total
            .filter(|t| *t > 0)
            .map(|t| requests as f64 / t as f64 * 100.0);

        Self {
            elapsed_secs: elapsed.as_secs_f64(),
            completion_pct,
            requests,
            errors,
            error_pct,
            interval_rate,
            window,
        }
    }

    pub fn header() -> String {
        format!(
            "{:>12} {:>8} {:>16} {:>12} {:>9} {:>14} {:>22} {:>26}",
            "Test time",
            "",
            "Total Commands",
            "Total Errors",
            "",
            "Command Rate",
            "Client p50 w/ RTT(ms)",
            "Graph Internal p50 (ms)"
        )
    }

    pub fn render(&self) -> String {
        let completion = match self.completion_pct {
            Some(pct) => format!("[{:5.1}%]", pct),
            None => "[----%]".to_string(),
        };
        format!(
            "{:>11.0}s {:>8} {:>16} {:>12} [{:5.1}%] {:>14.2} {:>22.3} {:>26.3}",
            self.elapsed_secs,
            completion,
            self.requests,
            self.errors,
            self.error_pct,
            self.interval_rate,
            self.window.client_p50_ms,
            self.window.internal_p50_ms
        )
    }
}

pub struct ProgressReporter {
    progress: Arc<ProgressCounters>,
    instant: InstantStats,
    tick: Duration,
    total: Option<u64>,
}

impl ProgressReporter {
    /// `total` is `None` in loop mode, which hides the completion column
    pub fn new(
        progress: Arc<ProgressCounters>,
        instant: InstantStats,
        tick: Duration,
        total: Option<u64>,
    ) -> Self {
        Self {
            progress,
            instant,
            tick,
            total,
        }
    }

    /// Sample one tick and empty the instantaneous window
    pub fn sample(
        &self,
        started: Instant,
        previous: (Instant, u64),
        now: Instant,
    ) -> ProgressLine {
        let requests = self.progress.requests();
        let errors = self.progress.errors();
        let window = self.instant.snapshot_and_reset();
        ProgressLine::compute(
            now.duration_since(started),
            self.total,
            requests,
            errors,
            previous.1,
            now.duration_since(previous.0),
            window,
        )
    }

    /// Print a line every tick until the total is reached or the run stops
    pub async fn run(self, shutdown: ShutdownSignal) {
        let started = Instant::now();
        let mut ticker = interval_at(started + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = (started, 0u64);

        println!("{}", ProgressLine::header());

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    let line = self.sample(started, previous, now);
                    previous = (now, line.requests);

                    print!("{}\r", line.render());
                    let _ = std::io::stdout().flush();

                    if self.total.is_some_and(|total| line.requests >= total) {
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        println!();
        debug!("Progress reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResultRecord;
    use crate::stats::AggregateStats;

    #[test]
    fn test_progress_line_math() {
        let window = WindowLatency {
            client_p50_ms: 1.5,
            internal_p50_ms: 0.5,
        };
        let line = ProgressLine::compute(
            Duration::from_secs(10),
            Some(1000),
            500,
            5,
            300,
            Duration::from_secs(2),
            window,
        );
        assert_eq!(line.interval_rate, 100.0);
        assert_eq!(line.error_pct, 1.0);
        assert_eq!(line.completion_pct, Some(50.0));
        assert!(line.render().contains("[ 50.0%]"));
    }

    #[test]
    fn test_no_requests_means_no_error_percentage() {
        let line = ProgressLine::compute(
            Duration::from_secs(1),
            None,
            0,
            0,
            0,
            Duration::ZERO,
            WindowLatency::default(),
        );
        assert_eq!(line.error_pct, 0.0);
        assert_eq!(line.interval_rate, 0.0);
        assert_eq!(line.completion_pct, None);
        assert!(line.render().contains("[----%]"));
    }

    #[tokio::test]
    async fn test_sample_resets_the_window() {
        let progress = Arc::new(ProgressCounters::new());
        let instant = InstantStats::new(AggregateStats::new(1).unwrap());
        let record = ResultRecord::failure(0, Duration::from_micros(2000));
        progress.observe(&record);
        instant.merge(&record);

        let reporter = ProgressReporter::new(
            Arc::clone(&progress),
            instant.clone(),
            Duration::from_secs(1),
            Some(10),
        );
        let started = Instant::now();
        let line = reporter.sample(started, (started, 0), started + Duration::from_secs(1));

        assert_eq!(line.requests, 1);
        assert_eq!(line.errors, 1);
        assert_eq!(line.interval_rate, 1.0);
        assert!((line.window.client_p50_ms - 2.0).abs() < 0.01);
        assert_eq!(instant.total_requests(), 0);
        assert_eq!(progress.requests(), 1);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let reporter = ProgressReporter::new(
            Arc::new(ProgressCounters::new()),
            InstantStats::new(AggregateStats::new(1).unwrap()),
            Duration::from_millis(10),
            None,
        );
        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(reporter.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(35)).await;
        shutdown.initiate(crate::shutdown::StopReason::Interrupted);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop")
            .unwrap();
    }
}
