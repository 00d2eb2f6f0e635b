//! Single consumer of the result queue.
//!
//! The aggregator owns the cumulative statistics outright and mirrors every
//! record into the instantaneous window shared with the reporter. Once the
//! expected number of records has been merged it stops the whole run.

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::record::ResultRecord;
use crate::shutdown::{ShutdownSignal, StopReason};
use crate::stats::{AggregateStats, InstantStats, ProgressCounters};

pub struct Aggregator {
    cumulative: AggregateStats,
    instant: InstantStats,
    progress: Arc<ProgressCounters>,
    expected: u64,
}

impl Aggregator {
    pub fn new(
        cumulative: AggregateStats,
        instant: InstantStats,
        progress: Arc<ProgressCounters>,
        expected: u64,
    ) -> Self {
        Self {
            cumulative,
            instant,
            progress,
            expected,
        }
    }

    /// Fold one record into cumulative stats, the instantaneous window and
    /// the progress counters
    pub fn merge(&mut self, record: &ResultRecord) {
        self.cumulative.merge(record);
        self.instant.merge(record);
        self.progress.observe(record);

        counter!("graph_bench_requests_total", 1);
        if record.error {
            counter!("graph_bench_errors_total", 1);
        }
        histogram!("graph_bench_client_latency_us", record.client_micros as f64);
    }

    pub fn is_complete(&self) -> bool {
        self.cumulative.total_requests() >= self.expected
    }

    /// Consume records until the expected total is reached, every producer
    /// has gone away, or the run is stopped. Returns the cumulative stats in
    /// every case.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<ResultRecord>,
        shutdown: ShutdownSignal,
        drain_timeout: Duration,
    ) -> AggregateStats {
        debug!(expected = self.expected, "Aggregator started");

        loop {
            if self.is_complete() {
                shutdown.initiate(StopReason::Completed);
                break;
            }

            tokio::select! {
                biased;
                record = rx.recv() => match record {
                    Some(record) => self.merge(&record),
                    None => {
                        debug!("Result queue closed by every producer");
                        break;
                    }
                },
                _ = shutdown.cancelled() => {
                    self.drain(&mut rx, drain_timeout).await;
                    break;
                }
            }
        }

        // producers still blocked on a full queue see the close and exit
        rx.close();

        info!(
            requests = self.cumulative.total_requests(),
            errors = self.cumulative.total_errors(),
            "Aggregation finished"
        );
        self.cumulative
    }

    /// Merge records that were queued or in flight when the stop arrived
    async fn drain(&mut self, rx: &mut mpsc::Receiver<ResultRecord>, drain_timeout: Duration) {
        let before = self.cumulative.total_requests();

        let drained = tokio::time::timeout(drain_timeout, async {
            while !self.is_complete() {
                match rx.recv().await {
                    Some(record) => self.merge(&record),
                    None => break,
                }
            }
        })
        .await;

        let merged = self.cumulative.total_requests() - before;
        match drained {
            Ok(()) => debug!(merged, "Drained in-flight records"),
            Err(_) => warn!(
                merged,
                timeout_secs = drain_timeout.as_secs_f64(),
                "Drain timed out, records still in flight are dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MutationCounts;

    fn record(index: usize, micros: u64) -> ResultRecord {
        ResultRecord {
            query_index: index,
            client_micros: micros,
            internal_micros: micros / 2,
            error: false,
            empty: false,
            mutations: MutationCounts::default(),
        }
    }

    fn aggregator(expected: u64) -> (Aggregator, InstantStats, Arc<ProgressCounters>) {
        let instant = InstantStats::new(AggregateStats::new(2).unwrap());
        let progress = Arc::new(ProgressCounters::new());
        let aggregator = Aggregator::new(
            AggregateStats::new(2).unwrap(),
            instant.clone(),
            Arc::clone(&progress),
            expected,
        );
        (aggregator, instant, progress)
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer_without_losing_records() {
        let (aggregator, _, _) = aggregator(5);
        let (tx, rx) = mpsc::channel(2);

        tx.send(record(0, 10)).await.unwrap();
        tx.send(record(1, 20)).await.unwrap();
        // third push has to wait for the consumer
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(record(0, 30))).await;
        assert!(blocked.is_err(), "push onto a full queue should block");

        let producer = tokio::spawn(async move {
            for i in 0..3 {
                tx.send(record(i % 2, 40 + i as u64)).await.unwrap();
            }
        });

        let shutdown = ShutdownSignal::new();
        let stats = aggregator.run(rx, shutdown.clone(), Duration::from_secs(1)).await;
        producer.await.unwrap();

        assert_eq!(stats.total_requests(), 5);
        assert_eq!(stats.query(0).requests + stats.query(1).requests, 5);
        assert_eq!(shutdown.reason(), Some(StopReason::Completed));
    }

    #[tokio::test]
    async fn test_completion_stops_the_run_and_closes_the_queue() {
        let (aggregator, instant, progress) = aggregator(3);
        let (tx, rx) = mpsc::channel(1);
        let shutdown = ShutdownSignal::new();

        // endless producer, as in loop mode
        let producer = tokio::spawn(async move {
            let mut sent = 0u64;
            while tx.send(record(0, 100)).await.is_ok() {
                sent += 1;
            }
            sent
        });

        let stats = aggregator.run(rx, shutdown.clone(), Duration::from_secs(1)).await;
        let sent = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should observe the closed queue")
            .unwrap();

        assert_eq!(stats.total_requests(), 3);
        assert!(sent >= 3);
        assert_eq!(progress.requests(), 3);
        assert_eq!(instant.total_requests(), 3);
        assert!(shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_interrupt_drains_in_flight_records() {
        let (aggregator, _, _) = aggregator(100);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = ShutdownSignal::new();

        for i in 0..4 {
            tx.send(record(0, 10 * (i + 1))).await.unwrap();
        }
        shutdown.initiate(StopReason::Interrupted);
        drop(tx);

        let stats = aggregator.run(rx, shutdown.clone(), Duration::from_secs(1)).await;
        assert_eq!(stats.total_requests(), 4);
        assert_eq!(shutdown.reason(), Some(StopReason::Interrupted));
    }

    #[tokio::test]
    async fn test_drain_is_bounded_by_timeout() {
        let (aggregator, _, _) = aggregator(100);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = ShutdownSignal::new();

        tx.send(record(1, 10)).await.unwrap();
        shutdown.initiate(StopReason::Interrupted);

        // the sender stays alive, so only the timeout ends the drain
        let stats = tokio::time::timeout(
            Duration::from_secs(2),
            aggregator.run(rx, shutdown, Duration::from_millis(50)),
        )
        .await
        .expect("drain should give up after its timeout");
        assert_eq!(stats.total_requests(), 1);
        drop(tx);
    }
}
