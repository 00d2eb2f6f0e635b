//! Latency histograms and counters for one aggregation window.
//!
//! The same [`AggregateStats`] type backs both the cumulative run totals and
//! the instantaneous per-tick window. Values are microseconds.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::error::Result;
use crate::record::{MutationCounts, ResultRecord};

/// Lowest discernible latency (1 µs)
pub const HISTOGRAM_LOWEST: u64 = 1;
/// Highest trackable latency (90 000 s)
pub const HISTOGRAM_HIGHEST: u64 = 90_000_000_000;
pub const HISTOGRAM_SIGFIG: u8 = 3;

/// Fixed-range latency histogram that clamps instead of rejecting
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    inner: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Result<Self> {
        let inner = Histogram::new_with_bounds(HISTOGRAM_LOWEST, HISTOGRAM_HIGHEST, HISTOGRAM_SIGFIG)?;
        Ok(Self { inner })
    }

    /// Record one value; anything above the range lands on the top bucket
    pub fn record(&mut self, micros: u64) {
        self.inner.saturating_record(micros.min(HISTOGRAM_HIGHEST));
    }

    pub fn count(&self) -> u64 {
        self.inner.len()
    }

    /// Value at `quantile` in [0, 1], zero when empty
    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        if self.inner.is_empty() {
            return 0;
        }
        self.inner.value_at_quantile(quantile)
    }

    pub fn mean(&self) -> f64 {
        if self.inner.is_empty() {
            return 0.0;
        }
        self.inner.mean()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Quantile summary in milliseconds
    pub fn summary(&self) -> LatencySummary {
        if self.inner.is_empty() {
            return LatencySummary::default();
        }
        let ms = |q: f64| self.inner.value_at_quantile(q) as f64 / 1000.0;
        LatencySummary {
            q0: ms(0.0),
            q50: ms(0.50),
            q95: ms(0.95),
            q99: ms(0.99),
            q999: ms(0.999),
            q100: ms(1.0),
            avg: self.inner.mean() / 1000.0,
        }
    }
}

/// Latency quantiles in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub q0: f64,
    pub q50: f64,
    pub q95: f64,
    pub q99: f64,
    pub q999: f64,
    pub q100: f64,
    pub avg: f64,
}

impl LatencySummary {
    /// Quantile name to value, in a stable order
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("q0", self.q0),
            ("q50", self.q50),
            ("q95", self.q95),
            ("q99", self.q99),
            ("q999", self.q999),
            ("q100", self.q100),
            ("avg", self.avg),
        ])
    }
}

/// Histograms and counters for one query index (or for all of them)
#[derive(Debug, Clone)]
pub struct QueryStats {
    pub client: LatencyHistogram,
    pub internal: LatencyHistogram,
    pub requests: u64,
    pub errors: u64,
    pub empty_results: u64,
    pub mutations: MutationCounts,
}

impl QueryStats {
    fn new() -> Result<Self> {
        Ok(Self {
            client: LatencyHistogram::new()?,
            internal: LatencyHistogram::new()?,
            requests: 0,
            errors: 0,
            empty_results: 0,
            mutations: MutationCounts::default(),
        })
    }

    fn merge(&mut self, record: &ResultRecord, record_latency: bool) {
        self.requests += 1;
        if record_latency {
            self.client.record(record.client_micros);
            self.internal.record(record.internal_micros);
        }
        if record.error {
            self.errors += 1;
        } else {
            self.mutations += record.mutations;
            if record.empty {
                self.empty_results += 1;
            }
        }
    }

    fn reset(&mut self) {
        self.client.reset();
        self.internal.reset();
        self.requests = 0;
        self.errors = 0;
        self.empty_results = 0;
        self.mutations = MutationCounts::default();
    }
}

/// Per-query and global statistics for a fixed query index space
#[derive(Debug, Clone)]
pub struct AggregateStats {
    per_query: Vec<QueryStats>,
    overall: QueryStats,
    exclude_failed_latency: bool,
}

impl AggregateStats {
    pub fn new(query_count: usize) -> Result<Self> {
        let per_query = (0..query_count)
            .map(|_| QueryStats::new())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            per_query,
            overall: QueryStats::new()?,
            exclude_failed_latency: false,
        })
    }

    /// Keep failed requests out of the latency histograms. They still count
    /// as requests and errors.
    pub fn exclude_failed_latency(mut self, exclude: bool) -> Self {
        self.exclude_failed_latency = exclude;
        self
    }

    /// Fold one record into the per-query and global entries
    pub fn merge(&mut self, record: &ResultRecord) {
        let record_latency = !(record.error && self.exclude_failed_latency);
        if let Some(query) = self.per_query.get_mut(record.query_index) {
            query.merge(record, record_latency);
        } else {
            warn!(
                query_index = record.query_index,
                query_count = self.per_query.len(),
                "Dropping record for unknown query index"
            );
            return;
        }
        self.overall.merge(record, record_latency);
    }

    /// Empty every histogram and counter
    pub fn reset(&mut self) {
        for query in &mut self.per_query {
            query.reset();
        }
        self.overall.reset();
    }

    pub fn query(&self, index: usize) -> &QueryStats {
        &self.per_query[index]
    }

    pub fn queries(&self) -> &[QueryStats] {
        &self.per_query
    }

    pub fn overall(&self) -> &QueryStats {
        &self.overall
    }

    pub fn query_count(&self) -> usize {
        self.per_query.len()
    }

    pub fn total_requests(&self) -> u64 {
        self.overall.requests
    }

    pub fn total_errors(&self) -> u64 {
        self.overall.errors
    }
}

/// Running totals readable from any task without locking
#[derive(Debug, Default)]
pub struct ProgressCounters {
    requests: AtomicU64,
    errors: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, record: &ResultRecord) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if record.error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// p50 latencies of one instantaneous window, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowLatency {
    pub client_p50_ms: f64,
    pub internal_p50_ms: f64,
}

/// Instantaneous window shared between the aggregator and the reporter
#[derive(Debug, Clone)]
pub struct InstantStats {
    inner: Arc<Mutex<AggregateStats>>,
}

impl InstantStats {
    pub fn new(stats: AggregateStats) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stats)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregateStats> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Instantaneous stats mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn merge(&self, record: &ResultRecord) {
        self.lock().merge(record);
    }

    /// Read the window's p50s and empty it in the same critical section
    pub fn snapshot_and_reset(&self) -> WindowLatency {
        let mut stats = self.lock();
        let overall = stats.overall();
        let window = WindowLatency {
            client_p50_ms: overall.client.value_at_quantile(0.5) as f64 / 1000.0,
            internal_p50_ms: overall.internal.value_at_quantile(0.5) as f64 / 1000.0,
        };
        stats.reset();
        window
    }

    pub fn total_requests(&self) -> u64 {
        self.lock().total_requests()
    }
}
