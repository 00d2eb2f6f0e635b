//! Final result document and printed summary.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

use crate::config::BenchConfig;
use crate::engine::RunOutcome;
use crate::error::Result;
use crate::record::MutationCounts;
use crate::stats::{LatencySummary, QueryStats};
use crate::workload::WorkloadSpec;

pub const RESULT_FORMAT_VERSION: &str = "0.0.1";
const TOTAL_KEY: &str = "Total";

/// Request and mutation totals of one query (or of the whole run)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TotalsEntry {
    pub issued_queries: u64,
    pub errors: u64,
    pub empty_resultsets: u64,
    #[serde(flatten)]
    pub mutations: MutationCounts,
}

impl From<&QueryStats> for TotalsEntry {
    fn from(stats: &QueryStats) -> Self {
        Self {
            issued_queries: stats.requests,
            errors: stats.errors,
            empty_resultsets: stats.empty_results,
            mutations: stats.mutations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BenchmarkResult {
    pub result_format_version: String,
    pub metadata: String,
    pub clients: u64,
    pub max_rps: u64,
    pub random_seed: u64,
    pub benchmark_configured_commands_limit: u64,
    pub issued_commands: u64,
    pub benchmark_fully_run: bool,
    pub test_description: String,
    #[serde(rename = "DBSpecificConfigs")]
    pub db_specific_configs: BTreeMap<String, serde_json::Value>,
    /// Unix milliseconds
    pub start_time: i64,
    pub end_time: i64,
    pub duration_millis: u64,
    pub totals: BTreeMap<String, TotalsEntry>,
    pub overall_query_rates: BTreeMap<String, f64>,
    pub overall_client_latencies: BTreeMap<String, LatencySummary>,
    pub overall_graph_internal_latencies: BTreeMap<String, LatencySummary>,
    #[serde(rename = "OverallRelativeInternalExternalLatencyDiff")]
    pub relative_latency_diff: BTreeMap<String, f64>,
    #[serde(rename = "OverallAbsoluteInternalExternalLatencyDiff")]
    pub absolute_latency_diff: BTreeMap<String, f64>,
    pub termination_reason: String,
}

impl BenchmarkResult {
    pub fn compile(
        spec: &WorkloadSpec,
        config: &BenchConfig,
        outcome: &RunOutcome,
        server_version: Option<i64>,
    ) -> Self {
        let stats = &outcome.stats;
        let keys = report_keys(&spec.query_names());
        let secs = outcome.duration.as_secs_f64();
        let rate = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };

        let mut totals = BTreeMap::new();
        let mut rates = BTreeMap::new();
        let mut client = BTreeMap::new();
        let mut internal = BTreeMap::new();
        for (key, query) in keys.iter().zip(stats.queries()) {
            totals.insert(key.clone(), TotalsEntry::from(query));
            rates.insert(key.clone(), rate(query.requests));
            client.insert(key.clone(), query.client.summary());
            internal.insert(key.clone(), query.internal.summary());
        }

        let overall = stats.overall();
        let overall_client = overall.client.summary();
        let overall_internal = overall.internal.summary();
        totals.insert(TOTAL_KEY.to_string(), TotalsEntry::from(overall));
        rates.insert(TOTAL_KEY.to_string(), rate(overall.requests));
        client.insert(TOTAL_KEY.to_string(), overall_client);
        internal.insert(TOTAL_KEY.to_string(), overall_internal);

        let (relative_latency_diff, absolute_latency_diff) =
            latency_diffs(&overall_internal, &overall_client);

        let mut db_specific_configs = BTreeMap::new();
        if let Some(version) = server_version {
            db_specific_configs.insert("FalkorDBVersion".to_string(), serde_json::Value::from(version));
        }

        Self {
            result_format_version: RESULT_FORMAT_VERSION.to_string(),
            metadata: config.name.clone(),
            clients: config.parameters.num_clients,
            max_rps: config.parameters.rps,
            random_seed: config.parameters.random_seed,
            benchmark_configured_commands_limit: config.parameters.num_requests,
            issued_commands: stats.total_requests(),
            benchmark_fully_run: stats.total_requests() == config.parameters.num_requests,
            test_description: config.description.clone(),
            db_specific_configs,
            start_time: outcome.started_at.timestamp_millis(),
            end_time: outcome.finished_at.timestamp_millis(),
            duration_millis: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            totals,
            overall_query_rates: rates,
            overall_client_latencies: client,
            overall_graph_internal_latencies: internal,
            relative_latency_diff,
            absolute_latency_diff,
            termination_reason: outcome.reason.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Saving JSON results file");
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Report keys for each query. Repeated texts get their index appended so
/// no entry overwrites another.
fn report_keys(names: &[String]) -> Vec<String> {
    let mut seen = BTreeMap::new();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let count = seen.entry(name.as_str()).or_insert(0u32);
            *count += 1;
            if *count == 1 && name != TOTAL_KEY {
                name.clone()
            } else {
                format!("{} (#{})", name, i)
            }
        })
        .collect()
}

/// Client vs internal latency per quantile, as ratio and as difference.
/// Undefined values are left out.
pub fn latency_diffs(
    internal: &LatencySummary,
    client: &LatencySummary,
) -> (BTreeMap<String, f64>, BTreeMap<String, f64>) {
    let client = client.to_map();
    let mut relative = BTreeMap::new();
    let mut absolute = BTreeMap::new();

    for (quantile, internal_value) in internal.to_map() {
        let client_value = client.get(quantile).copied().unwrap_or(0.0);
        let ratio = client_value / internal_value;
        if ratio.is_finite() {
            relative.insert(quantile.to_string(), ratio);
        }
        let diff = client_value - internal_value;
        if diff.is_finite() {
            absolute.insert(quantile.to_string(), diff);
        }
    }

    (relative, absolute)
}

/// Runtime stats followed by the resultset, internal time and client
/// latency tables
pub fn write_summary<W: Write>(
    out: &mut W,
    spec: &WorkloadSpec,
    outcome: &RunOutcome,
) -> io::Result<()> {
    let stats = &outcome.stats;
    let secs = outcome.duration.as_secs_f64();
    let total = stats.total_requests();
    let errors = stats.total_errors();
    let error_pct = if total == 0 { 0.0 } else { errors as f64 / total as f64 * 100.0 };
    let throughput = if secs > 0.0 { total as f64 / secs } else { 0.0 };
    let names = spec.query_names();

    writeln!(out)?;
    writeln!(out, "################# RUNTIME STATS #################")?;
    writeln!(out, "Total Duration {:.3} Seconds", secs)?;
    writeln!(out, "Total Commands issued {}", total)?;
    writeln!(out, "Total Errors {} ( {:.3} %)", errors, error_pct)?;
    writeln!(out, "Throughput summary: {:.0} requests per second", throughput)?;
    writeln!(out, "Stopped: {}", outcome.reason)?;
    let unaggregated = outcome.unaggregated();
    if unaggregated > 0 {
        writeln!(out, "Completed but not aggregated {}", unaggregated)?;
    }

    let rows = |f: &dyn Fn(&QueryStats) -> Vec<String>| -> Vec<Vec<String>> {
        let mut rows: Vec<Vec<String>> = names
            .iter()
            .zip(stats.queries())
            .map(|(name, query)| {
                let mut row = vec![name.clone()];
                row.extend(f(query));
                row
            })
            .collect();
        let mut total_row = vec![TOTAL_KEY.to_string()];
        total_row.extend(f(stats.overall()));
        rows.push(total_row);
        rows
    };

    writeln!(out, "## Overall FalkorDB resultset stats table")?;
    write_table(
        out,
        &[
            "Query",
            "Nodes created",
            "Nodes deleted",
            "Labels added",
            "Properties set",
            "Relationships created",
            "Relationships deleted",
        ],
        &rows(&|q: &QueryStats| {
            let m = q.mutations;
            [
                m.nodes_created,
                m.nodes_deleted,
                m.labels_added,
                m.properties_set,
                m.relationships_created,
                m.relationships_deleted,
            ]
            .iter()
            .map(u64::to_string)
            .collect()
        }),
    )?;

    writeln!(out, "## Overall FalkorDB Internal Execution Time summary table")?;
    write_table(
        out,
        &[
            "Query",
            "Internal Avg. latency(ms)",
            "Internal p50 latency(ms)",
            "Internal p95 latency(ms)",
            "Internal p99 latency(ms)",
        ],
        &rows(&|q: &QueryStats| latency_cells(&q.internal.summary())),
    )?;

    writeln!(out, "## Overall Client Latency summary table")?;
    write_table(
        out,
        &[
            "Query",
            "Ops/sec",
            "Total Calls",
            "Total Errors",
            "Avg. latency(ms)",
            "p50 latency(ms)",
            "p95 latency(ms)",
            "p99 latency(ms)",
        ],
        &rows(&|q: &QueryStats| {
            let calls = q.requests;
            let ops = if secs > 0.0 { calls as f64 / secs } else { 0.0 };
            let mut cells = vec![format!("{:.0}", ops), calls.to_string(), q.errors.to_string()];
            cells.extend(latency_cells(&q.client.summary()));
            cells
        }),
    )?;

    Ok(())
}

fn latency_cells(summary: &LatencySummary) -> Vec<String> {
    [summary.avg, summary.q50, summary.q95, summary.q99]
        .iter()
        .map(|v| format!("{:.3}", v))
        .collect()
}

fn write_table<W: Write>(out: &mut W, header: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!(" {:<width$} ", cell, width = *width))
            .collect();
        format!("|{}|", padded.join("|"))
    };
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();

    writeln!(out, "{}", line(header.to_vec()))?;
    writeln!(out, "|{}|", separator.join("|"))?;
    for row in rows {
        writeln!(out, "{}", line(row.iter().map(String::as_str).collect()))?;
    }
    Ok(())
}
