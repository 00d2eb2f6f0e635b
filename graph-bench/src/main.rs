use anyhow::{Context, Result};
use clap::Parser;
use metrics::{describe_counter, describe_histogram};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use graph_bench::config::BenchConfig;
use graph_bench::engine::{run_benchmark, EngineSettings};
use graph_bench::error::BenchError;
use graph_bench::falkordb::{wait_until_ready, FalkorConnection, FalkorExecutor, FalkorSettings};
use graph_bench::report::{write_summary, BenchmarkResult};
use graph_bench::shutdown::{ShutdownSignal, StopReason};
use graph_bench::workload::{TermSelection, TermSource, WorkloadSpec};

#[derive(Parser)]
#[command(name = "graph-bench")]
#[command(about = "Concurrent query load generator and latency benchmark for FalkorDB")]
#[command(version)]
struct Cli {
    /// YAML file describing the benchmark
    #[arg(long, short)]
    config: String,

    /// Keep issuing requests until the configured total has been aggregated or Ctrl-C
    #[arg(long = "loop")]
    continuous: bool,

    /// Debug logging, including every issued query
    #[arg(long, short)]
    verbose: bool,

    /// Seconds between progress lines, overrides cli_update_tick_secs
    #[arg(long)]
    cli_update_tick: Option<u64>,

    /// CSV file of term replacements; the header names the placeholders
    #[arg(long)]
    data_import_terms: Option<PathBuf>,

    /// How term records are picked: seq or rand
    #[arg(long, default_value = "seq")]
    data_import_terms_mode: TermSelection,

    /// Where to write the JSON result document
    #[arg(long, default_value = "benchmark-results.json")]
    output_file: PathBuf,

    /// Print the resolved configuration as YAML and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BenchConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    if let Some(tick) = cli.cli_update_tick {
        config.cli_update_tick_secs = tick;
    }

    if cli.dump_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("graph_bench={}", level).into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting graph-bench v{}", env!("CARGO_PKG_VERSION"));
    info!(verbose = cli.verbose, seed = config.parameters.random_seed, "Benchmark configured");

    let terms = match &cli.data_import_terms {
        Some(path) => {
            let terms = TermSource::from_file(path, cli.data_import_terms_mode)?;
            info!(
                path = %path.display(),
                mode = ?cli.data_import_terms_mode,
                records = terms.len(),
                columns = terms.placeholders().len(),
                "Loaded term replacement records"
            );
            Some(terms)
        }
        None => None,
    };

    let spec = WorkloadSpec::from_config(&config, terms)?;
    // surface ratio problems before touching the network
    spec.distribution()?;

    if config.metrics.enabled {
        start_metrics_exporter(config.metrics.listen_addr)?;
    }

    let settings = FalkorSettings::from_config(&config);
    wait_until_ready(&settings, config.connect_timeout()).await?;

    let mut setup = FalkorConnection::connect(&settings)
        .await
        .context("Failed to open setup connection")?;
    let server_version = match setup.server_version().await {
        Ok(Some(version)) => {
            info!(version, "Detected FalkorDB version");
            Some(version)
        }
        Ok(None) => {
            warn!("Graph module not listed by MODULE LIST, continuing anyway");
            None
        }
        Err(e) => {
            warn!(error = %e, "Unable to retrieve FalkorDB version, continuing anyway");
            None
        }
    };
    setup
        .run_init_commands(&config.db_config.init_commands)
        .await
        .context("Init command failed")?;
    drop(setup);

    let executors = futures::future::try_join_all(
        (0..config.parameters.num_clients).map(|_| FalkorExecutor::connect(&settings)),
    )
    .await
    .context("Failed to open client connections")?;

    let shutdown = ShutdownSignal::new();
    let ctrl_c = shutdown.listen_for_ctrl_c();

    let engine = EngineSettings::from_config(&config, cli.continuous, cli.verbose);
    let spec = Arc::new(spec);
    let outcome = run_benchmark(Arc::clone(&spec), &engine, executors, shutdown.clone()).await?;
    ctrl_c.abort();

    let result = BenchmarkResult::compile(&spec, &config, &outcome, server_version);
    write_summary(&mut std::io::stdout().lock(), &spec, &outcome)?;
    result
        .save_json(&cli.output_file)
        .with_context(|| format!("Failed to write {}", cli.output_file.display()))?;

    match outcome.reason {
        StopReason::Fatal(cause) => Err(BenchError::Aborted(cause).into()),
        StopReason::Completed | StopReason::Interrupted => Ok(()),
    }
}

fn start_metrics_exporter(listen_addr: SocketAddr) -> Result<()> {
    describe_counter!("graph_bench_requests_total", "Requests aggregated");
    describe_counter!("graph_bench_errors_total", "Requests that failed");
    describe_histogram!(
        "graph_bench_client_latency_us",
        "Client observed request latency in microseconds"
    );

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(metrics_addr = %listen_addr, "Prometheus metrics server started");
    Ok(())
}
