//! FalkorDB query executor over a single RESP connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::executor::{QueryExecutor, QueryOutcome};
use crate::resp::{RespCodec, RespValue};

const READY_PROBE_INTERVAL: Duration = Duration::from_millis(500);
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct FalkorSettings {
    /// `host:port`
    pub addr: String,
    pub graph: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl FalkorSettings {
    pub fn from_config(config: &BenchConfig) -> Self {
        let password = Some(config.db_config.password.clone()).filter(|p| !p.is_empty());
        Self {
            addr: config.endpoint_addr(),
            graph: config.db_config.graph.clone(),
            password,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// One authenticated connection
pub struct FalkorConnection {
    framed: Framed<TcpStream, RespCodec>,
}

impl FalkorConnection {
    pub async fn connect(settings: &FalkorSettings) -> Result<Self> {
        Self::connect_within(settings, settings.connect_timeout).await
    }

    async fn connect_within(settings: &FalkorSettings, limit: Duration) -> Result<Self> {
        let stream = match timeout(limit, TcpStream::connect(&settings.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BenchError::EndpointUnavailable(format!(
                    "{}: {}",
                    settings.addr, e
                )))
            }
            Err(_) => {
                return Err(BenchError::EndpointUnavailable(format!(
                    "{}: connect timed out after {:?}",
                    settings.addr, limit
                )))
            }
        };
        stream.set_nodelay(true)?;

        let mut connection = Self {
            framed: Framed::new(stream, RespCodec::new()),
        };

        if let Some(password) = &settings.password {
            match connection.request(RespValue::command(["AUTH", password.as_str()])).await? {
                RespValue::Error(e) => {
                    return Err(BenchError::EndpointUnavailable(format!("AUTH rejected: {}", e)))
                }
                _ => debug!(addr = %settings.addr, "Authenticated"),
            }
        }

        Ok(connection)
    }

    /// Send one command and wait for its reply
    pub async fn request(&mut self, command: RespValue) -> Result<RespValue> {
        self.framed.send(command).await?;
        match self.framed.next().await {
            Some(reply) => reply,
            None => Err(BenchError::EndpointUnavailable(
                "connection closed by server".to_string(),
            )),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.request(RespValue::command(["PING"])).await? {
            RespValue::Simple(s) if s == "PONG" => Ok(()),
            RespValue::Error(e) => Err(BenchError::EndpointUnavailable(e)),
            other => Err(BenchError::Protocol(format!("unexpected PING reply {:?}", other))),
        }
    }

    /// Send each configured setup command, failing on the first error reply
    pub async fn run_init_commands(&mut self, commands: &[Vec<String>]) -> Result<()> {
        for command in commands {
            match self.request(RespValue::command(command)).await? {
                RespValue::Error(e) => {
                    return Err(BenchError::Execution(format!(
                        "init command {:?} failed: {}",
                        command, e
                    )))
                }
                _ => info!(command = ?command, "Init command executed"),
            }
        }
        Ok(())
    }

    /// Version of the `graph` module from `MODULE LIST`, if loaded
    pub async fn server_version(&mut self) -> Result<Option<i64>> {
        let reply = self.request(RespValue::command(["MODULE", "LIST"])).await?;
        if let RespValue::Error(e) = reply {
            return Err(BenchError::Execution(e));
        }
        Ok(graph_module_version(&reply))
    }
}

fn graph_module_version(reply: &RespValue) -> Option<i64> {
    reply.as_array()?.iter().find_map(|module| {
        let fields = module.as_array()?;
        let mut name = None;
        let mut version = None;
        for pair in fields.chunks(2) {
            if let [key, value] = pair {
                match key.as_text().as_deref() {
                    Some("name") => name = value.as_text(),
                    Some("ver") => {
                        version = match value {
                            RespValue::Integer(v) => Some(*v),
                            other => other.as_text().and_then(|t| t.parse().ok()),
                        }
                    }
                    _ => {}
                }
            }
        }
        match name.as_deref() {
            Some("graph") => version,
            _ => None,
        }
    })
}

/// Probe the endpoint with PING until it answers or `limit` elapses
pub async fn wait_until_ready(settings: &FalkorSettings, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let probe = async {
            let mut connection =
                FalkorConnection::connect_within(settings, READY_PROBE_TIMEOUT.min(remaining)).await?;
            connection.ping().await?;
            Ok::<_, BenchError>(())
        };

        match timeout(READY_PROBE_TIMEOUT, probe).await {
            Ok(Ok(())) => {
                info!(addr = %settings.addr, attempts, "Endpoint is ready");
                return Ok(());
            }
            Ok(Err(e)) => debug!(addr = %settings.addr, attempts, error = %e, "Endpoint not ready"),
            Err(_) => debug!(addr = %settings.addr, attempts, "Readiness probe timed out"),
        }

        if Instant::now() + READY_PROBE_INTERVAL >= deadline {
            warn!(addr = %settings.addr, attempts, "Endpoint did not become ready");
            return Err(BenchError::EndpointUnavailable(format!(
                "{} did not answer PING within {:?}",
                settings.addr, limit
            )));
        }
        sleep(READY_PROBE_INTERVAL).await;
    }
}

/// Runs graph queries on its own connection
pub struct FalkorExecutor {
    connection: FalkorConnection,
    graph: String,
}

impl FalkorExecutor {
    pub fn new(connection: FalkorConnection, graph: impl Into<String>) -> Self {
        Self {
            connection,
            graph: graph.into(),
        }
    }

    pub async fn connect(settings: &FalkorSettings) -> Result<Self> {
        let connection = FalkorConnection::connect(settings).await?;
        Ok(Self::new(connection, settings.graph.clone()))
    }
}

#[async_trait]
impl QueryExecutor for FalkorExecutor {
    async fn execute(&mut self, query: &str, read_only: bool) -> Result<QueryOutcome> {
        let command = if read_only { "GRAPH.RO_QUERY" } else { "GRAPH.QUERY" };
        let reply = self
            .connection
            .request(RespValue::command([command, self.graph.as_str(), query]))
            .await?;
        parse_query_reply(&reply)
    }
}

/// Interpret a `GRAPH.QUERY` reply: `[stats]` for writes without RETURN,
/// `[header, rows, stats]` otherwise
pub fn parse_query_reply(reply: &RespValue) -> Result<QueryOutcome> {
    let sections = match reply {
        RespValue::Error(e) => return Err(BenchError::Execution(e.clone())),
        RespValue::Array(Some(sections)) if !sections.is_empty() => sections,
        other => {
            return Err(BenchError::Protocol(format!(
                "unexpected query reply {:?}",
                other
            )))
        }
    };

    if let Some(RespValue::Error(e)) = sections.iter().find(|s| matches!(s, RespValue::Error(_))) {
        return Err(BenchError::Execution(e.clone()));
    }

    let mut outcome = QueryOutcome {
        empty: true,
        ..Default::default()
    };

    if sections.len() >= 3 {
        outcome.empty = sections[1].as_array().map_or(true, |rows| rows.is_empty());
    }

    let stats = sections
        .last()
        .and_then(RespValue::as_array)
        .ok_or_else(|| BenchError::Protocol("query reply has no statistics".to_string()))?;
    for line in stats.iter().filter_map(RespValue::as_text) {
        apply_stat(&line, &mut outcome);
    }

    Ok(outcome)
}

fn apply_stat(line: &str, outcome: &mut QueryOutcome) {
    let Some((key, value)) = line.split_once(':') else {
        return;
    };
    let Some(number) = value.split_whitespace().next() else {
        return;
    };

    let counter = |n: &str| n.parse::<u64>().unwrap_or(0);
    let mutations = &mut outcome.mutations;
    match key.trim() {
        "Nodes created" => mutations.nodes_created = counter(number),
        "Nodes deleted" => mutations.nodes_deleted = counter(number),
        "Labels added" => mutations.labels_added = counter(number),
        "Properties set" => mutations.properties_set = counter(number),
        "Relationships created" => mutations.relationships_created = counter(number),
        "Relationships deleted" => mutations.relationships_deleted = counter(number),
        "Query internal execution time" => {
            if let Ok(ms) = number.parse::<f64>() {
                outcome.internal_micros = (ms * 1000.0).round().max(0.0) as u64;
            }
        }
        _ => {}
    }
}
