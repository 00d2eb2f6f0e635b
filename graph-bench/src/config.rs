use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BenchError, Result};

/// Main benchmark configuration, resolved once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Benchmark name
    pub name: String,
    /// Free-form description copied into the result file
    pub description: String,
    /// Keep going when a query fails instead of aborting the run
    pub continue_on_error: bool,
    /// Seconds between progress lines
    pub cli_update_tick_secs: u64,
    /// Target database
    pub db_config: DbConfig,
    /// Workload parameters
    pub parameters: ParametersConfig,
    /// Engine tuning
    pub engine: EngineConfig,
    /// Latency recording options
    pub latency: LatencyConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics exporter
    pub metrics: MetricsConfig,
}

/// Target endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    /// Graph key the queries run against
    pub graph: String,
    /// AUTH password, empty for none
    pub password: String,
    /// How long to wait for the endpoint to answer PING at startup
    pub connect_timeout_secs: u64,
    /// Commands sent once before the benchmark starts, e.g. `["GRAPH.CONFIG", "SET", ...]`
    pub init_commands: Vec<Vec<String>>,
}

/// One weighted query template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub query: String,
    pub ratio: f64,
}

/// Workload parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersConfig {
    /// Number of concurrent clients
    pub num_clients: u64,
    /// Total requests across all clients
    pub num_requests: u64,
    /// Aggregate requests per second cap, 0 for unlimited
    pub rps: u64,
    /// Inclusive lower bound for `__rand_int__`
    pub random_int_min: i64,
    /// Exclusive upper bound for `__rand_int__`
    pub random_int_max: i64,
    pub random_seed: u64,
    /// Read-write queries
    pub queries: Vec<QueryConfig>,
    /// Read-only queries
    pub ro_queries: Vec<QueryConfig>,
}

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Result queue capacity, 0 means one slot per client
    pub queue_capacity: usize,
    /// Upper bound on draining in-flight records after a stop
    pub drain_timeout_secs: u64,
}

/// Latency recording options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LatencyConfig {
    /// Keep failed requests out of the latency histograms
    pub exclude_failed: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            name: "graph-bench".to_string(),
            description: String::new(),
            continue_on_error: false,
            cli_update_tick_secs: 1,
            db_config: DbConfig::default(),
            parameters: ParametersConfig::default(),
            engine: EngineConfig::default(),
            latency: LatencyConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            graph: "graph".to_string(),
            password: String::new(),
            connect_timeout_secs: 180,
            init_commands: Vec::new(),
        }
    }
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            num_clients: 50,
            num_requests: 1_000_000,
            rps: 0,
            random_int_min: 1,
            random_int_max: 1_000_000,
            random_seed: 12345,
            queries: Vec::new(),
            ro_queries: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 0,
            drain_timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9464)),
        }
    }
}

impl BenchConfig {
    /// Load configuration from a YAML (or TOML/JSON) file, with
    /// `GRAPH_BENCH__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(BenchError::Config("received empty config path".to_string()));
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GRAPH_BENCH").separator("__"))
            .build()?;

        let config: BenchConfig = settings.try_deserialize()?;
        Ok(config)
    }

    /// Resolved configuration as YAML, defaults and overrides included
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::Config("name is required".to_string()));
        }

        if self.parameters.queries.is_empty() && self.parameters.ro_queries.is_empty() {
            return Err(BenchError::Config("no queries were provided".to_string()));
        }

        if self.parameters.num_clients == 0 {
            return Err(BenchError::Config("num_clients must be at least 1".to_string()));
        }

        if self.parameters.num_requests == 0 {
            return Err(BenchError::Config("num_requests must be at least 1".to_string()));
        }

        if self.parameters.rps > u32::MAX as u64 {
            return Err(BenchError::Config(format!(
                "rps {} is above the supported maximum of {}",
                self.parameters.rps,
                u32::MAX
            )));
        }

        if self.parameters.random_int_max <= self.parameters.random_int_min {
            return Err(BenchError::Config(format!(
                "random_int_max ({}) must be greater than random_int_min ({})",
                self.parameters.random_int_max, self.parameters.random_int_min
            )));
        }

        if self.cli_update_tick_secs == 0 {
            return Err(BenchError::Config("cli_update_tick_secs cannot be 0".to_string()));
        }

        if self.db_config.port == 0 {
            return Err(BenchError::Config("db_config.port cannot be 0".to_string()));
        }

        if let Some(pos) = self.db_config.init_commands.iter().position(|c| c.is_empty()) {
            return Err(BenchError::Config(format!(
                "db_config.init_commands[{}] is empty",
                pos
            )));
        }

        Ok(())
    }

    /// `host:port` of the target endpoint
    pub fn endpoint_addr(&self) -> String {
        format!("{}:{}", self.db_config.host, self.db_config.port)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_config.connect_timeout_secs)
    }

    /// Get progress interval as Duration
    pub fn update_tick(&self) -> Duration {
        Duration::from_secs(self.cli_update_tick_secs)
    }

    /// Get drain timeout as Duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.drain_timeout_secs)
    }

    /// Aggregate rate cap, `None` when unlimited
    pub fn rate_cap(&self) -> Option<u32> {
        match self.parameters.rps {
            0 => None,
            rps => Some(rps.min(u32::MAX as u64) as u32),
        }
    }

    /// Result queue capacity
    pub fn queue_capacity(&self) -> usize {
        match self.engine.queue_capacity {
            0 => self.parameters.num_clients.max(1) as usize,
            capacity => capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> BenchConfig {
        let mut config = BenchConfig::default();
        config.parameters.queries.push(QueryConfig {
            query: "CREATE (n)".to_string(),
            ratio: 1.0,
        });
        config
    }

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.db_config.host, "localhost");
        assert_eq!(config.db_config.port, 6379);
        assert_eq!(config.db_config.graph, "graph");
        assert_eq!(config.parameters.num_clients, 50);
        assert_eq!(config.parameters.num_requests, 1_000_000);
        assert_eq!(config.parameters.random_int_min, 1);
        assert_eq!(config.parameters.random_int_max, 1_000_000);
        assert_eq!(config.parameters.random_seed, 12345);
        assert_eq!(config.connect_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn test_config_validation() {
        let mut config = sample_config();
        assert!(config.validate().is_ok());

        config.parameters.num_clients = 0;
        assert!(config.validate().is_err());
        config.parameters.num_clients = 4;

        config.parameters.random_int_max = config.parameters.random_int_min;
        assert!(config.validate().is_err());
        config.parameters.random_int_max = 10;

        config.db_config.init_commands.push(Vec::new());
        assert!(config.validate().is_err());
        config.db_config.init_commands.clear();

        config.parameters.queries.clear();
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_rate_cap_and_queue_capacity() {
        let mut config = sample_config();
        config.parameters.num_clients = 8;
        assert_eq!(config.rate_cap(), None);
        assert_eq!(config.queue_capacity(), 8);

        config.parameters.rps = 500;
        config.engine.queue_capacity = 64;
        assert_eq!(config.rate_cap(), Some(500));
        assert_eq!(config.queue_capacity(), 64);
    }

    #[test]
    fn test_config_loading_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
name: "UPDATE-BASELINE"
continue_on_error: true
db_config:
  port: 6380
  init_commands:
    - ["GRAPH.CONFIG", "SET", "RESULTSET_SIZE", "1000"]
parameters:
  num_clients: 4
  num_requests: 1000
  rps: 200
  queries:
    - {{ query: "CREATE (n)", ratio: 0.5 }}
  ro_queries:
    - {{ query: "MATCH (n) RETURN n LIMIT 1", ratio: 0.5 }}
"#
        )
        .unwrap();

        let config = BenchConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.name, "UPDATE-BASELINE");
        assert!(config.continue_on_error);
        assert_eq!(config.db_config.port, 6380);
        assert_eq!(config.db_config.host, "localhost");
        assert_eq!(config.db_config.init_commands[0][0], "GRAPH.CONFIG");
        assert_eq!(config.db_config.init_commands[0].len(), 4);
        assert_eq!(config.parameters.num_clients, 4);
        assert_eq!(config.parameters.queries.len(), 1);
        assert_eq!(config.parameters.ro_queries.len(), 1);
        assert_eq!(config.rate_cap(), Some(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dumped_yaml_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        let mut config = sample_config();
        config.name = "saved".to_string();
        config.parameters.rps = 42;

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("drain_timeout_secs: 5"));
        std::fs::write(&path, yaml).unwrap();

        let loaded = BenchConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.name, "saved");
        assert_eq!(loaded.parameters.rps, 42);
        assert_eq!(loaded.parameters.queries[0].query, "CREATE (n)");
    }

    #[test]
    fn test_empty_path_is_config_error() {
        let err = BenchConfig::from_file("").unwrap_err();
        assert!(err.is_config());
    }
}
