use thiserror::Error;

/// Errors that can occur while preparing or running a benchmark
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid workload or runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target endpoint could not be reached or never became ready
    #[error("Endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// A single query failed on the server
    #[error("Query execution failed: {0}")]
    Execution(String),

    /// The server sent a reply we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Latency histogram could not be created or merged
    #[error("Histogram error: {0}")]
    Histogram(String),

    /// The run was stopped by a fatal worker failure
    #[error("Benchmark aborted: {0}")]
    Aborted(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using BenchError
pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Whether the error was raised before any request was sent
    pub fn is_config(&self) -> bool {
        matches!(self, BenchError::Config(_))
    }
}

impl From<String> for BenchError {
    fn from(s: String) -> Self {
        BenchError::Other(s)
    }
}

impl From<&str> for BenchError {
    fn from(s: &str) -> Self {
        BenchError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        BenchError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BenchError {
    fn from(err: serde_yaml::Error) -> Self {
        BenchError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for BenchError {
    fn from(err: config::ConfigError) -> Self {
        BenchError::Config(err.to_string())
    }
}

impl From<hdrhistogram::CreationError> for BenchError {
    fn from(err: hdrhistogram::CreationError) -> Self {
        BenchError::Histogram(format!("{:?}", err))
    }
}
