use thiserror::Error;

/// Failures surfaced while probing a broker.
///
/// Everything except `ManagementApi` ends up in the indicator fallback, which
/// does not branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("command {command} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("circuit open for command {0}, short-circuited")]
    CircuitOpen(String),
    #[error("thread pool {0} rejected the command")]
    Rejected(String),
    #[error("management api failure: {0}")]
    ManagementApi(String),
    #[error("isolated execution failed: {0}")]
    Isolation(String),
}

impl From<std::io::Error> for HealthError {
    fn from(e: std::io::Error) -> Self {
        HealthError::ConnectionFailure(e.to_string())
    }
}

impl From<reqwest::Error> for HealthError {
    fn from(e: reqwest::Error) -> Self {
        HealthError::ManagementApi(e.to_string())
    }
}

/// Errors raised while reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
