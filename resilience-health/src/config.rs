use crate::error::ConfigError;
use crate::resilience::CommandSetter;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

/// Root of the YAML configuration file.
///
/// ```yaml
/// resilience:
///   health:
///     rabbit:
///       enabled: true
///     rabbitmq:
///       executionIsolationThreadTimeoutInMilliseconds: 1000
///       useClassicDown: false
/// rabbitmq:
///   connections:
///     primary: { host: rabbit-1, port: 5672, username: app, password: secret, virtual_host: / }
/// health:
///   statusOrder: [DOWN, OUT_OF_SERVICE, UP, UNKNOWN]
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub resilience: ResilienceConf,
    pub rabbitmq: RabbitConf,
    pub health: AggregationConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceConf {
    pub health: ResilienceHealthConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceHealthConf {
    pub rabbit: RabbitToggle,
    pub rabbitmq: RabbitHealthProperties,
}

/// `resilience.health.rabbit.enabled`: gates registration of the probe.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RabbitToggle {
    pub enabled: bool,
}

impl Default for RabbitToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `resilience.health.rabbitmq.*`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RabbitHealthProperties {
    pub hystrix_command_group_key: String,
    pub hystrix_thread_pool_key: String,
    pub hystrix_command_key: String,
    pub execution_isolation_thread_timeout_in_milliseconds: u64,
    pub include_server_properties: bool,
    pub use_classic_down: bool,
    pub management_port: u16,
    pub management_protocol: String,
    pub management_endpoint: String,
    pub circuit_breaker_request_volume_threshold: u32,
    pub circuit_breaker_error_threshold_percentage: u8,
    pub circuit_breaker_sleep_window_in_milliseconds: u64,
    pub metrics_rolling_statistical_window_in_milliseconds: u64,
    pub thread_pool_core_size: usize,
}

impl Default for RabbitHealthProperties {
    fn default() -> Self {
        Self {
            hystrix_command_group_key: "resilience.health".into(),
            hystrix_thread_pool_key: "HealthIndicators".into(),
            hystrix_command_key: "rabbitHealth".into(),
            execution_isolation_thread_timeout_in_milliseconds: 1000,
            include_server_properties: true,
            use_classic_down: false,
            management_port: 15672,
            management_protocol: "http".into(),
            management_endpoint: "/api/".into(),
            circuit_breaker_request_volume_threshold: 20,
            circuit_breaker_error_threshold_percentage: 50,
            circuit_breaker_sleep_window_in_milliseconds: 5000,
            metrics_rolling_statistical_window_in_milliseconds: 10_000,
            thread_pool_core_size: 10,
        }
    }
}

impl RabbitHealthProperties {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.execution_isolation_thread_timeout_in_milliseconds)
    }

    /// Executor settings derived from these properties.
    pub fn command_setter(&self) -> CommandSetter {
        CommandSetter {
            group_key: self.hystrix_command_group_key.clone(),
            command_key: self.hystrix_command_key.clone(),
            pool_key: self.hystrix_thread_pool_key.clone(),
            timeout: self.timeout(),
            pool_size: self.thread_pool_core_size.max(1),
            request_volume_threshold: self.circuit_breaker_request_volume_threshold,
            error_threshold_percentage: self.circuit_breaker_error_threshold_percentage,
            sleep_window: Duration::from_millis(self.circuit_breaker_sleep_window_in_milliseconds),
            rolling_window: Duration::from_millis(
                self.metrics_rolling_statistical_window_in_milliseconds,
            ),
        }
    }
}

/// Broker connections, keyed by name.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RabbitConf {
    pub connections: BTreeMap<String, RabbitConnectionConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RabbitConnectionConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub virtual_host: String,
}

impl Default for RabbitConnectionConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5672,
            username: None,
            password: None,
            virtual_host: "/".into(),
        }
    }
}

pub const DEFAULT_CONNECTION_NAME: &str = "rabbitmq";

pub const DEFAULT_STATUS_ORDER: [&str; 4] = ["DOWN", "OUT_OF_SERVICE", "UP", "UNKNOWN"];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregationConf {
    pub status_order: Vec<String>,
}

impl Default for AggregationConf {
    fn default() -> Self {
        Self {
            status_order: DEFAULT_STATUS_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HealthConfig {
    pub fn rabbit_enabled(&self) -> bool {
        self.resilience.health.rabbit.enabled
    }

    pub fn properties(&self) -> &RabbitHealthProperties {
        &self.resilience.health.rabbitmq
    }

    /// Configured connections, or a single default one when none is declared.
    pub fn connections(&self) -> BTreeMap<String, RabbitConnectionConf> {
        if self.rabbitmq.connections.is_empty() {
            let mut single = BTreeMap::new();
            single.insert(DEFAULT_CONNECTION_NAME.to_string(), RabbitConnectionConf::default());
            single
        } else {
            self.rabbitmq.connections.clone()
        }
    }
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> Result<HealthConfig, ConfigError> {
    let txt = fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(HealthConfig::default());
    }
    Ok(serde_yaml::from_str(&txt)?)
}

/// Reads `$RESILIENCE_HEALTH_CONFIG` (default `resilience-health.yaml`).
/// A missing or invalid file yields the defaults.
pub async fn load_config() -> HealthConfig {
    let path = std::env::var("RESILIENCE_HEALTH_CONFIG")
        .unwrap_or_else(|_| "resilience-health.yaml".into());
    if !Path::new(&path).exists() {
        warn!("no configuration file at {path}, using defaults");
        return HealthConfig::default();
    }
    match load_config_from(&path).await {
        Ok(cfg) => {
            info!("configuration loaded from {path}");
            cfg
        }
        Err(e) => {
            warn!("invalid configuration in {path}: {e}");
            HealthConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = HealthConfig::default();
        let props = cfg.properties();
        assert!(cfg.rabbit_enabled());
        assert_eq!(props.hystrix_command_group_key, "resilience.health");
        assert_eq!(props.hystrix_thread_pool_key, "HealthIndicators");
        assert_eq!(props.hystrix_command_key, "rabbitHealth");
        assert_eq!(props.timeout(), Duration::from_millis(1000));
        assert!(props.include_server_properties);
        assert!(!props.use_classic_down);
        assert_eq!(props.management_port, 15672);
        assert_eq!(props.management_protocol, "http");
        assert_eq!(props.management_endpoint, "/api/");

        let conns = cfg.connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[DEFAULT_CONNECTION_NAME].port, 5672);
    }

    #[tokio::test]
    async fn test_yaml_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
resilience:
  health:
    rabbit:
      enabled: false
    rabbitmq:
      hystrixCommandKey: brokerProbe
      executionIsolationThreadTimeoutInMilliseconds: 250
      useClassicDown: true
rabbitmq:
  connections:
    primary:
      host: rabbit-1
      username: app
    secondary:
      host: rabbit-2
      port: 5673
      virtual_host: orders
"#
        )
        .unwrap();

        let cfg = load_config_from(file.path()).await.unwrap();
        assert!(!cfg.rabbit_enabled());
        let props = cfg.properties();
        assert_eq!(props.hystrix_command_key, "brokerProbe");
        assert_eq!(props.timeout(), Duration::from_millis(250));
        assert!(props.use_classic_down);
        // untouched keys keep their defaults
        assert_eq!(props.hystrix_thread_pool_key, "HealthIndicators");

        let conns = cfg.connections();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns["primary"].port, 5672);
        assert_eq!(conns["primary"].username.as_deref(), Some("app"));
        assert_eq!(conns["secondary"].port, 5673);
        assert_eq!(conns["primary"].virtual_host, "/");
        assert_eq!(conns["secondary"].virtual_host, "orders");
        assert_eq!(cfg.health.status_order, AggregationConf::default().status_order);
    }

    #[tokio::test]
    async fn test_empty_file_is_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = load_config_from(file.path()).await.unwrap();
        assert_eq!(cfg, HealthConfig::default());
    }

    #[test]
    fn test_command_setter() {
        let setter = RabbitHealthProperties::default().command_setter();
        assert_eq!(setter.pool_key, "HealthIndicators");
        assert_eq!(setter.pool_size, 10);
        assert_eq!(setter.sleep_window, Duration::from_secs(5));
    }
}
