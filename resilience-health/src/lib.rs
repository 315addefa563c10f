//! resilience-health - RabbitMQ health indicator behind a circuit breaker
//!
//! - `indicator`: the broker probe and its fallback statuses
//! - `management`: cluster metadata from the management HTTP API
//! - `resilience`: isolation, timeout and circuit breaking for the probe
//! - `broker`: authenticated AMQP handshake exposing the broker server properties
//! - `aggregate` / `registry`: one probe per connection, composite reports
//! - `config`: YAML configuration (`resilience.health.rabbitmq.*`)

pub mod aggregate;
pub mod broker;
pub mod config;
pub mod error;
pub mod indicator;
pub mod management;
pub mod registry;
pub mod report;
pub mod resilience;

pub use aggregate::{CompositeHealthIndicator, HealthAggregator, OrderedHealthAggregator};
pub use broker::{BrokerConnector, ServerProperties};
pub use config::{load_config, HealthConfig, RabbitConnectionConf, RabbitHealthProperties};
pub use error::{ConfigError, HealthError};
pub use indicator::{HealthIndicator, RabbitHealthIndicator};
pub use management::{ManagementClient, ManagementInfo, NodeInfo, RabbitManagement};
pub use registry::{connection_indicators, HealthRegistry};
pub use report::{Health, HealthBuilder, Status, RABBIT_DOWN};
pub use resilience::{CircuitBreakerCommand, CommandSetter, IsolationPools};
