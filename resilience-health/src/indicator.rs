use crate::broker::{server_version, transform_server_properties, BrokerConnector};
use crate::config::RabbitHealthProperties;
use crate::error::HealthError;
use crate::management::RabbitManagement;
use crate::report::{Health, Status, RABBIT_DOWN};
use crate::resilience::{CircuitBreakerCommand, IsolationPools};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Anything that can report its health to an aggregator.
#[async_trait]
pub trait HealthIndicator: Send + Sync {
    async fn health(&self) -> Health;
}

/// Broker liveness probe, executed through a `CircuitBreakerCommand`.
///
/// On success the report is `UP` with either the server properties (plus
/// cluster metadata under `management-info`) or only the broker `version`.
/// On any failure the report is `DOWN` when `useClassicDown` is set, the
/// custom `RABBIT_DOWN` status otherwise, with the cause under `error`.
#[derive(Clone)]
pub struct RabbitHealthIndicator {
    connector: Arc<dyn BrokerConnector>,
    management: Option<RabbitManagement>,
    properties: Arc<RabbitHealthProperties>,
    command: CircuitBreakerCommand<Health>,
}

impl RabbitHealthIndicator {
    /// Probe with an isolation pool of its own.
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        management: Option<RabbitManagement>,
        properties: RabbitHealthProperties,
    ) -> Self {
        Self::with_pools(connector, management, properties, &IsolationPools::default())
    }

    /// Probe sharing the pool registered under its `hystrixThreadPoolKey`.
    pub fn with_pools(
        connector: Arc<dyn BrokerConnector>,
        management: Option<RabbitManagement>,
        properties: RabbitHealthProperties,
        pools: &IsolationPools,
    ) -> Self {
        let command = CircuitBreakerCommand::with_pools(properties.command_setter(), pools);
        Self {
            connector,
            management,
            properties: Arc::new(properties),
            command,
        }
    }

    pub fn command(&self) -> &CircuitBreakerCommand<Health> {
        &self.command
    }

    fn fallback(&self, cause: HealthError) -> Health {
        warn!(
            group = %self.command.group_key(),
            command = %self.command.command_key(),
            "rabbit health check failed: {cause}"
        );
        let builder = if self.properties.use_classic_down {
            Health::builder().down_with(&cause)
        } else {
            Health::builder()
                .status(Status::Custom(RABBIT_DOWN.to_string()))
                .with_exception(&cause)
        };
        builder.build()
    }
}

#[async_trait]
impl HealthIndicator for RabbitHealthIndicator {
    async fn health(&self) -> Health {
        let body = check(
            self.connector.clone(),
            self.management.clone(),
            self.properties.include_server_properties,
        );
        match self.command.execute(body).await {
            Ok(health) => health,
            Err(cause) => self.fallback(cause),
        }
    }
}

async fn check(
    connector: Arc<dyn BrokerConnector>,
    management: Option<RabbitManagement>,
    include_server_properties: bool,
) -> Result<Health, HealthError> {
    let props = connector.server_properties().await?;
    let builder = Health::builder().up();

    if !include_server_properties {
        return Ok(builder.with_detail("version", server_version(&props)).build());
    }

    let mut server_properties = transform_server_properties(&props);
    let management_info = match management {
        Some(management) => management.management_info().await.to_json(),
        None => Value::Object(Map::new()),
    };
    server_properties.insert("management-info".to_string(), management_info);
    debug!("broker up, {} server properties", props.inner().len());

    Ok(builder
        .with_detail("server_properties", Value::Object(server_properties))
        .build())
}
