//! Registration of rabbit probes
//!
//! One `RabbitHealthIndicator` per configured broker connection. A single
//! connection is exposed as the root indicator directly; several are wrapped
//! in a `CompositeHealthIndicator` keyed by connection name.

use crate::aggregate::{CompositeHealthIndicator, HealthAggregator, OrderedHealthAggregator};
use crate::broker::{AmqpConnector, BrokerConnector};
use crate::config::HealthConfig;
use crate::indicator::{HealthIndicator, RabbitHealthIndicator};
use crate::management::RabbitManagement;
use crate::report::Health;
use crate::resilience::IsolationPools;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct HealthRegistry {
    root: Option<Arc<dyn HealthIndicator>>,
    indicators: BTreeMap<String, Arc<dyn HealthIndicator>>,
    aggregator: Arc<dyn HealthAggregator>,
}

impl HealthRegistry {
    /// Wires AMQP connectors and management clients from the configuration.
    pub fn from_config(config: &HealthConfig) -> Self {
        let probes = connection_indicators(config, &IsolationPools::default());
        Self::new(config, probes)
    }

    pub fn new(config: &HealthConfig, probes: BTreeMap<String, RabbitHealthIndicator>) -> Self {
        let aggregator: Arc<dyn HealthAggregator> =
            Arc::new(OrderedHealthAggregator::new(config.health.status_order.clone()));

        if !config.rabbit_enabled() {
            info!("rabbit health indicator disabled by resilience.health.rabbit.enabled");
            return Self {
                root: None,
                indicators: BTreeMap::new(),
                aggregator,
            };
        }

        let indicators: BTreeMap<String, Arc<dyn HealthIndicator>> = probes
            .into_iter()
            .map(|(name, probe)| (name, Arc::new(probe) as Arc<dyn HealthIndicator>))
            .collect();

        let root = match indicators.len() {
            0 => None,
            1 => indicators.values().next().cloned(),
            _ => {
                let mut composite = CompositeHealthIndicator::new(aggregator.clone());
                for (name, indicator) in &indicators {
                    composite.add_health_indicator(name.clone(), indicator.clone());
                }
                Some(Arc::new(composite) as Arc<dyn HealthIndicator>)
            }
        };
        info!("registered {} rabbit health indicator(s)", indicators.len());

        Self {
            root,
            indicators,
            aggregator,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.indicators.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Report of the root indicator; `UNKNOWN` when nothing is registered.
    pub async fn health(&self) -> Health {
        match &self.root {
            Some(root) => root.health().await,
            None => self.aggregator.aggregate(&BTreeMap::new()),
        }
    }

    pub async fn component(&self, name: &str) -> Option<Health> {
        let indicator = self.indicators.get(name)?;
        Some(indicator.health().await)
    }
}

/// One indicator per configured connection, all isolated in the pools of
/// `pools`. Nothing is built while the indicator is disabled.
pub fn connection_indicators(
    config: &HealthConfig,
    pools: &IsolationPools,
) -> BTreeMap<String, RabbitHealthIndicator> {
    if !config.rabbit_enabled() {
        return BTreeMap::new();
    }

    let props = config.properties();
    config
        .connections()
        .into_iter()
        .map(|(name, conn)| {
            let connector: Arc<dyn BrokerConnector> = Arc::new(AmqpConnector::from_connection(&conn));
            // enrichment only ends up in the report with server properties on
            let management = props
                .include_server_properties
                .then(|| RabbitManagement::new(&conn, props));
            let indicator = RabbitHealthIndicator::with_pools(connector, management, props.clone(), pools);
            (name, indicator)
        })
        .collect()
}
