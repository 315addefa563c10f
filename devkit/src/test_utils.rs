/*!
Test Harness pour les health indicators

Facilite l'écriture de tests avec:
- Broker simulé joignable par défaut (RabbitMQ 3.12.4)
- Propriétés avec un timeout court pour les scénarios de blocage
- Assertions sur le statut et les champs imbriqués d'un rapport
*/

use crate::mock_broker::{MockBrokerConnector, ServerPropertiesBuilder};
use anyhow::Result;
use resilience_health::{Health, RabbitHealthIndicator, RabbitHealthProperties, RabbitManagement};
use serde_json::Value;
use std::sync::Arc;

pub const TEST_TIMEOUT_MS: u64 = 300;

pub struct TestHarness {
    pub broker: MockBrokerConnector,
    pub properties: RabbitHealthProperties,
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();

        Self {
            broker: MockBrokerConnector::reachable(ServerPropertiesBuilder::rabbitmq("3.12.4").build()),
            properties: RabbitHealthProperties {
                execution_isolation_thread_timeout_in_milliseconds: TEST_TIMEOUT_MS,
                ..Default::default()
            },
        }
    }

    pub fn with_broker(mut self, broker: MockBrokerConnector) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_properties(mut self, configure: impl FnOnce(&mut RabbitHealthProperties)) -> Self {
        configure(&mut self.properties);
        self
    }

    /// Indicator branché sur le broker simulé du harness
    pub fn indicator(&self, management: Option<RabbitManagement>) -> RabbitHealthIndicator {
        RabbitHealthIndicator::new(Arc::new(self.broker.clone()), management, self.properties.clone())
    }

    pub fn assert_status(&self, health: &Health, expected: &str) -> Result<()> {
        let actual = health.status().code();
        if actual != expected {
            anyhow::bail!("Status mismatch: expected {expected}, got {actual} ({})", health.to_json());
        }
        Ok(())
    }

    /// Chemin pointé dans le JSON du rapport, ex: `details.server_properties.version`
    pub fn assert_field_exists(&self, health: &Health, field_path: &str) -> Result<()> {
        match get_nested_field(&health.to_json(), field_path) {
            Some(Value::Null) | None => anyhow::bail!("Field '{field_path}' not found in report"),
            Some(_) => Ok(()),
        }
    }

    pub fn assert_field_equals(&self, health: &Health, field_path: &str, expected: &Value) -> Result<()> {
        let json = health.to_json();
        let Some(actual) = get_nested_field(&json, field_path) else {
            anyhow::bail!("Field '{field_path}' not found for comparison");
        };
        if actual != expected {
            anyhow::bail!("Field '{field_path}' mismatch: expected {expected:?}, got {actual:?}");
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs visibles avec `cargo test -- --nocapture`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}
