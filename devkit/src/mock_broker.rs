/*!
Connecteur broker simulé

Remplace `AmqpConnector` dans les tests: le comportement (joignable, en
échec, bloqué) est modifiable à chaud et chaque appel est compté.
*/

use async_trait::async_trait;
use amq_protocol::types::{AMQPValue, FieldTable, LongString};
use resilience_health::{BrokerConnector, HealthError, ServerProperties};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Le broker répond avec ces propriétés
    Reachable(ServerProperties),
    /// La connexion échoue avec cette erreur
    Failing(HealthError),
    /// Le broker ne répond pas avant ce délai
    Hanging(Duration),
}

#[derive(Clone)]
pub struct MockBrokerConnector {
    behavior: Arc<Mutex<MockBehavior>>,
    calls: Arc<AtomicUsize>,
}

impl MockBrokerConnector {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reachable(props: ServerProperties) -> Self {
        Self::new(MockBehavior::Reachable(props))
    }

    pub fn failing(error: HealthError) -> Self {
        Self::new(MockBehavior::Failing(error))
    }

    pub fn hanging(delay: Duration) -> Self {
        Self::new(MockBehavior::Hanging(delay))
    }

    /// Change le comportement pour les appels suivants
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Nombre d'appels reçus (les appels court-circuités n'arrivent pas ici)
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MockBrokerConnector {
    async fn server_properties(&self) -> Result<ServerProperties, HealthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            MockBehavior::Reachable(props) => Ok(props),
            MockBehavior::Failing(error) => Err(error),
            MockBehavior::Hanging(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ServerProperties::default())
            }
        }
    }
}

/// Construit des propriétés serveur telles qu'envoyées par RabbitMQ
#[derive(Debug, Clone, Default)]
pub struct ServerPropertiesBuilder {
    props: BTreeMap<String, AMQPValue>,
}

impl ServerPropertiesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propriétés typiques d'un nœud RabbitMQ
    pub fn rabbitmq(version: &str) -> Self {
        let mut capabilities = FieldTable::default();
        for cap in [
            "publisher_confirms",
            "exchange_exchange_bindings",
            "basic.nack",
            "consumer_cancel_notify",
            "connection.blocked",
            "authentication_failure_close",
            "per_consumer_qos",
        ] {
            capabilities.insert(cap.to_string().into(), AMQPValue::Boolean(true));
        }

        Self::new()
            .with_str("product", "RabbitMQ")
            .with_str("version", version)
            .with_str("platform", "Erlang/OTP 26.1")
            .with_str("cluster_name", "rabbit@localhost")
            .with_str("copyright", "Copyright (c) 2007-2023 VMware, Inc. or its affiliates.")
            .with("capabilities", AMQPValue::FieldTable(capabilities))
    }

    pub fn with(mut self, key: &str, value: AMQPValue) -> Self {
        self.props.insert(key.to_string(), value);
        self
    }

    /// Valeur chaîne longue (`S`), le type des propriétés texte de RabbitMQ
    pub fn with_str(self, key: &str, value: &str) -> Self {
        self.with(key, AMQPValue::LongString(LongString::from(value.to_string())))
    }

    pub fn without(mut self, key: &str) -> Self {
        self.props.remove(key);
        self
    }

    pub fn build(self) -> ServerProperties {
        let mut table = FieldTable::default();
        for (key, value) in self.props {
            table.insert(key.into(), value);
        }
        table
    }
}
