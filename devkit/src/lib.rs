/*!
# resilience-health DevKit - Doubles de test pour les probes RabbitMQ

Bibliothèque facilitant les tests des health indicators avec:
- Connecteur broker simulé (joignable, en échec, bloqué)
- Client management simulé
- Faux serveur AMQP qui joue le handshake complet (login, vhost)
- Fausse API management HTTP (axum)
- Harness d'assertions sur les rapports de santé
*/

pub mod mock_broker;
pub mod mock_management;
pub mod fake_amqp;
pub mod fake_management;
pub mod test_utils;

pub use mock_broker::{MockBehavior, MockBrokerConnector, ServerPropertiesBuilder};
pub use mock_management::MockManagementClient;
pub use fake_amqp::FakeAmqpServer;
pub use fake_management::FakeManagementApi;
pub use test_utils::TestHarness;
