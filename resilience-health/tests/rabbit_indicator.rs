use resilience_health::{HealthError, HealthIndicator, ManagementInfo, RabbitManagement, Status};
use resilience_health_devkit::mock_management::running_node;
use resilience_health_devkit::{
    MockBehavior, MockBrokerConnector, MockManagementClient, ServerPropertiesBuilder, TestHarness,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn refused() -> HealthError {
    HealthError::ConnectionFailure("127.0.0.1:5672: Connection refused".into())
}

#[tokio::test]
async fn up_with_server_properties_and_no_fetcher() {
    let harness = TestHarness::new();
    let health = harness.indicator(None).health().await;

    harness.assert_status(&health, "UP").unwrap();
    harness.assert_field_exists(&health, "details.server_properties").unwrap();
    harness
        .assert_field_equals(&health, "details.server_properties.management-info", &json!({}))
        .unwrap();
    harness
        .assert_field_equals(&health, "details.server_properties.version", &json!("3.12.4"))
        .unwrap();
    harness
        .assert_field_equals(
            &health,
            "details.server_properties.capabilities.publisher_confirms",
            &json!(true),
        )
        .unwrap();
}

#[tokio::test]
async fn up_with_management_info() {
    let harness = TestHarness::new();
    let management = RabbitManagement::with_client(Arc::new(MockManagementClient::new(
        "rabbit@prod",
        vec![running_node("rabbit@a"), running_node("rabbit@b")],
    )));
    let health = harness.indicator(Some(management)).health().await;

    harness.assert_status(&health, "UP").unwrap();
    harness
        .assert_field_equals(
            &health,
            "details.server_properties.management-info.cluster_name",
            &json!("rabbit@prod"),
        )
        .unwrap();
    let nodes = &health.detail("server_properties").unwrap()["management-info"]["nodes"];
    assert_eq!(nodes.as_array().map(Vec::len), Some(2));
    assert_eq!(nodes[0]["name"], json!("rabbit@a"));
}

#[tokio::test]
async fn management_failure_never_fails_the_probe() {
    let harness = TestHarness::new();
    let management = RabbitManagement::with_client(Arc::new(MockManagementClient::unavailable()));
    let health = harness.indicator(Some(management)).health().await;

    harness.assert_status(&health, "UP").unwrap();
    harness
        .assert_field_equals(
            &health,
            "details.server_properties.management-info",
            &ManagementInfo::default().to_json(),
        )
        .unwrap();
}

#[tokio::test]
async fn version_only_when_server_properties_disabled() {
    let harness = TestHarness::new().with_properties(|p| p.include_server_properties = false);
    let health = harness.indicator(None).health().await;

    assert_eq!(health.status(), &Status::Up);
    assert_eq!(health.details().len(), 1);
    assert_eq!(health.detail("version"), Some(&json!("3.12.4")));
}

#[tokio::test]
async fn empty_version_when_broker_sends_none() {
    let broker = MockBrokerConnector::reachable(
        ServerPropertiesBuilder::rabbitmq("3.12.4").without("version").build(),
    );
    let harness = TestHarness::new()
        .with_broker(broker)
        .with_properties(|p| p.include_server_properties = false);
    let health = harness.indicator(None).health().await;

    assert_eq!(health.status(), &Status::Up);
    assert_eq!(health.detail("version"), Some(&json!("")));
}

#[tokio::test]
async fn failure_reports_rabbit_down_by_default() {
    let harness = TestHarness::new().with_broker(MockBrokerConnector::failing(refused()));
    let health = harness.indicator(None).health().await;

    harness.assert_status(&health, "RABBIT_DOWN").unwrap();
    assert_eq!(health.detail("error"), Some(&json!(refused().to_string())));
    assert!(health.detail("server_properties").is_none());
}

#[tokio::test]
async fn failure_reports_down_with_classic_down() {
    let harness = TestHarness::new()
        .with_broker(MockBrokerConnector::failing(refused()))
        .with_properties(|p| p.use_classic_down = true);
    let health = harness.indicator(None).health().await;

    assert_eq!(health.status(), &Status::Down);
    assert_eq!(health.detail("error"), Some(&json!(refused().to_string())));
}

#[tokio::test]
async fn timeout_reports_rabbit_down() {
    let harness = TestHarness::new().with_broker(MockBrokerConnector::hanging(Duration::from_secs(5)));
    let indicator = harness.indicator(None);
    let health = indicator.health().await;

    harness.assert_status(&health, "RABBIT_DOWN").unwrap();
    let expected = HealthError::Timeout { command: "rabbitHealth".into(), timeout_ms: 300 };
    assert_eq!(health.detail("error"), Some(&json!(expected.to_string())));
}

#[tokio::test]
async fn repeated_probes_are_identical() {
    let harness = TestHarness::new();
    let indicator = harness.indicator(None);
    let first = indicator.health().await;
    let second = indicator.health().await;

    assert_eq!(first, second);
    assert_eq!(harness.broker.call_count(), 2);
}

#[tokio::test]
async fn open_circuit_short_circuits_to_fallback() {
    let harness = TestHarness::new()
        .with_broker(MockBrokerConnector::failing(refused()))
        .with_properties(|p| {
            p.circuit_breaker_request_volume_threshold = 2;
            p.circuit_breaker_sleep_window_in_milliseconds = 60_000;
        });
    let indicator = harness.indicator(None);
    indicator.health().await;
    indicator.health().await;

    // broker recovered, but the circuit stays open for the sleep window
    harness
        .broker
        .set_behavior(MockBehavior::Reachable(ServerPropertiesBuilder::rabbitmq("3.12.4").build()));
    let health = indicator.health().await;

    harness.assert_status(&health, "RABBIT_DOWN").unwrap();
    assert_eq!(
        health.detail("error"),
        Some(&json!(HealthError::CircuitOpen("rabbitHealth".into()).to_string()))
    );
    assert_eq!(harness.broker.call_count(), 2);
}

#[tokio::test]
async fn circuit_recovers_after_sleep_window() {
    let harness = TestHarness::new()
        .with_broker(MockBrokerConnector::failing(refused()))
        .with_properties(|p| {
            p.circuit_breaker_request_volume_threshold = 1;
            p.circuit_breaker_sleep_window_in_milliseconds = 50;
        });
    let indicator = harness.indicator(None);
    indicator.health().await;

    harness
        .broker
        .set_behavior(MockBehavior::Reachable(ServerPropertiesBuilder::rabbitmq("3.12.4").build()));
    tokio::time::sleep(Duration::from_millis(80)).await;

    let health = indicator.health().await;
    assert_eq!(health.status(), &Status::Up);
    assert_eq!(indicator.health().await.status(), &Status::Up);
    assert_eq!(harness.broker.call_count(), 3);
}

#[tokio::test]
async fn dropped_health_request_does_not_wedge_the_circuit() {
    let harness = TestHarness::new()
        .with_broker(MockBrokerConnector::failing(refused()))
        .with_properties(|p| {
            p.circuit_breaker_request_volume_threshold = 1;
            p.circuit_breaker_sleep_window_in_milliseconds = 50;
        });
    let indicator = harness.indicator(None);
    indicator.health().await;

    harness.broker.set_behavior(MockBehavior::Hanging(Duration::from_millis(100)));
    tokio::time::sleep(Duration::from_millis(80)).await;

    // the poller disconnects while the trial call is in flight
    let dropped = tokio::time::timeout(Duration::from_millis(20), indicator.health()).await;
    assert!(dropped.is_err());

    harness
        .broker
        .set_behavior(MockBehavior::Reachable(ServerPropertiesBuilder::rabbitmq("3.12.4").build()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let health = indicator.health().await;
    assert_eq!(health.status(), &Status::Up);
}
