use resilience_health::broker::{server_version, AmqpConnector};
use resilience_health::{
    BrokerConnector, HealthConfig, HealthError, HealthRegistry, RabbitConnectionConf, Status,
};
use resilience_health_devkit::{FakeAmqpServer, ServerPropertiesBuilder};
use serde_json::json;

fn connection(server: &FakeAmqpServer) -> RabbitConnectionConf {
    RabbitConnectionConf {
        host: server.host(),
        port: server.port(),
        ..Default::default()
    }
}

/// Management enrichment off: no HTTP calls in these scenarios.
fn config() -> HealthConfig {
    let mut cfg = HealthConfig::default();
    cfg.resilience.health.rabbitmq.include_server_properties = false;
    cfg
}

#[tokio::test]
async fn connector_reads_handshake_properties() {
    let props = ServerPropertiesBuilder::rabbitmq("3.12.4").build();
    let server = FakeAmqpServer::start(&props).await.unwrap();

    let read = AmqpConnector::new(server.host(), server.port())
        .server_properties()
        .await
        .unwrap();
    assert_eq!(read, props);
    assert_eq!(server_version(&read), "3.12.4");
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.logins(), vec!["guest"]);
}

#[tokio::test]
async fn connector_logs_in_with_configured_credentials() {
    let props = ServerPropertiesBuilder::rabbitmq("3.12.4").build();
    let server = FakeAmqpServer::start_with_credentials(&props, "app", "secret").await.unwrap();
    let conn = RabbitConnectionConf {
        username: Some("app".into()),
        password: Some("secret".into()),
        ..connection(&server)
    };

    let read = AmqpConnector::from_connection(&conn).server_properties().await.unwrap();
    assert_eq!(read, props);
    assert_eq!(server.logins(), vec!["app"]);
}

#[tokio::test]
async fn connector_reports_refused_login() {
    let props = ServerPropertiesBuilder::rabbitmq("3.12.4").build();
    let server = FakeAmqpServer::start_with_credentials(&props, "app", "secret").await.unwrap();
    let conn = RabbitConnectionConf {
        username: Some("app".into()),
        password: Some("wrong".into()),
        ..connection(&server)
    };

    let err = AmqpConnector::from_connection(&conn).server_properties().await.unwrap_err();
    let HealthError::ConnectionFailure(msg) = &err else {
        panic!("expected a connection failure, got {err:?}");
    };
    assert!(msg.contains("403 ACCESS_REFUSED"), "{msg}");
}

#[tokio::test]
async fn connector_reports_unknown_virtual_host() {
    let props = ServerPropertiesBuilder::rabbitmq("3.12.4").build();
    let server = FakeAmqpServer::start_with_virtual_hosts(&props, &["/"]).await.unwrap();
    let conn = RabbitConnectionConf {
        virtual_host: "orders".into(),
        ..connection(&server)
    };

    let err = AmqpConnector::from_connection(&conn).server_properties().await.unwrap_err();
    assert!(matches!(err, HealthError::ConnectionFailure(msg) if msg.contains("530 NOT_ALLOWED")));
}

#[tokio::test]
async fn refused_login_falls_back_to_rabbit_down() {
    let props = ServerPropertiesBuilder::rabbitmq("3.12.4").build();
    let server = FakeAmqpServer::start_with_credentials(&props, "app", "secret").await.unwrap();
    let mut cfg = config();
    cfg.rabbitmq.connections.insert(
        "primary".into(),
        RabbitConnectionConf {
            username: Some("app".into()),
            password: Some("expired".into()),
            ..connection(&server)
        },
    );

    let health = HealthRegistry::from_config(&cfg).health().await;
    assert_eq!(health.status().code(), "RABBIT_DOWN");
    let error = health.to_json()["details"]["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("connection failure"), "{error}");
    assert!(error.contains("ACCESS_REFUSED"), "{error}");
}

#[tokio::test]
async fn connector_reports_protocol_mismatch() {
    let server = FakeAmqpServer::start_with_reply(b"AMQP\x00\x00\x09\x01".to_vec()).await.unwrap();
    let err = AmqpConnector::new(server.host(), server.port())
        .server_properties()
        .await
        .unwrap_err();
    assert!(matches!(err, HealthError::Protocol(_)));
}

#[tokio::test]
async fn single_connection_is_root_indicator() {
    let server = FakeAmqpServer::start(&ServerPropertiesBuilder::rabbitmq("3.13.1").build())
        .await
        .unwrap();
    let mut cfg = config();
    cfg.rabbitmq.connections.insert("primary".into(), connection(&server));

    let registry = HealthRegistry::from_config(&cfg);
    let health = registry.health().await;
    assert_eq!(health.to_json(), json!({"status": "UP", "details": {"version": "3.13.1"}}));
}

#[tokio::test]
async fn composite_keyed_by_connection_name() {
    let server = FakeAmqpServer::start(&ServerPropertiesBuilder::rabbitmq("3.12.4").build())
        .await
        .unwrap();
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut cfg = config();
    cfg.rabbitmq.connections.insert("primary".into(), connection(&server));
    cfg.rabbitmq.connections.insert(
        "secondary".into(),
        RabbitConnectionConf { host: "127.0.0.1".into(), port: dead_port, ..Default::default() },
    );

    let registry = HealthRegistry::from_config(&cfg);
    let health = registry.health().await;

    // RABBIT_DOWN is not part of the status order: UP wins
    assert_eq!(health.status(), &Status::Up);
    let details = health.to_json()["details"].clone();
    assert_eq!(details["primary"], json!({"status": "UP", "details": {"version": "3.12.4"}}));
    assert_eq!(details["secondary"]["status"], json!("RABBIT_DOWN"));
    assert!(details["secondary"]["details"]["error"]
        .as_str()
        .unwrap()
        .starts_with("connection failure"));

    let secondary = registry.component("secondary").await.unwrap();
    assert_eq!(secondary.status().code(), "RABBIT_DOWN");
}

#[tokio::test]
async fn classic_down_degrades_the_composite() {
    let server = FakeAmqpServer::start(&ServerPropertiesBuilder::rabbitmq("3.12.4").build())
        .await
        .unwrap();
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut cfg = config();
    cfg.resilience.health.rabbitmq.use_classic_down = true;
    cfg.rabbitmq.connections.insert("primary".into(), connection(&server));
    cfg.rabbitmq.connections.insert(
        "secondary".into(),
        RabbitConnectionConf { host: "127.0.0.1".into(), port: dead_port, ..Default::default() },
    );

    let health = HealthRegistry::from_config(&cfg).health().await;
    assert_eq!(health.status(), &Status::Down);
}
