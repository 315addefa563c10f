/**
 * RESILIENCE HEALTH SERVER - Point d'entrée du serveur health
 *
 * RÔLE : charge la configuration, enregistre une probe RabbitMQ par
 * connexion configurée et expose les rapports via HTTP.
 *
 * ARCHITECTURE : chaque requête GET /health exécute les probes (via le
 * circuit breaker) ; aucune boucle de polling interne.
 */

mod http;

use anyhow::{Context, Result};
use resilience_health::{load_config, HealthRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("resilience_health=info,resilience_health_server=info")),
        )
        .init();

    let config = load_config().await;
    let registry = HealthRegistry::from_config(&config);
    info!("health indicators: [{}]", registry.names().join(", "));

    let app = http::build_router(http::AppState { registry: Arc::new(registry) });

    let addr: SocketAddr = std::env::var("RESILIENCE_HEALTH_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()
        .context("invalid RESILIENCE_HEALTH_ADDR")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
