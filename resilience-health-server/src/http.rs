/**
 * API HEALTH - Endpoints HTTP du serveur
 *
 * - GET /health         : rapport agrégé (503 si DOWN, 200 sinon)
 * - GET /health/{name}  : rapport d'une connexion (404 si inconnue)
 *
 * Les probes tournent à chaque requête: le poller externe (orchestrateur,
 * load balancer, monitoring) pilote la fréquence.
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use resilience_health::{Health, HealthRegistry, Status};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HealthRegistry>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/health/{name}", get(get_component))
        .with_state(app_state)
}

fn http_status(status: &Status) -> StatusCode {
    match status {
        Status::Down => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

// GET /health
async fn get_health(State(app): State<AppState>) -> (StatusCode, Json<Health>) {
    let health = app.registry.health().await;
    debug!("health requested: {}", health.status());
    (http_status(health.status()), Json(health))
}

// GET /health/{name}
async fn get_component(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Health>), StatusCode> {
    let health = app.registry.component(&name).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok((http_status(health.status()), Json(health)))
}
