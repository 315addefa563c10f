/*!
Fausse API management RabbitMQ (axum)

Sert `/api/cluster-name` et `/api/nodes` sur un port éphémère. Une réponse
absente (`None`) se traduit par un 500. Les en-têtes `Authorization` reçus
sont enregistrés pour les assertions.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use resilience_health::NodeInfo;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct ApiState {
    cluster_name: Option<String>,
    nodes: Option<Vec<NodeInfo>>,
    authorizations: Arc<Mutex<Vec<String>>>,
}

impl ApiState {
    fn record(&self, headers: &HeaderMap) {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.authorizations.lock().unwrap().push(auth.to_string());
        }
    }
}

pub struct FakeManagementApi {
    addr: SocketAddr,
    state: ApiState,
    handle: JoinHandle<()>,
}

impl FakeManagementApi {
    pub async fn start(cluster_name: Option<&str>, nodes: Option<Vec<NodeInfo>>) -> Result<Self> {
        let state = ApiState {
            cluster_name: cluster_name.map(str::to_string),
            nodes,
            authorizations: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/api/cluster-name", get(get_cluster_name))
            .route("/api/nodes", get(get_nodes))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("fake management api stopped: {e}");
            }
        });

        Ok(Self { addr, state, handle })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL de base, au format attendu par `HttpManagementClient`
    pub fn url(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.state.authorizations.lock().unwrap().clone()
    }
}

impl Drop for FakeManagementApi {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_cluster_name(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    state.record(&headers);
    match &state.cluster_name {
        Some(name) => Ok(Json(json!({ "name": name }))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn get_nodes(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<NodeInfo>>, StatusCode> {
    state.record(&headers);
    match &state.nodes {
        Some(nodes) => Ok(Json(nodes.clone())),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
