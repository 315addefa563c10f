//! RabbitMQ management API enrichment
//!
//! Best-effort cluster metadata (cluster name, node list) attached to an `UP`
//! report. Nothing in here may turn a healthy broker into a failing probe:
//! a client that cannot be built leaves the fetcher disabled, and every API
//! call that fails is logged and replaced by a default value.

use crate::config::{RabbitConnectionConf, RabbitHealthProperties};
use crate::error::HealthError;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub const GUEST: &str = "guest";
pub const UNKNOWN_CLUSTER: &str = "Unknown";

/// Subset of the `/api/nodes` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub running: bool,
    pub uptime: u64,
    pub mem_used: u64,
    pub mem_limit: u64,
    pub fd_used: u64,
    pub fd_total: u64,
    pub disk_free: u64,
    pub disk_free_limit: u64,
    pub sockets_used: u64,
    pub sockets_total: u64,
    pub proc_used: u64,
    pub proc_total: u64,
    pub partitions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagementInfo {
    pub cluster_name: String,
    pub nodes: Vec<NodeInfo>,
}

impl Default for ManagementInfo {
    fn default() -> Self {
        Self {
            cluster_name: UNKNOWN_CLUSTER.to_string(),
            nodes: Vec::new(),
        }
    }
}

impl ManagementInfo {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn cluster_name(&self) -> Result<ClusterName, HealthError>;
    async fn nodes(&self) -> Result<Vec<NodeInfo>, HealthError>;
}

/// `reqwest` client for the management HTTP API, basic auth.
#[derive(Debug, Clone)]
pub struct HttpManagementClient {
    base: Url,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl HttpManagementClient {
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, HealthError> {
        let mut base = Url::parse(url)
            .map_err(|e| HealthError::ManagementApi(format!("invalid url {url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(HealthError::ManagementApi(format!(
                "unsupported protocol {}",
                base.scheme()
            )));
        }
        // relative joins need a trailing slash on the endpoint
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base,
            username: username.into(),
            password: password.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HealthError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| HealthError::ManagementApi(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ManagementClient for HttpManagementClient {
    async fn cluster_name(&self) -> Result<ClusterName, HealthError> {
        self.get_json("cluster-name").await
    }

    async fn nodes(&self) -> Result<Vec<NodeInfo>, HealthError> {
        self.get_json("nodes").await
    }
}

/// `protocol://host:port<endpoint>`
pub fn management_url(props: &RabbitHealthProperties, host: &str) -> String {
    format!(
        "{}://{}:{}{}",
        props.management_protocol, host, props.management_port, props.management_endpoint
    )
}

/// Cluster metadata fetcher. Cheap to clone.
#[derive(Clone)]
pub struct RabbitManagement {
    client: Option<Arc<dyn ManagementClient>>,
}

impl RabbitManagement {
    /// Builds the HTTP client for one broker connection. Credentials fall back
    /// to guest/guest; a client that cannot be built disables the fetcher.
    pub fn new(connection: &RabbitConnectionConf, props: &RabbitHealthProperties) -> Self {
        let url = management_url(props, &connection.host);
        let username = connection.username.clone().unwrap_or_else(|| GUEST.to_string());
        let password = connection.password.clone().unwrap_or_else(|| GUEST.to_string());

        info!("About to create a Rabbit HTTP client using url: {url}.");
        match HttpManagementClient::new(&url, username, password) {
            Ok(client) => {
                info!("Rabbit HTTP client created.");
                Self::with_client(Arc::new(client))
            }
            Err(e) => {
                error!("management client disabled: {e}");
                Self::disabled()
            }
        }
    }

    pub fn with_client(client: Arc<dyn ManagementClient>) -> Self {
        Self { client: Some(client) }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Never fails: each lookup degrades to its default on its own.
    pub async fn management_info(&self) -> ManagementInfo {
        let Some(client) = &self.client else {
            return ManagementInfo::default();
        };

        let cluster_name = match client.cluster_name().await {
            Ok(cluster) => cluster.name,
            Err(e) => {
                error!("cluster name lookup failed: {e}");
                UNKNOWN_CLUSTER.to_string()
            }
        };
        let nodes = match client.nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("node list lookup failed: {e}");
                Vec::new()
            }
        };

        ManagementInfo { cluster_name, nodes }
    }
}
