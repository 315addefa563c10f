/*!
Client management simulé

Chaque sous-appel (nom du cluster, liste des nœuds) peut réussir ou échouer
indépendamment.
*/

use async_trait::async_trait;
use resilience_health::management::ClusterName;
use resilience_health::{HealthError, ManagementClient, NodeInfo};

#[derive(Debug, Clone)]
pub struct MockManagementClient {
    cluster_name: Result<String, HealthError>,
    nodes: Result<Vec<NodeInfo>, HealthError>,
}

impl MockManagementClient {
    pub fn new(cluster_name: &str, nodes: Vec<NodeInfo>) -> Self {
        Self {
            cluster_name: Ok(cluster_name.to_string()),
            nodes: Ok(nodes),
        }
    }

    /// Les deux sous-appels échouent
    pub fn unavailable() -> Self {
        Self {
            cluster_name: Err(HealthError::ManagementApi("connection refused".into())),
            nodes: Err(HealthError::ManagementApi("connection refused".into())),
        }
    }

    pub fn failing_cluster_name(mut self, error: HealthError) -> Self {
        self.cluster_name = Err(error);
        self
    }

    pub fn failing_nodes(mut self, error: HealthError) -> Self {
        self.nodes = Err(error);
        self
    }
}

#[async_trait]
impl ManagementClient for MockManagementClient {
    async fn cluster_name(&self) -> Result<ClusterName, HealthError> {
        self.cluster_name.clone().map(|name| ClusterName { name })
    }

    async fn nodes(&self) -> Result<Vec<NodeInfo>, HealthError> {
        self.nodes.clone()
    }
}

/// Nœud "running" minimal pour les assertions
pub fn running_node(name: &str) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        node_type: "disc".to_string(),
        running: true,
        ..Default::default()
    }
}
