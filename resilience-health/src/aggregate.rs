//! Aggregation of several named reports into one.

use crate::config::DEFAULT_STATUS_ORDER;
use crate::indicator::HealthIndicator;
use crate::report::{Health, Status};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

pub trait HealthAggregator: Send + Sync {
    fn aggregate(&self, healths: &BTreeMap<String, Health>) -> Health;
}

/// Picks the most severe status according to a fixed order.
///
/// Codes missing from the order rank after every listed code, so a custom
/// status such as `RABBIT_DOWN` never outranks `UP`.
#[derive(Debug, Clone)]
pub struct OrderedHealthAggregator {
    order: Vec<String>,
}

impl Default for OrderedHealthAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_ORDER.iter().map(|s| s.to_string()).collect())
    }
}

impl OrderedHealthAggregator {
    pub fn new(order: Vec<String>) -> Self {
        Self {
            order: order.into_iter().map(|code| code.to_uppercase()).collect(),
        }
    }

    pub fn aggregate_status<'a>(&self, statuses: impl IntoIterator<Item = &'a Status>) -> Status {
        statuses
            .into_iter()
            .min_by(|a, b| self.rank(a).cmp(&self.rank(b)).then_with(|| a.code().cmp(b.code())))
            .cloned()
            .unwrap_or(Status::Unknown)
    }

    fn rank(&self, status: &Status) -> usize {
        self.order
            .iter()
            .position(|code| code == status.code())
            .unwrap_or(self.order.len())
    }
}

impl HealthAggregator for OrderedHealthAggregator {
    fn aggregate(&self, healths: &BTreeMap<String, Health>) -> Health {
        let status = self.aggregate_status(healths.values().map(Health::status));
        healths
            .iter()
            .fold(Health::builder().status(status), |builder, (name, health)| {
                builder.with_detail(name.clone(), health.to_json())
            })
            .build()
    }
}

/// Runs its children concurrently and aggregates their reports by name.
pub struct CompositeHealthIndicator {
    indicators: BTreeMap<String, Arc<dyn HealthIndicator>>,
    aggregator: Arc<dyn HealthAggregator>,
}

impl CompositeHealthIndicator {
    pub fn new(aggregator: Arc<dyn HealthAggregator>) -> Self {
        Self {
            indicators: BTreeMap::new(),
            aggregator,
        }
    }

    pub fn add_health_indicator(&mut self, name: impl Into<String>, indicator: Arc<dyn HealthIndicator>) {
        self.indicators.insert(name.into(), indicator);
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

#[async_trait]
impl HealthIndicator for CompositeHealthIndicator {
    async fn health(&self) -> Health {
        let reports: BTreeMap<String, Health> =
            join_all(self.indicators.iter().map(|(name, indicator)| async move {
                (name.clone(), indicator.health().await)
            }))
            .await
            .into_iter()
            .collect();
        self.aggregator.aggregate(&reports)
    }
}
