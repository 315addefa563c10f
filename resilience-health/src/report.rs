//! Health report model
//!
//! A `Health` is produced once per probe invocation and handed straight to
//! the aggregator. `HealthBuilder` is the mutable sink probes write into:
//! every status call replaces the previous one, so a built report always
//! carries exactly one status.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Custom status used when broker unavailability must not degrade the
/// overall application health.
pub const RABBIT_DOWN: &str = "RABBIT_DOWN";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Unknown,
    Up,
    Down,
    Custom(String),
}

impl Status {
    /// Maps a status code to a status, well-known codes first.
    pub fn from_code(code: &str) -> Self {
        match code {
            "UNKNOWN" => Status::Unknown,
            "UP" => Status::Up,
            "DOWN" => Status::Down,
            other => Status::Custom(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Custom(code) => code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    status: Status,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    details: BTreeMap<String, Value>,
}

impl Health {
    pub fn builder() -> HealthBuilder {
        HealthBuilder::default()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthBuilder {
    status: Status,
    details: BTreeMap<String, Value>,
}

impl HealthBuilder {
    pub fn unknown(self) -> Self {
        self.status(Status::Unknown)
    }

    pub fn up(self) -> Self {
        self.status(Status::Up)
    }

    pub fn down(self) -> Self {
        self.status(Status::Down)
    }

    /// `DOWN` with the cause recorded under the `error` detail.
    pub fn down_with(self, cause: &dyn std::error::Error) -> Self {
        self.down().with_exception(cause)
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_exception(self, cause: &dyn std::error::Error) -> Self {
        self.with_detail("error", cause.to_string())
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Health {
        Health {
            status: self.status,
            details: self.details,
        }
    }
}
