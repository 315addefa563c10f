//! Broker connection accessor
//!
//! The probe only needs what the broker announces when a connection opens:
//! its server properties (product, version, platform, capabilities...).
//! `BrokerConnector` is the seam; `AmqpConnector` is the TCP implementation.

pub mod amqp;

use crate::error::HealthError;
use amq_protocol::types::{AMQPValue, FieldTable};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use amqp::AmqpConnector;

/// Properties sent by the broker in `connection.start`.
pub type ServerProperties = FieldTable;

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Opens a connection and returns the server properties of the handshake.
    async fn server_properties(&self) -> Result<ServerProperties, HealthError>;
}

/// JSON rendering of a field value keeping native types.
pub fn field_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Float(v) => Value::from(*v),
        AMQPValue::Double(v) => Value::from(*v),
        AMQPValue::Timestamp(ts) => Value::from(*ts),
        AMQPValue::ShortString(s) => Value::String(s.to_string()),
        AMQPValue::LongString(s) => Value::String(s.to_string()),
        AMQPValue::FieldArray(items) => Value::Array(items.as_slice().iter().map(field_to_json).collect()),
        AMQPValue::FieldTable(table) => Value::Object(table_to_json(table)),
        AMQPValue::Void => Value::Null,
        other => Value::String(format!("{other:?}")),
    }
}

pub fn table_to_json(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.to_string(), field_to_json(value)))
        .collect()
}

/// Text form of a scalar field value (`""` for void).
pub fn field_to_string(value: &AMQPValue) -> String {
    match value {
        AMQPValue::Void => String::new(),
        other => match field_to_json(other) {
            Value::String(s) => s,
            json => json.to_string(),
        },
    }
}

/// Report form of the server properties: nested tables pass through as
/// objects, every other value is stringified.
pub fn transform_server_properties(props: &ServerProperties) -> Map<String, Value> {
    props
        .inner()
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AMQPValue::FieldTable(table) => Value::Object(table_to_json(table)),
                scalar => Value::String(field_to_string(scalar)),
            };
            (key.to_string(), value)
        })
        .collect()
}

pub fn server_property<'a>(props: &'a ServerProperties, name: &str) -> Option<&'a AMQPValue> {
    props
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

/// Stringified `version` property, empty when the broker did not send one.
pub fn server_version(props: &ServerProperties) -> String {
    server_property(props, "version")
        .map(field_to_string)
        .unwrap_or_default()
}
