//! Message Transformer
//!
//! Decodes one broker message body into a [`RawEvent`], checks the single
//! required field and reshapes it into the [`NormalizedEvent`] dashboards
//! expect. Serialization is a separate [`Encoder`] step.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::websocket::Payload;

/// Inbound reading as published by a device.
///
/// Only `value` is checked. The other fields are carried through as whatever
/// JSON they were, or `null` when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub value: Option<Value>,
    pub unit: Value,
    pub device_id: Value,
    pub timestamp: Value,
    pub sensor_type: Value,
}

impl RawEvent {
    /// Decode a message body. The body must be a JSON object (or `null`).
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        let fields: Option<Map<String, Value>> = serde_json::from_slice(body)?;
        Ok(Self::from_map(fields.unwrap_or_default()))
    }

    /// Pick the known fields out of a decoded object; unknown keys are ignored
    pub fn from_map(mut fields: Map<String, Value>) -> Self {
        let value = fields.remove("value");
        let mut take = |key: &str| fields.remove(key).unwrap_or(Value::Null);
        Self {
            value,
            unit: take("unit"),
            device_id: take("device_id"),
            timestamp: take("timestamp"),
            sensor_type: take("sensor_type"),
        }
    }
}

/// Client-facing event. Field names on the wire are fixed by existing dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(rename = "humedad")]
    value: f64,
    unit: Value,
    device: Value,
    #[serde(rename = "ts")]
    timestamp: Value,
    #[serde(serialize_with = "serialize_rfc3339")]
    created_at: DateTime<Utc>,
    sensor_type: Value,
}

impl NormalizedEvent {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &Value {
        &self.unit
    }

    pub fn device(&self) -> &Value {
        &self.device
    }

    /// Device-reported timestamp, untouched
    pub fn timestamp(&self) -> &Value {
        &self.timestamp
    }

    /// When this relay transformed the event
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sensor_type(&self) -> &Value {
        &self.sensor_type
    }
}

fn serialize_rfc3339<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Body could not be decoded as a JSON object
#[derive(Debug, Error)]
#[error("Malformed message body: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Event is permanently unprocessable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required field `value`")]
    MissingValue,

    #[error("Field `value` is not a number: {0}")]
    InvalidValue(Value),
}

/// Normalized event could not be serialized
#[derive(Debug, Error)]
#[error("Failed to encode event: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Normalize an event, stamping it with the current time
pub fn transform(raw: &RawEvent) -> Result<NormalizedEvent, ValidationError> {
    transform_at(raw, Utc::now())
}

/// Normalize an event with an explicit creation time
pub fn transform_at(
    raw: &RawEvent,
    created_at: DateTime<Utc>,
) -> Result<NormalizedEvent, ValidationError> {
    let value = match &raw.value {
        None => return Err(ValidationError::MissingValue),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ValidationError::InvalidValue(v.clone()))?,
    };

    Ok(NormalizedEvent {
        value,
        unit: raw.unit.clone(),
        device: raw.device_id.clone(),
        timestamp: raw.timestamp.clone(),
        created_at,
        sensor_type: raw.sensor_type.clone(),
    })
}

/// Turns a normalized event into the payload handed to the hub
pub trait Encoder: Send + Sync {
    fn encode(&self, event: &NormalizedEvent) -> Result<Payload, EncodeError>;
}

/// JSON text encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, event: &NormalizedEvent) -> Result<Payload, EncodeError> {
        let text = serde_json::to_string(event)?;
        Ok(Payload::from(text))
    }
}
