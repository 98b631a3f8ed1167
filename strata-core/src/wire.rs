//! JSON message schemas exchanged over the publish/subscribe transport.
//!
//! Field names are part of the deployed protocol (the collector and the edge
//! peer parse them), so values travel as `temperature` even though the record
//! calls it `value`.

use crate::{Measurement, MessageError, Tier, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action name of an edge retrieval request, and of an inbound point query.
pub const ACTION_GET_MEASUREMENT: &str = "get_measurement";

/// Action name of an inbound range query.
pub const ACTION_GET_DATA_RANGE: &str = "get_data_range";

pub const POINT_NOT_FOUND: &str = "Measurement not found";
pub const RANGE_NOT_FOUND: &str = "Measurements not found in the range";

// ============================================================================
// EDGE PROTOCOL
// ============================================================================

/// Device -> edge single-record retrieval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRequest {
    pub action: String,
    pub timestamp: Timestamp,
    pub request_id: u32,
}

impl EdgeRequest {
    pub fn new(timestamp: Timestamp, request_id: u32) -> Self {
        Self {
            action: ACTION_GET_MEASUREMENT.to_string(),
            timestamp,
            request_id,
        }
    }
}

/// Edge -> device retrieval response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeResponse {
    pub request_id: u32,
    pub timestamp: Timestamp,
    pub temperature: f32,
}

impl EdgeResponse {
    /// Parse an inbound response payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let json = parse_object(payload)?;
        Ok(Self {
            request_id: field_u32(&json, "request_id")?,
            timestamp: field_u32(&json, "timestamp")?,
            temperature: field_f32(&json, "temperature")?,
        })
    }
}

/// Device -> edge bulk offload record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffloadPayload {
    pub timestamp: Timestamp,
    pub temperature: f32,
}

impl From<&Measurement> for OffloadPayload {
    fn from(m: &Measurement) -> Self {
        Self {
            timestamp: m.timestamp,
            temperature: m.value,
        }
    }
}

// ============================================================================
// INBOUND QUERIES
// ============================================================================

/// A query received from the collector on the query channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundQuery {
    /// Look up one measurement by timestamp.
    Point {
        timestamp: Timestamp,
        response_topic: Option<String>,
    },
    /// Look up every measurement with `start <= timestamp <= end`.
    Range {
        start: Timestamp,
        end: Timestamp,
        response_topic: Option<String>,
    },
}

impl InboundQuery {
    /// Parse a query payload.
    ///
    /// Missing or mistyped required fields fail the whole message; callers
    /// log it and send nothing, since there is no trustworthy request to
    /// answer. `end < start` is *not* rejected here: the range is well-formed
    /// enough to receive the range error payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let json = parse_object(payload)?;

        let action = json
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::MissingField {
                field: "action".to_string(),
            })?;

        let response_topic = json
            .get("response_topic")
            .and_then(Value::as_str)
            .map(str::to_string);

        match action {
            ACTION_GET_DATA_RANGE => Ok(InboundQuery::Range {
                start: field_u32(&json, "start_timestamp")?,
                end: field_u32(&json, "end_timestamp")?,
                response_topic,
            }),
            ACTION_GET_MEASUREMENT => Ok(InboundQuery::Point {
                timestamp: field_u32(&json, "timestamp")?,
                response_topic,
            }),
            other => Err(MessageError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }

    /// Topic named by the request, if any.
    pub fn response_topic(&self) -> Option<&str> {
        match self {
            InboundQuery::Point { response_topic, .. }
            | InboundQuery::Range { response_topic, .. } => response_topic.as_deref(),
        }
    }
}

// ============================================================================
// REPLIES
// ============================================================================

/// One measurement in a query reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReply {
    pub timestamp: Timestamp,
    pub temperature: f32,
    pub tier: Tier,
}

impl From<&Measurement> for MeasurementReply {
    fn from(m: &Measurement) -> Self {
        Self {
            timestamp: m.timestamp,
            temperature: m.value,
            tier: m.tier,
        }
    }
}

/// Point query error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointNotFound {
    pub error: String,
    pub timestamp: Timestamp,
}

/// Range query error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeNotFound {
    pub error: String,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
}

/// Encode any reply type to bytes.
pub fn encode<T: Serialize>(reply: &T) -> Result<Vec<u8>, MessageError> {
    serde_json::to_vec(reply).map_err(|e| MessageError::InvalidJson {
        reason: e.to_string(),
    })
}

/// Encode a range reply: a JSON array of measurements.
pub fn encode_range_reply(measurements: &[Measurement]) -> Result<Vec<u8>, MessageError> {
    let items: Vec<MeasurementReply> = measurements.iter().map(MeasurementReply::from).collect();
    encode(&items)
}

/// Encode the point query error payload.
pub fn encode_point_not_found(timestamp: Timestamp) -> Result<Vec<u8>, MessageError> {
    encode(&PointNotFound {
        error: POINT_NOT_FOUND.to_string(),
        timestamp,
    })
}

/// Encode the range query error payload.
pub fn encode_range_not_found(
    start_timestamp: Timestamp,
    end_timestamp: Timestamp,
) -> Result<Vec<u8>, MessageError> {
    encode(&RangeNotFound {
        error: RANGE_NOT_FOUND.to_string(),
        start_timestamp,
        end_timestamp,
    })
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

fn parse_object(payload: &[u8]) -> Result<Value, MessageError> {
    let json: Value = serde_json::from_slice(payload).map_err(|e| MessageError::InvalidJson {
        reason: e.to_string(),
    })?;
    if !json.is_object() {
        return Err(MessageError::InvalidJson {
            reason: "expected a JSON object".to_string(),
        });
    }
    Ok(json)
}

/// Read a non-negative integer field. Integral floats (`1.7e9`) are accepted
/// because some publishers only emit doubles.
fn field_u32(json: &Value, field: &str) -> Result<u32, MessageError> {
    let missing = || MessageError::MissingField {
        field: field.to_string(),
    };
    let value = json.get(field).ok_or_else(missing)?;

    if let Some(n) = value.as_u64() {
        return u32::try_from(n).map_err(|_| missing());
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f <= f64::from(u32::MAX) && f.fract() == 0.0 => {
            Ok(f as u32)
        }
        _ => Err(missing()),
    }
}

fn field_f32(json: &Value, field: &str) -> Result<f32, MessageError> {
    json.get(field)
        .and_then(Value::as_f64)
        .map(|f| f as f32)
        .ok_or_else(|| MessageError::MissingField {
            field: field.to_string(),
        })
}

// =============================================================================
// TESTS
// =============================================================================
