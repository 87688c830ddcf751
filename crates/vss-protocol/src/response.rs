//! Server response and event frames.
//!
//! Success responses carry `action`, `requestId` and `timestamp`; errors use
//! the `{error: {number, reason, message}}` envelope. Frames are built as
//! JSON values and rendered by the codec.

use chrono::Utc;
use serde_json::{json, Map, Value};

/// Error categories, each shaping into a fixed `{number, reason}` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// 400: JSON parse failure, missing key, wrong type, malformed path.
    BadRequest(String),
    /// 400: set value outside the declared datatype range.
    OutOfBounds(String),
    /// 403: access check failed.
    Forbidden(String),
    /// 404: path resolves to zero leaves; holds the requested path.
    PathNotFound(String),
    /// 401: token validation failed.
    InvalidToken,
    /// 401: unexpected failure in a handler.
    Unknown(String),
    /// 400: unsubscribe for a subscription id nobody holds.
    UnsubscribeFailed,
    /// 501: permission management daemon unreachable.
    DaemonUnavailable,
}

impl ErrorKind {
    pub fn number(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::OutOfBounds(_) | Self::UnsubscribeFailed => 400,
            Self::InvalidToken | Self::Unknown(_) => 401,
            Self::Forbidden(_) => 403,
            Self::PathNotFound(_) => 404,
            Self::DaemonUnavailable => 501,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "Bad Request",
            Self::OutOfBounds(_) => "Value passed is out of bounds",
            Self::Forbidden(_) => "Forbidden",
            Self::PathNotFound(_) => "Path not found",
            Self::InvalidToken => "Invalid Token",
            Self::Unknown(_) | Self::UnsubscribeFailed => "Unknown error",
            Self::DaemonUnavailable => "No token received from permission management daemon",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::BadRequest(m) | Self::OutOfBounds(m) | Self::Forbidden(m) | Self::Unknown(m) => {
                m.clone()
            }
            Self::PathNotFound(path) => format!("I can not find {path} in my db"),
            Self::InvalidToken => "Check the JWT token passed".to_string(),
            Self::UnsubscribeFailed => "Error while unsubscribing".to_string(),
            Self::DaemonUnavailable => {
                "Check if the permission management daemon is running".to_string()
            }
        }
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn envelope(action: Option<&str>, request_id: Option<&Value>) -> Map<String, Value> {
    let mut frame = Map::new();
    if let Some(action) = action {
        frame.insert("action".to_string(), Value::from(action));
    }
    if let Some(id) = request_id {
        frame.insert("requestId".to_string(), id.clone());
    }
    frame.insert("timestamp".to_string(), Value::from(now()));
    frame
}

/// The error envelope. `action` is omitted when the request was too broken
/// to name one.
pub fn error(action: Option<&str>, request_id: Option<&Value>, kind: &ErrorKind) -> Value {
    let mut frame = envelope(action, request_id);
    frame.insert(
        "error".to_string(),
        json!({
            "number": kind.number(),
            "reason": kind.reason(),
            "message": kind.message(),
        }),
    );
    Value::Object(frame)
}

pub fn authorize_ack(action: &str, request_id: Option<&Value>, ttl: i64) -> Value {
    let mut frame = envelope(Some(action), request_id);
    frame.insert("TTL".to_string(), Value::from(ttl));
    Value::Object(frame)
}

/// `get` response for a single matched leaf.
pub fn get_single(
    request_id: Option<&Value>,
    path: &str,
    value: Value,
    timestamp: i64,
    warning: Option<String>,
) -> Value {
    let mut frame = envelope(Some("get"), request_id);
    frame.insert("path".to_string(), Value::from(path));
    frame.insert("value".to_string(), value);
    frame.insert("timestamp".to_string(), Value::from(timestamp));
    if let Some(warning) = warning {
        frame.insert("warning".to_string(), Value::from(warning));
    }
    Value::Object(frame)
}

/// `get` response for multiple matched leaves: an array of `{path: value}`
/// entries.
pub fn get_multi(
    request_id: Option<&Value>,
    values: Vec<Value>,
    timestamp: i64,
    warning: Option<String>,
) -> Value {
    let mut frame = envelope(Some("get"), request_id);
    frame.insert("value".to_string(), Value::Array(values));
    frame.insert("timestamp".to_string(), Value::from(timestamp));
    if let Some(warning) = warning {
        frame.insert("warning".to_string(), Value::from(warning));
    }
    Value::Object(frame)
}

pub fn set_ack(request_id: Option<&Value>) -> Value {
    Value::Object(envelope(Some("set"), request_id))
}

pub fn subscribe_ack(request_id: Option<&Value>, subscription_id: u32) -> Value {
    let mut frame = envelope(Some("subscribe"), request_id);
    frame.insert("subscriptionId".to_string(), Value::from(subscription_id));
    Value::Object(frame)
}

pub fn unsubscribe_ack(request_id: Option<&Value>, subscription_id: u32) -> Value {
    let mut frame = envelope(Some("unsubscribe"), request_id);
    frame.insert("subscriptionId".to_string(), Value::from(subscription_id));
    Value::Object(frame)
}

pub fn metadata(request_id: Option<&Value>, metadata: Value) -> Value {
    let mut frame = envelope(Some("getMetadata"), request_id);
    frame.insert("metadata".to_string(), metadata);
    Value::Object(frame)
}

pub fn update_metadata_ack(request_id: Option<&Value>) -> Value {
    Value::Object(envelope(Some("updateMetaData"), request_id))
}

/// The event frame pushed to subscribers on every value change.
pub fn subscription_event(subscription_id: u32, value: Value, timestamp: i64) -> Value {
    json!({
        "action": "subscribe",
        "subscriptionId": subscription_id,
        "value": value,
        "timestamp": timestamp,
    })
}
