// src/value.rs - Variant values, status codes and data values
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::node::NodeId;

/// Core value type enumeration
///
/// This enum represents the variant values that flow from value sources into
/// alarm evaluation and from condition fields into event notifications.
///
/// # Examples
///
/// ```rust
/// use petra_ac::Value;
///
/// let int_val = Value::Int(42);
/// let float_val = Value::Float(3.5);
///
/// assert_eq!(int_val.as_float(), Some(42.0));
/// assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
/// assert!(float_val > Value::Int(3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Empty variant
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
    /// String or localized text
    String(String),
    /// Timestamp value
    #[serde(skip_deserializing)]
    DateTime(DateTime<Utc>),
    /// Node identifier (event types, source nodes, condition ids)
    #[serde(skip_deserializing)]
    NodeId(NodeId),
    /// Opaque bytes (event ids)
    #[serde(skip_deserializing)]
    ByteString(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Convert to boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0 && !f.is_nan()),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality used by filters and discrete alarms: numbers compare by
    /// magnitude regardless of integer/float encoding, everything else
    /// compares structurally.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(s), Value::NodeId(id)) | (Value::NodeId(id), Value::String(s)) => {
                s.parse::<NodeId>().map(|parsed| &parsed == id).unwrap_or(false)
            }
            _ => self == other,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::NodeId(_) => "node_id",
            Value::ByteString(_) => "bytestring",
            Value::Array(_) => "array",
        }
    }
}

impl PartialOrd for Value {
    /// Ordering is defined between numbers, between strings and between
    /// timestamps; any other pair is unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => None,
            _ => {
                let a = self.as_numeric()?;
                let b = other.as_numeric()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl Value {
    fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::DateTime(t) => f.write_str(&t.to_rfc3339()),
            Value::NodeId(id) => write!(f, "{}", id),
            Value::ByteString(b) => write!(f, "<bytestring:{} bytes>", b.len()),
            Value::Array(a) => {
                let items: Vec<String> = a.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::NodeId(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

/// OPC UA status code
///
/// The two most significant bits carry the severity (good, uncertain, bad);
/// conditions use the code of their input as their `Quality`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    pub const UNCERTAIN_LAST_USABLE_VALUE: StatusCode = StatusCode(0x4090_0000);
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    pub const BAD_WAITING_FOR_INITIAL_DATA: StatusCode = StatusCode(0x8032_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_FILTER_OPERAND_INVALID: StatusCode = StatusCode(0x8049_0000);
    pub const BAD_NODE_CLASS_INVALID: StatusCode = StatusCode(0x805F_0000);
    pub const BAD_NO_COMMUNICATION: StatusCode = StatusCode(0x8031_0000);
    pub const BAD_SENSOR_FAILURE: StatusCode = StatusCode(0x808C_0000);
    pub const BAD_NO_MATCH: StatusCode = StatusCode(0x806F_0000);
    pub const BAD_TOO_MANY_MATCHES: StatusCode = StatusCode(0x806D_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_METHOD_INVALID: StatusCode = StatusCode(0x8075_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);
    pub const BAD_EVENT_ID_UNKNOWN: StatusCode = StatusCode(0x809A_0000);
    pub const BAD_CONDITION_ALREADY_DISABLED: StatusCode = StatusCode(0x8098_0000);
    pub const BAD_CONDITION_DISABLED: StatusCode = StatusCode(0x8099_0000);
    pub const BAD_CONDITION_ALREADY_ENABLED: StatusCode = StatusCode(0x80CC_0000);
    pub const BAD_CONDITION_BRANCH_ALREADY_ACKED: StatusCode = StatusCode(0x80CF_0000);
    pub const BAD_CONDITION_BRANCH_ALREADY_CONFIRMED: StatusCode = StatusCode(0x80D0_0000);
    pub const BAD_CONDITION_ALREADY_SHELVED: StatusCode = StatusCode(0x80D1_0000);
    pub const BAD_CONDITION_NOT_SHELVED: StatusCode = StatusCode(0x80D2_0000);
    pub const BAD_SHELVING_TIME_OUT_OF_RANGE: StatusCode = StatusCode(0x80D3_0000);

    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    pub fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Value as read from a value source: value, status and source timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Value,
    pub status: StatusCode,
    pub source_timestamp: DateTime<Utc>,
}

impl DataValue {
    /// Good value stamped with the current time
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = timestamp;
        self
    }

    /// Placeholder for sources that have not produced a sample yet
    pub fn waiting() -> Self {
        Self {
            value: Value::Null,
            status: StatusCode::BAD_WAITING_FOR_INITIAL_DATA,
            source_timestamp: Utc::now(),
        }
    }
}
