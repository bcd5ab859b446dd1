use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A literal value carried by a `Constant` node or a command payload.
///
/// Values never reach SQL text; they travel out-of-band as parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Binary data
    Bytes(Vec<u8>),
    /// Enum-valued constant. Binds as its ordinal, never its display name.
    Enum(EnumValue),
}

/// An enum constant with both its display name and its stored representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub type_name: String,
    pub variant: String,
    pub ordinal: i64,
}

/// Implemented by application enums that are stored as integers.
///
/// ```
/// use sqlroute::ast::{SqlEnum, Value};
///
/// #[derive(Clone, Copy)]
/// enum Tier { Bronze = 1, Gold = 3 }
///
/// impl SqlEnum for Tier {
///     const TYPE_NAME: &'static str = "Tier";
///     fn variant_name(&self) -> &'static str {
///         match self { Tier::Bronze => "Bronze", Tier::Gold => "Gold" }
///     }
///     fn ordinal(&self) -> i64 { *self as i64 }
/// }
///
/// assert_eq!(Value::from_enum(&Tier::Gold).into_parameter(), Value::Int(3));
/// ```
pub trait SqlEnum {
    const TYPE_NAME: &'static str;

    fn variant_name(&self) -> &'static str;

    fn ordinal(&self) -> i64;
}

impl Value {
    pub fn from_enum<E: SqlEnum>(value: &E) -> Self {
        Value::Enum(EnumValue {
            type_name: E::TYPE_NAME.to_string(),
            variant: value.variant_name().to_string(),
            ordinal: value.ordinal(),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type tag used in error messages (never the value itself).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
        }
    }

    /// The value as it is bound to the driver. Enums collapse to their ordinal.
    pub fn into_parameter(self) -> Value {
        match self {
            Value::Enum(e) => Value::Int(e.ordinal),
            other => other,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
