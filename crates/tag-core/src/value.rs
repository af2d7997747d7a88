use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Serialized state of a model: attribute name to current value.
pub type Snapshot = BTreeMap<String, TagValue>;

/// Declared type of a tag. Fixed when the owning cell is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Float,
    Integer,
    Boolean,
    String,
}

impl TagKind {
    /// Value used when neither an override nor a declared default exists.
    pub fn zero(self) -> TagValue {
        match self {
            TagKind::Float => TagValue::Float(0.0),
            TagKind::Integer => TagValue::Integer(0),
            TagKind::Boolean => TagValue::Boolean(false),
            TagKind::String => TagValue::String(String::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Float => "float",
            TagKind::Integer => "int",
            TagKind::Boolean => "bool",
            TagKind::String => "str",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed tag value.
///
/// Serialized as the bare JSON scalar. Variant order matters for untagged
/// decoding: integers must be tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl TagValue {
    pub fn kind(&self) -> TagKind {
        match self {
            TagValue::Float(_) => TagKind::Float,
            TagValue::Integer(_) => TagKind::Integer,
            TagValue::Boolean(_) => TagKind::Boolean,
            TagValue::String(_) => TagKind::String,
        }
    }

    /// Textual values are persisted through the string endpoint.
    pub fn is_textual(&self) -> bool {
        matches!(self, TagValue::String(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Float(v) => Some(*v),
            TagValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TagValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn expect_kind(&self, expected: TagKind) -> Result<(), TypeMismatch> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(TypeMismatch {
                expected,
                found: self.kind(),
            })
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::Integer(v) => write!(f, "{v}"),
            TagValue::Boolean(v) => write!(f, "{v}"),
            TagValue::String(v) => f.write_str(v),
        }
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Integer(v as i64)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Boolean(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected a {expected} value, got {found}")]
pub struct TypeMismatch {
    pub expected: TagKind,
    pub found: TagKind,
}
