//! Typed tag values.
//!
//! Controllers store values big-endian. Strings use the two-byte header
//! layout `[max_len, actual_len, bytes...]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Data type of a tag, resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Byte,
    Word,
    Int,
    DWord,
    DInt,
    Real,
    /// Counted string with a maximum length in bytes.
    String(u8),
}

impl DataType {
    /// Number of bytes the value occupies in controller memory.
    pub fn width(&self) -> usize {
        match self {
            DataType::Bool | DataType::Byte => 1,
            DataType::Word | DataType::Int => 2,
            DataType::DWord | DataType::DInt | DataType::Real => 4,
            DataType::String(max_len) => 2 + *max_len as usize,
        }
    }

    /// Decode raw controller bytes.
    pub fn decode(&self, raw: &[u8]) -> Result<TagValue, TagError> {
        let needed = match self {
            DataType::String(_) => 2,
            other => other.width(),
        };
        if raw.len() < needed {
            return Err(TagError::Decode {
                data_type: *self,
                reason: format!("expected {} bytes, got {}", needed, raw.len()),
            });
        }

        let value = match self {
            DataType::Bool => TagValue::Bool(raw[0] & 0x01 != 0),
            DataType::Byte => TagValue::Byte(raw[0]),
            DataType::Word => TagValue::Word(u16::from_be_bytes([raw[0], raw[1]])),
            DataType::Int => TagValue::Int(i16::from_be_bytes([raw[0], raw[1]])),
            DataType::DWord => TagValue::DWord(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            DataType::DInt => TagValue::DInt(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            DataType::Real => TagValue::Real(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            DataType::String(_) => {
                let len = raw[1] as usize;
                let body = raw.get(2..2 + len).ok_or_else(|| TagError::Decode {
                    data_type: *self,
                    reason: format!("string header claims {} bytes, payload has {}", len, raw.len() - 2),
                })?;
                TagValue::String(String::from_utf8_lossy(body).into_owned())
            }
        };
        Ok(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOL"),
            DataType::Byte => write!(f, "BYTE"),
            DataType::Word => write!(f, "WORD"),
            DataType::Int => write!(f, "INT"),
            DataType::DWord => write!(f, "DWORD"),
            DataType::DInt => write!(f, "DINT"),
            DataType::Real => write!(f, "REAL"),
            DataType::String(n) => write!(f, "STRING[{}]", n),
        }
    }
}

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Byte(u8),
    Word(u16),
    Int(i16),
    DWord(u32),
    DInt(i32),
    Real(f32),
    String(String),
}

impl TagValue {
    /// Encode for the given data type, rejecting mismatched variants.
    pub fn encode(&self, data_type: &DataType) -> Result<Vec<u8>, TagError> {
        let bytes = match (self, data_type) {
            (TagValue::Bool(v), DataType::Bool) => vec![u8::from(*v)],
            (TagValue::Byte(v), DataType::Byte) => vec![*v],
            (TagValue::Word(v), DataType::Word) => v.to_be_bytes().to_vec(),
            (TagValue::Int(v), DataType::Int) => v.to_be_bytes().to_vec(),
            (TagValue::DWord(v), DataType::DWord) => v.to_be_bytes().to_vec(),
            (TagValue::DInt(v), DataType::DInt) => v.to_be_bytes().to_vec(),
            (TagValue::Real(v), DataType::Real) => v.to_be_bytes().to_vec(),
            (TagValue::String(s), DataType::String(max_len)) => {
                if s.len() > *max_len as usize {
                    return Err(TagError::StringTooLong {
                        len: s.len(),
                        max_len: *max_len,
                    });
                }
                let mut buf = Vec::with_capacity(data_type.width());
                buf.push(*max_len);
                buf.push(s.len() as u8);
                buf.extend_from_slice(s.as_bytes());
                buf.resize(data_type.width(), 0);
                buf
            }
            (value, expected) => {
                return Err(TagError::TypeMismatch {
                    expected: *expected,
                    actual: value.type_name(),
                })
            }
        };
        Ok(bytes)
    }

    fn type_name(&self) -> &'static str {
        match self {
            TagValue::Bool(_) => "bool",
            TagValue::Byte(_) => "byte",
            TagValue::Word(_) => "word",
            TagValue::Int(_) => "int",
            TagValue::DWord(_) => "dword",
            TagValue::DInt(_) => "dint",
            TagValue::Real(_) => "real",
            TagValue::String(_) => "string",
        }
    }
}

/// A named tag bound to a controller address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    /// Logical tag name (cache key).
    pub name: String,
    /// Controller address, e.g. `DB500.DBD0`.
    pub address: String,
    pub data_type: DataType,
}

/// Conversion errors between tag values and controller bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("cannot decode {data_type}: {reason}")]
    Decode { data_type: DataType, reason: String },

    #[error("type mismatch: tag is {expected}, value is {actual}")]
    TypeMismatch {
        expected: DataType,
        actual: &'static str,
    },

    #[error("string of {len} bytes exceeds STRING[{max_len}]")]
    StringTooLong { len: usize, max_len: u8 },
}
