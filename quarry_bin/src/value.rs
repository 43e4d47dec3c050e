//! Column types, runtime values, coercion, and the order-preserving key
//! encoding used by the B+-tree.

use crate::errors::QueryError;
use bytes::BufMut;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of the canonical `YYYY-MM-DD HH:MM:SS` form.
pub const DATETIME_LEN: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColType {
    Int,
    Bigint,
    Float,
    Char,
    Datetime,
}

impl ColType {
    /// The on-disk width; `declared_len` only matters for CHAR.
    pub fn width(self, declared_len: usize) -> usize {
        match self {
            ColType::Int | ColType::Float => 4,
            ColType::Bigint => 8,
            ColType::Char => declared_len,
            ColType::Datetime => DATETIME_LEN,
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColType::Int => write!(f, "INT"),
            ColType::Bigint => write!(f, "BIGINT"),
            ColType::Float => write!(f, "FLOAT"),
            ColType::Char => write!(f, "CHAR"),
            ColType::Datetime => write!(f, "DATETIME"),
        }
    }
}

/// A runtime value of one of the five column types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Bigint(i64),
    Float(f32),
    Str(String),
    Datetime(String),
}

impl Value {
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Bigint(_) => ColType::Bigint,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Char,
            Value::Datetime(_) => ColType::Datetime,
        }
    }

    /// Reads a value back out of record bytes.
    pub fn from_bytes(ty: ColType, bytes: &[u8]) -> Value {
        match ty {
            ColType::Int => Value::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Bigint => Value::Bigint(i64::from_le_bytes(bytes[..8].try_into().unwrap())),
            ColType::Float => Value::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Char => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            ColType::Datetime => {
                Value::Datetime(String::from_utf8_lossy(&bytes[..DATETIME_LEN]).into_owned())
            }
        }
    }

    /// Writes the value into a record slot of `out.len()` bytes. CHAR and
    /// DATETIME are null-padded.
    pub fn write_bytes(&self, out: &mut [u8]) {
        match self {
            Value::Int(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Bigint(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Str(s) | Value::Datetime(s) => {
                out.fill(0);
                out[..s.len()].copy_from_slice(s.as_bytes());
            }
        }
    }

    /// Appends a memcmp-ordered encoding of the value: integers with the
    /// sign bit flipped in big-endian form, floats in IEEE total order,
    /// strings as their padded bytes. Byte comparison of encoded keys then
    /// matches value comparison, embedded NULs included.
    pub fn encode_key(&self, out: &mut Vec<u8>, width: usize) {
        match self {
            Value::Int(v) => out.put_u32((*v as u32) ^ (1 << 31)),
            Value::Bigint(v) => out.put_u64((*v as u64) ^ (1 << 63)),
            Value::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits & (1 << 31) != 0 {
                    !bits
                } else {
                    bits | (1 << 31)
                };
                out.put_u32(ordered);
            }
            Value::Str(s) | Value::Datetime(s) => {
                out.put_slice(s.as_bytes());
                out.put_bytes(0, width - s.len());
            }
        }
    }

    /// Coerces the value to the target column type, per the assignment
    /// rules: INT widens to BIGINT, strings validate into DATETIME, and
    /// CHAR enforces its declared length.
    pub fn coerce_to(self, ty: ColType, declared_len: usize) -> Result<Value, QueryError> {
        match (self, ty) {
            (v @ Value::Int(_), ColType::Int) => Ok(v),
            (Value::Int(v), ColType::Bigint) => Ok(Value::Bigint(v as i64)),
            (v @ Value::Bigint(_), ColType::Bigint) => Ok(v),
            (Value::Int(v), ColType::Float) => Ok(Value::Float(v as f32)),
            (v @ Value::Float(_), ColType::Float) => Ok(v),
            (Value::Str(s), ColType::Char) => {
                if s.len() > declared_len {
                    Err(QueryError::StringOverflow {
                        len: s.len(),
                        cap: declared_len,
                    })
                } else {
                    Ok(Value::Str(s))
                }
            }
            (Value::Str(s) | Value::Datetime(s), ColType::Datetime) => {
                if is_valid_datetime(&s) {
                    Ok(Value::Datetime(s))
                } else {
                    Err(QueryError::InvalidDatetime(s))
                }
            }
            (v, _) => Err(QueryError::IncompatibleType {
                lhs: v.col_type().to_string(),
                rhs: ty.to_string(),
            }),
        }
    }

    /// Typed comparison with the cross-type widening rules: INT/BIGINT
    /// compare as integers, any numeric pair involving FLOAT compares as
    /// floating point, strings and datetimes compare bytewise, and
    /// string-versus-numeric is a type error.
    pub fn compare(&self, other: &Value) -> Result<Ordering, QueryError> {
        use Value::*;
        let ord = match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Bigint(a), Bigint(b)) => a.cmp(b),
            (Int(a), Bigint(b)) => (*a as i64).cmp(b),
            (Bigint(a), Int(b)) => a.cmp(&(*b as i64)),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Float(_), Int(_) | Bigint(_)) | (Int(_) | Bigint(_), Float(_)) => {
                let a = self.as_f64().unwrap();
                let b = other.as_f64().unwrap();
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (Str(a) | Datetime(a), Str(b) | Datetime(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => {
                return Err(QueryError::IncompatibleType {
                    lhs: self.col_type().to_string(),
                    rhs: other.col_type().to_string(),
                })
            }
        };
        Ok(ord)
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Bigint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bigint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) | Value::Datetime(s) => write!(f, "{s}"),
        }
    }
}

/// Canonical 19-byte `YYYY-MM-DD HH:MM:SS`, years 1000 through 9999.
pub fn is_valid_datetime(s: &str) -> bool {
    if s.len() != DATETIME_LEN {
        return false;
    }
    if NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_err() {
        return false;
    }
    matches!(s[..4].parse::<i32>(), Ok(year) if (1000..=9999).contains(&year))
}
