//! Literal values carried by the AST.

use chrono::{DateTime, Utc};
use std::hash::Hasher;

/// A literal operand value. Closed set: dialect-specific rendering lives in
/// the formatter, never on the value itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision decimal, carried as its canonical text form.
    Decimal(String),
    Str(String),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Feed this value into a structural hash.
    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                state.write_u8(*b as u8);
            },
            Value::Integer(i) => {
                state.write_u8(2);
                state.write_i64(*i);
            },
            Value::Float(f) => {
                state.write_u8(3);
                state.write_u64(f.to_bits());
            },
            Value::Decimal(d) => {
                state.write_u8(4);
                state.write(d.as_bytes());
            },
            Value::Str(s) => {
                state.write_u8(5);
                state.write(s.as_bytes());
            },
            Value::Time(t) => {
                state.write_u8(6);
                state.write_i64(t.timestamp_millis());
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash_into(&mut h);
        h.finish()
    }

    #[test]
    fn test_structural_hash_distinguishes_variants() {
        assert_ne!(hash_of(&Value::Integer(1)), hash_of(&Value::Bool(true)));
        assert_ne!(hash_of(&Value::Str("1".into())), hash_of(&Value::Integer(1)));
        assert_eq!(hash_of(&Value::Integer(5)), hash_of(&Value::from(5i64)));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(5), Value::Integer(5));
        assert_eq!(Value::from("hi"), Value::Str("hi".into()));
        assert_eq!(Value::from(true), Value::Bool(true));
    }
}
