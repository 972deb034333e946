//! Hashable identity keys built from [`Value`]s.
//!
//! `Value` cannot implement `Eq`/`Hash` because of floating point variants, yet
//! graph normalization, diffing and fetch assembly all need to index entities
//! by identifier. [`KeyValue`] wraps one or more values with a hash that is
//! consistent with [`Value::same_as`].

use crate::value::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One or more values identifying a row (an identifier or a unique-key tuple).
#[derive(Debug, Clone)]
pub struct KeyValue(Vec<Value>);

impl KeyValue {
    /// Key made of a single value.
    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    /// Key made of several values (composite unique keys).
    pub fn composite(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// The key parts, in declaration order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// The first key part; identifiers are always single-valued.
    pub fn first(&self) -> Option<&Value> {
        self.0.first()
    }

    /// Whether any part is NULL (such a key never identifies a row).
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.same_as(b))
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_value(v, state);
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            parts => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        Self::single(value)
    }
}

/// Hash a single Value into the hasher.
///
/// Integers of every width hash identically, and integral doubles hash like
/// the integer they equal, so the hash agrees with [`Value::same_as`].
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    if let Some(i) = v.as_i64() {
        1u8.hash(hasher);
        i.hash(hasher);
        return;
    }
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Double(f) => {
            if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
                1u8.hash(hasher);
                (*f as i64).hash(hasher);
            } else {
                2u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
        }
        Value::Bool(b) => {
            3u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Decimal(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            7u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Timestamp(ts) => {
            8u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            9u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            10u8.hash(hasher);
            j.to_string().hash(hasher);
        }
        Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {}
    }
}
