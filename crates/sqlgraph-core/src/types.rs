//! SQL type definitions and value compatibility.

use crate::value::Value;

/// SQL data types a scalar property can be declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    VarChar(u32),
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Timestamp,

    // UUID
    Uuid,

    // JSON
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Uuid => "UUID".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }

    /// Check if this type is an integer type (eligible for generated ids).
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::Double
                | SqlType::Decimal { .. }
        )
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::VarChar(_) | SqlType::Text)
    }

    /// Whether a value may be stored in a column of this type.
    ///
    /// `Null` is accepted here; nullability is a property concern.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (t, v) if t.is_integer() => v.as_i64().is_some(),
            (SqlType::Real | SqlType::Double, v) => v.as_f64().is_some(),
            (SqlType::Decimal { .. }, v) => v.as_f64().is_some(),
            (SqlType::Boolean, Value::Bool(_)) => true,
            (SqlType::VarChar(len), Value::Text(s)) => s.chars().count() <= *len as usize,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Bytes(_)) => true,
            (SqlType::Date, Value::Date(_)) => true,
            (SqlType::Timestamp, Value::Timestamp(_)) => true,
            (SqlType::Uuid, Value::Uuid(_)) => true,
            (SqlType::Json, _) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types_accept_any_width() {
        assert!(SqlType::BigInt.accepts(&Value::Int(3)));
        assert!(SqlType::SmallInt.accepts(&Value::BigInt(3)));
        assert!(!SqlType::BigInt.accepts(&Value::Text("3".into())));
    }

    #[test]
    fn test_text_and_varchar() {
        assert!(SqlType::Text.accepts(&Value::Text("anything".into())));
        assert!(SqlType::VarChar(3).accepts(&Value::Text("abc".into())));
        assert!(!SqlType::VarChar(3).accepts(&Value::Text("abcd".into())));
        assert!(!SqlType::Text.accepts(&Value::Bool(true)));
    }

    #[test]
    fn test_null_is_type_agnostic() {
        assert!(SqlType::Uuid.accepts(&Value::Null));
        assert!(SqlType::Boolean.accepts(&Value::Null));
    }

    #[test]
    fn test_sql_names() {
        assert_eq!(SqlType::VarChar(40).sql_name(), "VARCHAR(40)");
        assert!(SqlType::Integer.is_integer());
        assert!(!SqlType::Double.is_integer());
        assert!(SqlType::Double.is_numeric());
    }
}
