//! The closed value universe and declared column types of the teaching engine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Declared column type. The engine never infers types; every column carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Int,
    Float,
    Varchar,
    Char,
}

impl SqlType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Some(SqlType::Int),
            "FLOAT" | "DOUBLE" | "REAL" => Some(SqlType::Float),
            "VARCHAR" | "TEXT" | "STRING" => Some(SqlType::Varchar),
            "CHAR" => Some(SqlType::Char),
            _ => None,
        }
    }
}

/// A runtime value. `NULL | int | float | string` — the closed universe of spec section 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort numeric view, used by aggregates and B+tree key comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    pub fn as_str_repr(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Coerce a raw value (typically parsed from a plan literal) to a column's declared type.
    pub fn coerce(&self, ty: SqlType) -> Value {
        if self.is_null() {
            return Value::Null;
        }
        match ty {
            SqlType::Int => match self {
                Value::Int(_) => self.clone(),
                Value::Float(f) => Value::Int(*f as i64),
                Value::Text(s) => s
                    .parse::<i64>()
                    .map(Value::Int)
                    .unwrap_or_else(|_| self.clone()),
                Value::Null => Value::Null,
            },
            SqlType::Float => match self {
                Value::Float(_) => self.clone(),
                Value::Int(i) => Value::Float(*i as f64),
                Value::Text(s) => s
                    .parse::<f64>()
                    .map(Value::Float)
                    .unwrap_or_else(|_| self.clone()),
                Value::Null => Value::Null,
            },
            SqlType::Varchar | SqlType::Char => match self {
                Value::Text(_) => self.clone(),
                other => Value::Text(other.as_str_repr()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64).to_bits() == b.to_bits()
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                1u8.hash(state); // same bucket as Int so 1 == 1.0 collide, matching PartialEq
                (*f as i64).hash(state);
            }
            Value::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
        }
    }
}

/// Heterogeneous key comparison for the B+tree (spec section 4.6): coerce both operands to
/// float when possible, else compare as strings.
pub fn cmp_key(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(fa), Some(fb)) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
        _ => a.as_str_repr().cmp(&b.as_str_repr()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_type_parses_case_insensitively() {
        assert_eq!(SqlType::parse("int"), Some(SqlType::Int));
        assert_eq!(SqlType::parse("VARCHAR"), Some(SqlType::Varchar));
        assert_eq!(SqlType::parse("bogus"), None);
    }

    #[test]
    fn coerce_text_to_int() {
        let v = Value::Text("42".into()).coerce(SqlType::Int);
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn coerce_null_stays_null() {
        assert_eq!(Value::Null.coerce(SqlType::Int), Value::Null);
    }

    #[test]
    fn cmp_key_numeric_order() {
        assert_eq!(cmp_key(&Value::Int(2), &Value::Float(10.0)), Ordering::Less);
    }

    #[test]
    fn cmp_key_falls_back_to_string() {
        assert_eq!(
            cmp_key(&Value::Text("b".into()), &Value::Text("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn value_json_roundtrip() {
        for v in [Value::Null, Value::Int(7), Value::Float(1.5), Value::Text("hi".into())] {
            let json = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }
}
