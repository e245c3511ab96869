use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar field value of a normalized record.
///
/// JSON `null` has no counterpart: a null or missing source value means the
/// field is absent from the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Converts a JSON value into a scalar. Objects and arrays are kept as
    /// compact JSON text so nothing is silently dropped.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Integer(i)),
                None => n.as_f64().map(Value::Float),
            },
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            other => Some(Value::Text(other.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_absent() {
        assert_eq!(Value::from_json(&json!(null)), None);
    }

    #[test]
    fn numbers_keep_integer_precision() {
        assert_eq!(Value::from_json(&json!(1103370)), Some(Value::Integer(1103370)));
        assert_eq!(Value::from_json(&json!(0.5)), Some(Value::Float(0.5)));
    }

    #[test]
    fn nested_structures_become_json_text() {
        let v = Value::from_json(&json!({"a": [1, 2]})).unwrap();
        assert_eq!(v, Value::Text(r#"{"a":[1,2]}"#.to_string()));
    }

    #[test]
    fn untagged_serde_reads_back_natural_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::Integer(3),
                Value::Float(2.5),
                Value::Text("x".into())
            ]
        );
    }
}
