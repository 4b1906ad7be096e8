//! Result-shape coercion and emptiness checks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The shape a field declares for its extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    /// A scalar string.
    Str,
    /// A mapping.
    Dict,
    /// A sequence.
    List,
}

impl ResultShape {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResultShape::Str => "str",
            ResultShape::Dict => "dict",
            ResultShape::List => "list",
        }
    }

    /// The value a field of this shape holds when nothing was extracted.
    pub fn empty(&self) -> Value {
        match self {
            ResultShape::Str => Value::String(String::new()),
            ResultShape::Dict => Value::Object(Map::new()),
            ResultShape::List => Value::Array(Vec::new()),
        }
    }

    /// Coerces `value` into this shape.
    ///
    /// - `str`: the first element of a sequence, scalars as text, `null` as `""`
    /// - `dict`: a sequence of mappings is merged in order, anything else
    ///   that is not a mapping becomes `{}`
    /// - `list`: `null` becomes `[]`, any other non-sequence is wrapped
    pub fn coerce(&self, value: Value) -> Value {
        match self {
            ResultShape::Str => match value {
                Value::Array(items) => match items.into_iter().next() {
                    Some(first) => self.coerce(first),
                    None => self.empty(),
                },
                Value::Null => self.empty(),
                Value::String(s) => Value::String(s),
                Value::Object(map) => Value::String(Value::Object(map).to_string()),
                other => Value::String(other.to_string()),
            },
            ResultShape::Dict => match value {
                Value::Object(map) => Value::Object(map),
                Value::Array(items) => {
                    let mut merged = Map::new();
                    for item in items {
                        if let Value::Object(map) = item {
                            merged.extend(map);
                        }
                    }
                    Value::Object(merged)
                }
                _ => self.empty(),
            },
            ResultShape::List => match value {
                Value::Array(items) => Value::Array(items),
                Value::Null => self.empty(),
                other => Value::Array(vec![other]),
            },
        }
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true for `null`, blank strings, `[]` and `{}`.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_str_shape() {
        assert_eq!(ResultShape::Str.coerce(json!(["DATA"])), json!("DATA"));
        assert_eq!(ResultShape::Str.coerce(json!(["a", "b"])), json!("a"));
        assert_eq!(ResultShape::Str.coerce(json!([])), json!(""));
        assert_eq!(ResultShape::Str.coerce(Value::Null), json!(""));
        assert_eq!(ResultShape::Str.coerce(json!(9214)), json!("9214"));
        assert_eq!(ResultShape::Str.coerce(json!([[7]])), json!("7"));
    }

    #[test]
    fn test_dict_shape() {
        assert_eq!(
            ResultShape::Dict.coerce(json!([{"a": 1}, {"b": 2}, "x"])),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(ResultShape::Dict.coerce(json!("x")), json!({}));
    }

    #[test]
    fn test_list_shape() {
        assert_eq!(ResultShape::List.coerce(json!("10.0.0.1/24")), json!(["10.0.0.1/24"]));
        assert_eq!(ResultShape::List.coerce(Value::Null), json!([]));
    }

    #[test]
    fn test_shape_from_yaml_name() {
        let shape: ResultShape = serde_json::from_value(json!("str")).unwrap();
        assert_eq!(shape, ResultShape::Str);
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(0)));
    }
}
