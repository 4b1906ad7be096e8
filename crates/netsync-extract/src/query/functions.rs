//! Built-in query functions.

use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{ExtractError, ExtractResult};

const FUNCTIONS: &[&str] = &[
    "length",
    "keys",
    "values",
    "join",
    "contains",
    "starts_with",
    "ends_with",
    "to_string",
    "to_number",
    "not_null",
    "sort",
    "reverse",
];

/// Returns true if `name` is a built-in function.
pub fn is_known(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

fn arity(name: &str, args: &[Value], expected: usize) -> ExtractResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExtractError::query_function(
            name,
            format!("expected {} argument(s), got {}", expected, args.len()),
        ))
    }
}

fn type_error(name: &str, expected: &str, found: &Value) -> ExtractError {
    ExtractError::query_function(
        name,
        format!("expected {}, found {}", expected, type_name(found)),
    )
}

/// Returns the JSON type name of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Calls a built-in function with already-evaluated arguments.
pub fn call(name: &str, args: Vec<Value>) -> ExtractResult<Value> {
    match name {
        "length" => {
            arity(name, &args, 1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(type_error(name, "string, array or object", other)),
            };
            Ok(Value::from(len))
        }
        "keys" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Object(o) => Ok(Value::Array(o.keys().cloned().map(Value::String).collect())),
                other => Err(type_error(name, "object", other)),
            }
        }
        "values" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Object(o) => Ok(Value::Array(o.values().cloned().collect())),
                other => Err(type_error(name, "object", other)),
            }
        }
        "join" => {
            arity(name, &args, 2)?;
            let glue = args[0]
                .as_str()
                .ok_or_else(|| type_error(name, "string glue", &args[0]))?;
            let items = args[1]
                .as_array()
                .ok_or_else(|| type_error(name, "array of strings", &args[1]))?;
            let parts = items
                .iter()
                .map(|v| v.as_str().ok_or_else(|| type_error(name, "string element", v)))
                .collect::<ExtractResult<Vec<&str>>>()?;
            Ok(Value::String(parts.join(glue)))
        }
        "contains" => {
            arity(name, &args, 2)?;
            match (&args[0], &args[1]) {
                (Value::Array(items), needle) => Ok(Value::Bool(items.contains(needle))),
                (Value::String(s), Value::String(needle)) => Ok(Value::Bool(s.contains(needle.as_str()))),
                (Value::String(_), _) => Ok(Value::Bool(false)),
                (other, _) => Err(type_error(name, "array or string", other)),
            }
        }
        "starts_with" | "ends_with" => {
            arity(name, &args, 2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(affix)) => Ok(Value::Bool(if name == "starts_with" {
                    s.starts_with(affix.as_str())
                } else {
                    s.ends_with(affix.as_str())
                })),
                (Value::String(_), other) | (other, _) => Err(type_error(name, "string", other)),
            }
        }
        "to_string" => {
            arity(name, &args, 1)?;
            Ok(match &args[0] {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            })
        }
        "to_number" => {
            arity(name, &args, 1)?;
            Ok(match &args[0] {
                Value::Number(n) => Value::Number(n.clone()),
                Value::String(s) => parse_number(s.trim()),
                _ => Value::Null,
            })
        }
        "not_null" => {
            if args.is_empty() {
                return Err(ExtractError::query_function(name, "expected at least one argument"));
            }
            Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null))
        }
        "sort" => {
            arity(name, &args, 1)?;
            let mut items = match &args[0] {
                Value::Array(items) => items.clone(),
                other => return Err(type_error(name, "array", other)),
            };
            let all_numbers = items.iter().all(Value::is_number);
            let all_strings = items.iter().all(Value::is_string);
            if !all_numbers && !all_strings {
                return Err(ExtractError::query_function(
                    name,
                    "array elements must all be numbers or all be strings",
                ));
            }
            items.sort_by(compare_sortable);
            Ok(Value::Array(items))
        }
        "reverse" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                other => Err(type_error(name, "array or string", other)),
            }
        }
        other => Err(ExtractError::query_function(other, "unknown function")),
    }
}

fn parse_number(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn compare_sortable(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
