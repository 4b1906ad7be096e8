//! Query evaluation over `serde_json::Value`.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::ast::{Comparator, Node};
use super::functions;
use crate::error::ExtractResult;

/// Returns false for `null`, `false`, empty strings, empty lists and empty
/// objects.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Evaluates a node against a value.
///
/// Missing fields, out-of-range indexes and projections over the wrong type
/// yield `null`; only function argument errors are reported.
pub fn evaluate(node: &Node, value: &Value) -> ExtractResult<Value> {
    match node {
        Node::Identity => Ok(value.clone()),
        Node::Field(name) => Ok(match value {
            Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Node::Index(index) => Ok(match value {
            Value::Array(items) => resolve_index(items.len(), *index)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Node::Literal(literal) => Ok(literal.clone()),
        Node::Subexpr(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            evaluate(rhs, &left)
        }
        Node::Pipe(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            evaluate(rhs, &left)
        }
        Node::Projection(lhs, rhs) => match evaluate(lhs, value)? {
            Value::Array(items) => project(items.iter(), rhs),
            _ => Ok(Value::Null),
        },
        Node::ObjectProjection(lhs, rhs) => match evaluate(lhs, value)? {
            Value::Object(map) => project(map.values(), rhs),
            _ => Ok(Value::Null),
        },
        Node::Flatten(inner) => match evaluate(inner, value)? {
            Value::Array(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Array(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                Ok(Value::Array(flat))
            }
            _ => Ok(Value::Null),
        },
        Node::FilterProjection { lhs, condition, rhs } => match evaluate(lhs, value)? {
            Value::Array(items) => {
                let mut kept = Vec::new();
                for item in &items {
                    if is_truthy(&evaluate(condition, item)?) {
                        kept.push(item);
                    }
                }
                project(kept.into_iter(), rhs)
            }
            _ => Ok(Value::Null),
        },
        Node::Compare(comparator, lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            let right = evaluate(rhs, value)?;
            Ok(compare(*comparator, &left, &right))
        }
        Node::And(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            if is_truthy(&left) {
                evaluate(rhs, value)
            } else {
                Ok(left)
            }
        }
        Node::Or(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, value)
            }
        }
        Node::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, value)?))),
        Node::MultiList(items) => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let values = items
                .iter()
                .map(|item| evaluate(item, value))
                .collect::<ExtractResult<Vec<_>>>()?;
            Ok(Value::Array(values))
        }
        Node::MultiHash(pairs) => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut map = Map::new();
            for (key, item) in pairs {
                map.insert(key.clone(), evaluate(item, value)?);
            }
            Ok(Value::Object(map))
        }
        Node::Function(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, value))
                .collect::<ExtractResult<Vec<_>>>()?;
            functions::call(name, args)
        }
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

/// Applies `rhs` to each element, dropping `null` results.
fn project<'v>(items: impl Iterator<Item = &'v Value>, rhs: &Node) -> ExtractResult<Value> {
    let mut out = Vec::new();
    for item in items {
        let projected = evaluate(rhs, item)?;
        if !projected.is_null() {
            out.push(projected);
        }
    }
    Ok(Value::Array(out))
}

fn compare(comparator: Comparator, left: &Value, right: &Value) -> Value {
    match comparator {
        Comparator::Eq => Value::Bool(values_equal(left, right)),
        Comparator::Ne => Value::Bool(!values_equal(left, right)),
        _ => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Value::Null;
            };
            let ordering = l.partial_cmp(&r);
            let result = match comparator {
                Comparator::Lt => ordering == Some(Ordering::Less),
                Comparator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                Comparator::Gt => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            };
            Value::Bool(result)
        }
    }
}

/// Deep equality with numbers compared by value (`1 == 1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(k, v)| r.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn search(query: &str, data: &Value) -> Value {
        evaluate(&parse(query).unwrap(), data).unwrap()
    }

    #[test]
    fn test_field_and_index() {
        let data = json!({"vlans": [{"vlan_id": "10"}, {"vlan_id": "20"}]});
        assert_eq!(search("vlans[0].vlan_id", &data), json!("10"));
        assert_eq!(search("vlans[-1].vlan_id", &data), json!("20"));
        assert_eq!(search("vlans[5].vlan_id", &data), Value::Null);
        assert_eq!(search("missing.field", &data), Value::Null);
    }

    #[test]
    fn test_projection_drops_nulls() {
        let data = json!({"vlans": [{"vlan_id": "10"}, {"name": "x"}, {"vlan_id": "30"}]});
        assert_eq!(search("vlans[*].vlan_id", &data), json!(["10", "30"]));
    }

    #[test]
    fn test_object_projection() {
        let data = json!({"interfaces": {"Ethernet1": {"mtu": 9214}, "Ethernet2": {"mtu": 1500}}});
        assert_eq!(search("interfaces.*.mtu", &data), json!([9214, 1500]));
        assert_eq!(search("keys(interfaces)", &data), json!(["Ethernet1", "Ethernet2"]));
    }

    #[test]
    fn test_filter_projection() {
        let data = json!({"vlans": [
            {"vlan_id": "10", "vlan_name": "DATA"},
            {"vlan_id": "20", "vlan_name": "VOICE"}
        ]});
        assert_eq!(
            search("vlans[?vlan_id == '10'].vlan_name", &data),
            json!(["DATA"])
        );
        assert_eq!(
            search("vlans[?vlan_id != '10' && vlan_name].vlan_name | [0]", &data),
            json!("VOICE")
        );
    }

    #[test]
    fn test_numeric_comparison() {
        let data = json!({"ifs": [{"n": "a", "mtu": 1500}, {"n": "b", "mtu": 9214}]});
        assert_eq!(search("ifs[?mtu > `1500`].n", &data), json!(["b"]));
        assert_eq!(search("ifs[?n > `1`].n", &data), json!([]));
    }

    #[test]
    fn test_flatten() {
        let data = json!({"a": [[1, 2], [3], 4]});
        assert_eq!(search("a[]", &data), json!([1, 2, 3, 4]));
        let nested = json!({"r": [{"ips": ["a", "b"]}, {"ips": ["c"]}]});
        assert_eq!(search("r[*].ips[]", &nested), json!(["a", "b", "c"]));
    }

    #[test]
    fn test_multiselect() {
        let data = json!({"a": 1, "b": 2});
        assert_eq!(search("[a, b]", &data), json!([1, 2]));
        assert_eq!(search("{x: a, y: b}", &data), json!({"x": 1, "y": 2}));
        assert_eq!(search("missing.[a]", &data), Value::Null);
    }

    #[test]
    fn test_or_and_not() {
        let data = json!({"a": "", "b": "fallback", "c": []});
        assert_eq!(search("a || b", &data), json!("fallback"));
        assert_eq!(search("!c", &data), json!(true));
        assert_eq!(search("b && a", &data), json!(""));
    }

    #[test]
    fn test_literals_and_functions() {
        let data = json!({"serial": "SN123", "names": ["b", "a"]});
        assert_eq!(search("`\"x\"`", &data), json!("x"));
        assert_eq!(search("join(',', sort(names))", &data), json!("a,b"));
        assert_eq!(search("length(serial)", &data), json!(5));
    }
}
