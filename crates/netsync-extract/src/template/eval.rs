//! Template evaluation.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::filters::{self, FilterArgs};
use super::parser::{BinaryOp, Expr, Stmt};
use crate::error::{ExtractError, ExtractResult};

/// Python-style truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are
/// false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a value as template output text.
///
/// `null` renders as the empty string, booleans as `True`/`False`, lists and
/// mappings as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Variable scopes; the innermost scope is searched first.
pub struct Scope<'a> {
    globals: &'a Map<String, Value>,
    locals: Vec<Map<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(globals: &'a Map<String, Value>) -> Self {
        Self {
            globals,
            locals: vec![Map::new()],
        }
    }

    fn lookup(&self, name: &str) -> Value {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn set(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn push(&mut self) {
        self.locals.push(Map::new());
    }

    fn pop(&mut self) {
        if self.locals.len() > 1 {
            self.locals.pop();
        }
    }
}

/// Renders statements into `out`.
pub fn render(body: &[Stmt], scope: &mut Scope<'_>, out: &mut String) -> ExtractResult<()> {
    for stmt in body {
        match stmt {
            Stmt::Text(text) => out.push_str(text),
            Stmt::Output(expr) => out.push_str(&display(&evaluate(expr, scope)?)),
            Stmt::If { branches, otherwise } => {
                let mut taken = false;
                for (condition, branch) in branches {
                    if is_truthy(&evaluate(condition, scope)?) {
                        render(branch, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render(otherwise, scope, out)?;
                }
            }
            Stmt::For {
                targets,
                iterable,
                body,
                otherwise,
            } => {
                let items = iteration_items(evaluate(iterable, scope)?, targets.len());
                if items.is_empty() {
                    render(otherwise, scope, out)?;
                    continue;
                }
                let length = items.len();
                for (index, item) in items.into_iter().enumerate() {
                    scope.push();
                    bind_targets(scope, targets, item)?;
                    scope.set("loop", loop_value(index, length));
                    let result = render(body, scope, out);
                    scope.pop();
                    result?;
                }
            }
            Stmt::Set { name, value } => {
                let value = evaluate(value, scope)?;
                scope.set(name, value);
            }
        }
    }
    Ok(())
}

fn iteration_items(value: Value, targets: usize) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) if targets == 2 => map
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
            .collect(),
        Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
        Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
        _ => Vec::new(),
    }
}

fn bind_targets(scope: &mut Scope<'_>, targets: &[String], item: Value) -> ExtractResult<()> {
    if let [single] = targets {
        scope.set(single, item);
        return Ok(());
    }
    let Value::Array(parts) = item else {
        return Err(ExtractError::render(format!(
            "cannot unpack non-sequence into {} names",
            targets.len()
        )));
    };
    if parts.len() != targets.len() {
        return Err(ExtractError::render(format!(
            "expected {} values to unpack, got {}",
            targets.len(),
            parts.len()
        )));
    }
    for (name, part) in targets.iter().zip(parts) {
        scope.set(name, part);
    }
    Ok(())
}

fn loop_value(index: usize, length: usize) -> Value {
    let mut map = Map::new();
    map.insert("index".into(), Value::from(index + 1));
    map.insert("index0".into(), Value::from(index));
    map.insert("first".into(), Value::Bool(index == 0));
    map.insert("last".into(), Value::Bool(index + 1 == length));
    map.insert("length".into(), Value::from(length));
    Value::Object(map)
}

/// Evaluates an expression. Undefined names and missing attributes are
/// `null`.
pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> ExtractResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => Ok(scope.lookup(name)),
        Expr::Attr(target, name) => Ok(match evaluate(target, scope)? {
            Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Expr::Item(target, index) => {
            let target = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            Ok(item(&target, &index))
        }
        Expr::List(items) => items
            .iter()
            .map(|e| evaluate(e, scope))
            .collect::<ExtractResult<Vec<_>>>()
            .map(Value::Array),
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope)?))),
        Expr::Neg(inner) => match evaluate(inner, scope)? {
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => Value::from(-i),
                None => float(-n.as_f64().unwrap_or(0.0)),
            }),
            other => Err(ExtractError::render(format!("cannot negate {}", display(&other)))),
        },
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            if is_truthy(&left) {
                evaluate(rhs, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, scope)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, scope)?;
            let right = evaluate(rhs, scope)?;
            binary(*op, left, right)
        }
        Expr::Filter {
            input,
            name,
            args,
            kwargs,
        } => {
            let input = evaluate(input, scope)?;
            let args = FilterArgs {
                positional: args
                    .iter()
                    .map(|a| evaluate(a, scope))
                    .collect::<ExtractResult<Vec<_>>>()?,
                keyword: kwargs
                    .iter()
                    .map(|(k, v)| -> ExtractResult<(String, Value)> { Ok((k.clone(), evaluate(v, scope)?)) })
                    .collect::<ExtractResult<Vec<_>>>()?,
            };
            filters::apply(name, input, &args)
        }
        Expr::Test {
            input,
            name,
            negated,
        } => {
            let value = evaluate(input, scope)?;
            let result = match name.as_str() {
                "defined" => !value.is_null(),
                "undefined" | "none" => value.is_null(),
                "string" => value.is_string(),
                "number" => value.is_number(),
                "mapping" => value.is_object(),
                "sequence" => value.is_array() || value.is_string(),
                other => return Err(ExtractError::render(format!("unknown test '{}'", other))),
            };
            Ok(Value::Bool(result != *negated))
        }
        Expr::Cond {
            then,
            test,
            otherwise,
        } => {
            if is_truthy(&evaluate(test, scope)?) {
                evaluate(then, scope)
            } else {
                match otherwise {
                    Some(e) => evaluate(e, scope),
                    None => Ok(Value::Null),
                }
            }
        }
    }
}

fn item(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Object(map), key) => map.get(&display(key)).cloned().unwrap_or(Value::Null),
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| resolve_index(items.len(), i))
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => {
            let chars: Vec<char> = s.chars().collect();
            n.as_i64()
                .and_then(|i| resolve_index(chars.len(), i))
                .and_then(|i| chars.get(i))
                .map_or(Value::Null, |c| Value::String(c.to_string()))
        }
        _ => Value::Null,
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn arithmetic(op: BinaryOp, l: &Number, r: &Number) -> Value {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            _ => a.checked_sub(b),
        };
        if let Some(v) = result {
            return Value::from(v);
        }
    }
    let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
    float(if op == BinaryOp::Add { a + b } else { a - b })
}

fn binary(op: BinaryOp, left: Value, right: Value) -> ExtractResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub => match (left, right) {
            (Value::Number(l), Value::Number(r)) => Ok(arithmetic(op, &l, &r)),
            (Value::String(l), Value::String(r)) if op == BinaryOp::Add => Ok(Value::String(l + &r)),
            (Value::Array(mut l), Value::Array(r)) if op == BinaryOp::Add => {
                l.extend(r);
                Ok(Value::Array(l))
            }
            (l, r) => Err(ExtractError::render(format!(
                "unsupported operands '{}' and '{}'",
                display(&l),
                display(&r)
            ))),
        },
        BinaryOp::Concat => Ok(Value::String(display(&left) + &display(&right))),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => l
                    .as_f64()
                    .zip(r.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ExtractError::render(format!(
                    "cannot compare '{}' and '{}'",
                    display(&left),
                    display(&right)
                )));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In | BinaryOp::NotIn => {
            let found = match &right {
                Value::Array(items) => items.iter().any(|v| values_equal(v, &left)),
                Value::String(s) => s.contains(display(&left).as_str()),
                Value::Object(map) => map.contains_key(&display(&left)),
                _ => false,
            };
            Ok(Value::Bool(found == (op == BinaryOp::In)))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(if op == BinaryOp::And {
            is_truthy(&left) && is_truthy(&right)
        } else {
            is_truthy(&left) || is_truthy(&right)
        })),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}
