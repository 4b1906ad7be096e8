//! Path queries over structured command output.
//!
//! The query language is a JMESPath subset:
//!
//! - `a.b`, `"quoted key"`, `@`
//! - `a[0]`, `a[-1]`
//! - `a[*].b`, `a.*.b` (list and object projections)
//! - `a[]` (flatten)
//! - `a[?b == 'x'].d` (filter projections; `== != < <= > >= && || !`)
//! - `'raw string'`, `` `{"json": "literal"}` ``
//! - `[a, b]`, `{x: a, y: b}` (multi-select)
//! - `a | [0]` (pipe)
//! - `length keys values join contains starts_with ends_with to_string
//!   to_number not_null sort reverse`
//!
//! Projections drop `null` results, so `a[*].b` over elements without `b`
//! yields a shorter list rather than a list of nulls.

mod ast;
mod eval;
mod functions;
mod lexer;
mod parser;

pub use ast::{Comparator, Node};
pub use eval::is_truthy;
pub use functions::type_name;

use serde_json::Value;

use crate::error::ExtractResult;

/// A compiled path query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    source: String,
    root: Node,
}

impl Query {
    /// Compiles a query expression.
    pub fn compile(source: &str) -> ExtractResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    /// Returns the expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the root node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Evaluates the query against a value.
    pub fn search(&self, data: &Value) -> ExtractResult<Value> {
        eval::evaluate(&self.root, data)
    }
}

/// Compiles and evaluates a query in one step.
pub fn search(expression: &str, data: &Value) -> ExtractResult<Value> {
    Query::compile(expression)?.search(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_compile_once_search_many() {
        let query = Query::compile("serialNumber").unwrap();
        assert_eq!(query.source(), "serialNumber");
        assert_eq!(query.search(&json!({"serialNumber": "SN1"})).unwrap(), json!("SN1"));
        assert_eq!(query.search(&json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_search_vendor_output() {
        let show_version = json!({
            "modelName": "DCS-7050SX3-48YC8",
            "serialNumber": "JPE12345678",
            "version": "4.28.3M",
            "hostname": "leaf1"
        });
        assert_eq!(search("modelName", &show_version).unwrap(), json!("DCS-7050SX3-48YC8"));
        assert!(search("modelName[", &show_version).is_err());
    }
}
