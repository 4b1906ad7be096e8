//! Post-processor templates.
//!
//! A small Jinja-style language used to reshape extracted values:
//!
//! - `{{ expr }}` output blocks and `{# comments #}`
//! - `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`
//! - `{% for x in xs %}` (with `loop.index`, `loop.first`, `loop.last`, and
//!   `{% for k, v in mapping %}`) and `{% set x = expr %}`
//! - `a.b`, `a[0]`, `a['b']`, `== != < <= > >=`, `and or not`, `in`,
//!   `not in`, `~`, `+ -`, `x if c else y`, `x is [not] none`
//! - filters: `x | name` or `x | name(arg, key=value)`
//!
//! A template consisting of a single `{{ expr }}` evaluates to the value of
//! `expr` with its structure preserved. Anything else renders to a string.

mod eval;
mod filters;
mod lexer;
mod parser;

pub use eval::{display, is_truthy};
pub use filters::is_known as is_known_filter;
pub use parser::{BinaryOp, Expr, Stmt};

use serde_json::{Map, Value};

use crate::error::ExtractResult;

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    body: Vec<Stmt>,
}

impl Template {
    /// Compiles template source. Unknown filters are rejected here rather
    /// than at render time.
    pub fn compile(source: &str) -> ExtractResult<Self> {
        Ok(Self {
            source: source.to_string(),
            body: parser::parse_template(source)?,
        })
    }

    /// Returns the template source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns true if the template contains no blocks.
    pub fn is_literal(&self) -> bool {
        self.body.iter().all(|s| matches!(s, Stmt::Text(_)))
    }

    fn single_expression(&self) -> Option<&Expr> {
        let mut outputs = self.body.iter().filter(|s| match s {
            Stmt::Text(text) => !text.trim().is_empty(),
            _ => true,
        });
        match (outputs.next(), outputs.next()) {
            (Some(Stmt::Output(expr)), None) => Some(expr),
            _ => None,
        }
    }

    /// Renders the template with `vars` bound as globals.
    pub fn render(&self, vars: &Map<String, Value>) -> ExtractResult<Value> {
        let mut scope = eval::Scope::new(vars);
        if let Some(expr) = self.single_expression() {
            return eval::evaluate(expr, &scope);
        }
        let mut out = String::new();
        eval::render(&self.body, &mut scope, &mut out)?;
        Ok(Value::String(out))
    }

    /// Renders the template and always returns text.
    pub fn render_string(&self, vars: &Map<String, Value>) -> ExtractResult<String> {
        let mut scope = eval::Scope::new(vars);
        let mut out = String::new();
        eval::render(&self.body, &mut scope, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_single_expression_keeps_structure() {
        let template = Template::compile("  {{ obj | map(attribute='vlan_id') | unique }} ").unwrap();
        let result = template
            .render(&vars(json!({"obj": [{"vlan_id": 10}, {"vlan_id": 10}, {"vlan_id": 20}]})))
            .unwrap();
        assert_eq!(result, json!([10, 20]));
    }

    #[test]
    fn test_mixed_template_renders_text() {
        let template = Template::compile("{{ obj.address }}/{{ obj.mask | mask_length }}").unwrap();
        let result = template
            .render(&vars(json!({"obj": {"address": "10.0.0.1", "mask": "255.255.255.0"}})))
            .unwrap();
        assert_eq!(result, json!("10.0.0.1/24"));
    }

    #[test]
    fn test_query_template_with_current_key() {
        let template = Template::compile("interfaces.\"{{ current_key }}\".description").unwrap();
        assert!(!template.is_literal());
        let rendered = template
            .render_string(&vars(json!({"current_key": "Ethernet1"})))
            .unwrap();
        assert_eq!(rendered, "interfaces.\"Ethernet1\".description");
    }

    #[test]
    fn test_conditional_template() {
        let template = Template::compile(
            "{% if obj.mode == 'routed' %}{{ none }}{% else %}{{ obj.mode | interface_mode(obj.trunk) }}{% endif %}",
        )
        .unwrap();
        let access = template
            .render_string(&vars(json!({"obj": {"mode": "access", "trunk": ""}})))
            .unwrap();
        assert_eq!(access, "access");
        let routed = template
            .render_string(&vars(json!({"obj": {"mode": "routed"}})))
            .unwrap();
        assert_eq!(routed, "");
    }

    #[test]
    fn test_undefined_renders_empty() {
        let template = Template::compile("{{ nothing.here }}").unwrap();
        assert_eq!(template.render(&Map::new()).unwrap(), Value::Null);
        assert_eq!(template.render_string(&Map::new()).unwrap(), "");
    }

    #[test]
    fn test_unknown_filter_rejected_at_compile() {
        assert_eq!(
            Template::compile("{{ obj | frobnicate }}"),
            Err(ExtractError::UnknownFilter("frobnicate".into()))
        );
    }
}
