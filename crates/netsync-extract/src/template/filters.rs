//! Template filters, generic and network-specific.

use netsync_types::{
    canonical_interface_name, link_status, mask_to_prefix_len, InterfaceMode, InterfaceType,
    IpInterface, MacAddress, VlanList,
};
use serde_json::Value;
use tracing::trace;

use super::eval::{display, is_truthy};
use crate::error::{ExtractError, ExtractResult};

const FILTERS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "length",
    "count",
    "first",
    "last",
    "default",
    "d",
    "join",
    "replace",
    "int",
    "string",
    "bool",
    "unique",
    "split",
    "map",
    "mac_address",
    "interface_type",
    "interface_mode",
    "link_status",
    "mask_length",
    "ip_interface",
    "canonical_interface",
    "vlan_list",
];

/// Returns true if `name` is a built-in filter.
pub fn is_known(name: &str) -> bool {
    FILTERS.contains(&name)
}

/// Filter arguments after evaluation.
#[derive(Debug, Default)]
pub struct FilterArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl FilterArgs {
    fn arg(&self, index: usize, keyword: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(index))
    }

    fn str_arg(&self, index: usize, keyword: &str, default: &str) -> String {
        self.arg(index, keyword)
            .map_or_else(|| default.to_string(), display)
    }
}

/// Applies filter `name` to `input`.
pub fn apply(name: &str, input: Value, args: &FilterArgs) -> ExtractResult<Value> {
    trace!(filter = name, "applying template filter");
    match name {
        "upper" => Ok(Value::String(display(&input).to_uppercase())),
        "lower" => Ok(Value::String(display(&input).to_lowercase())),
        "trim" => Ok(Value::String(display(&input).trim().to_string())),
        "length" | "count" => Ok(Value::from(match &input {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            Value::Null => 0,
            other => display(other).chars().count(),
        })),
        "first" => Ok(match input {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            Value::String(s) => s.chars().next().map_or(Value::Null, |c| Value::String(c.to_string())),
            _ => Value::Null,
        }),
        "last" => Ok(match input {
            Value::Array(items) => items.into_iter().last().unwrap_or(Value::Null),
            Value::String(s) => s.chars().last().map_or(Value::Null, |c| Value::String(c.to_string())),
            _ => Value::Null,
        }),
        "default" | "d" => {
            let fallback = args.arg(0, "default_value").cloned().unwrap_or(Value::String(String::new()));
            let boolean = args.arg(1, "boolean").is_some_and(is_truthy);
            let use_fallback = if boolean { !is_truthy(&input) } else { input.is_null() };
            Ok(if use_fallback { fallback } else { input })
        }
        "join" => {
            let glue = args.str_arg(0, "d", "");
            Ok(Value::String(match &input {
                Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(&glue),
                other => display(other),
            }))
        }
        "replace" => {
            let from = args.str_arg(0, "old", "");
            let to = args.str_arg(1, "new", "");
            let text = display(&input);
            Ok(Value::String(if from.is_empty() { text } else { text.replace(&from, &to) }))
        }
        "int" => {
            let fallback = args.arg(0, "default").cloned().unwrap_or(Value::from(0));
            Ok(to_int(&input).map_or(fallback, Value::from))
        }
        "string" => Ok(Value::String(display(&input))),
        "bool" => Ok(Value::Bool(match &input {
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1" | "y"
            ),
            other => is_truthy(other),
        })),
        "unique" => Ok(match input {
            Value::Array(items) => {
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !out.contains(&item) {
                        out.push(item);
                    }
                }
                Value::Array(out)
            }
            other => other,
        }),
        "split" => {
            let text = display(&input);
            let parts: Vec<Value> = match args.arg(0, "sep") {
                Some(sep) if !display(sep).is_empty() => text
                    .split(display(sep).as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
                _ => text.split_whitespace().map(|p| Value::String(p.to_string())).collect(),
            };
            Ok(Value::Array(parts))
        }
        "map" => map_filter(input, args),
        "mac_address" => Ok(match non_empty(&input) {
            Some(text) => text
                .parse::<MacAddress>()
                .map_or(Value::Null, |mac| Value::String(mac.to_string())),
            None => Value::Null,
        }),
        "interface_type" => {
            let hardware = args.str_arg(0, "hardware", "");
            Ok(Value::String(
                InterfaceType::classify(&display(&input), &hardware).as_str().to_string(),
            ))
        }
        "interface_mode" => {
            let trunk = args.str_arg(0, "trunk_vlans", "");
            Ok(InterfaceMode::from_switchport(&display(&input), &trunk)
                .map_or(Value::Null, |mode| Value::String(mode.as_str().to_string())))
        }
        "link_status" => Ok(Value::Bool(match &input {
            Value::Bool(b) => *b,
            other => link_status(&display(other)),
        })),
        "mask_length" => Ok(match non_empty(&input) {
            Some(text) => mask_to_prefix_len(&text).map_or(Value::Null, Value::from),
            None => Value::Null,
        }),
        "ip_interface" => {
            let Some(address) = non_empty(&input) else {
                return Ok(Value::Null);
            };
            let spelled = match args.arg(0, "mask").map(display).filter(|m| !m.is_empty()) {
                Some(mask) => format!("{}/{}", address, mask),
                None => address,
            };
            Ok(spelled
                .parse::<IpInterface>()
                .map_or(Value::Null, |ip| Value::String(ip.to_string())))
        }
        "canonical_interface" => Ok(match &input {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Value::String(canonical_interface_name(&display(v))))
                    .collect(),
            ),
            Value::Null => Value::Null,
            other => Value::String(canonical_interface_name(&display(other))),
        }),
        "vlan_list" => {
            let text = match &input {
                Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
                other => display(other),
            };
            Ok(match text.parse::<VlanList>() {
                Ok(list) if list.is_all() => Value::String("all".to_string()),
                Ok(list) => Value::Array(list.iter().map(|v| Value::from(v.as_u16())).collect()),
                Err(_) => Value::Array(Vec::new()),
            })
        }
        other => Err(ExtractError::UnknownFilter(other.to_string())),
    }
}

fn map_filter(input: Value, args: &FilterArgs) -> ExtractResult<Value> {
    let Value::Array(items) = input else {
        return Ok(Value::Array(Vec::new()));
    };

    if let Some(attribute) = args.arg(usize::MAX, "attribute") {
        let attribute = display(attribute);
        return Ok(Value::Array(
            items
                .iter()
                .map(|item| item.get(&attribute).cloned().unwrap_or(Value::Null))
                .collect(),
        ));
    }

    let Some(name) = args.positional.first().map(display) else {
        return Err(ExtractError::render("map() needs a filter name or attribute="));
    };
    if name == "map" || !is_known(&name) {
        return Err(ExtractError::UnknownFilter(name));
    }
    let rest = FilterArgs {
        positional: args.positional[1..].to_vec(),
        keyword: Vec::new(),
    };
    items
        .into_iter()
        .map(|item| apply(&name, item, &rest))
        .collect::<ExtractResult<Vec<_>>>()
        .map(Value::Array)
}

fn non_empty(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(display(other).trim().to_string()).filter(|s| !s.is_empty()),
    }
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}
