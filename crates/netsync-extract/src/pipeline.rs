//! The extraction pipeline: raw command outputs to canonical records.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::canonical::{CanonicalRecord, HostOutputs, RawOutput};
use crate::error::ExtractResult;
use crate::mapping::{Candidate, FieldRule, FieldTable, MappingTable, OutputParser, QueryRule};
use crate::query::Query;
use crate::shape::is_empty_value;
use crate::template::display;

/// Turns text output into a queryable value.
///
/// Without an explicit parser, text that parses as a JSON object or array is
/// used structurally and anything else is queried as a plain string.
pub fn parse_output(raw: &RawOutput, parser: Option<OutputParser>) -> Value {
    match raw {
        RawOutput::Structured(value) => value.clone(),
        RawOutput::Text(text) => match parser {
            Some(OutputParser::Raw) => Value::String(text.clone()),
            Some(OutputParser::Json) => serde_json::from_str(text).unwrap_or_else(|e| {
                debug!(error = %e, "Command output is not valid JSON");
                Value::Null
            }),
            None => {
                let trimmed = text.trim_start();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    if let Ok(value) = serde_json::from_str(text) {
                        return value;
                    }
                }
                Value::String(text.clone())
            }
        },
    }
}

/// Output values of one host, parsed once.
struct ParsedOutputs<'o> {
    raw: &'o HostOutputs,
    parsed: BTreeMap<&'o str, Value>,
}

impl<'o> ParsedOutputs<'o> {
    fn new(raw: &'o HostOutputs) -> Self {
        let parsed = raw
            .iter()
            .map(|(command, output)| (command.as_str(), parse_output(output, None)))
            .collect();
        Self { raw, parsed }
    }

    fn get(&self, command: &str, parser: Option<OutputParser>) -> Option<Value> {
        match parser {
            None => self.parsed.get(command).cloned(),
            Some(_) => self.raw.get(command).map(|raw| parse_output(raw, parser)),
        }
    }
}

/// Applies platform mapping tables to collected command outputs.
pub struct Extractor<'m> {
    mappings: &'m MappingTable,
}

impl<'m> Extractor<'m> {
    pub fn new(mappings: &'m MappingTable) -> Self {
        Self { mappings }
    }

    /// Extracts the canonical record of one host.
    ///
    /// Only an unknown platform or job is an error; fields whose candidates
    /// all fail are left empty and listed in `empty_fields`.
    #[instrument(skip(self, outputs), fields(commands = outputs.len()))]
    pub fn extract(
        &self,
        host: &str,
        platform: &str,
        job: &str,
        outputs: &HostOutputs,
    ) -> ExtractResult<CanonicalRecord> {
        let table = self.mappings.platform(platform)?.job(job)?;
        let outputs = ParsedOutputs::new(outputs);
        let mut record = CanonicalRecord::new(host, platform, job);

        for (name, rule) in table.iter() {
            let mut vars = Map::new();
            vars.insert("host".into(), Value::String(host.to_string()));
            vars.insert("platform".into(), Value::String(platform.to_string()));
            vars.insert("facts".into(), Value::Object(record.fields.clone()));

            let value = match rule {
                FieldRule::Candidates(candidates) => select(name, candidates, &outputs, &vars),
                FieldRule::Composite { universe, fields } => {
                    let (value, empty_subfields) = composite(name, universe, fields, &outputs, &vars);
                    record
                        .empty_fields
                        .extend(empty_subfields.into_iter().map(|sub| format!("{}.{}", name, sub)));
                    value
                }
            };

            if is_empty_value(&value) {
                debug!(field = name, "No candidate produced a value");
                record.empty_fields.push(name.to_string());
            }
            record.fields.insert(name.to_string(), value);
        }

        Ok(record)
    }
}

/// Tries candidates in order and returns the first accepted value.
///
/// A candidate without a validator accepts any non-null value; one with a
/// validator only accepts values that pass it.
fn select(field: &str, candidates: &[Candidate], outputs: &ParsedOutputs<'_>, vars: &Map<String, Value>) -> Value {
    for candidate in candidates {
        let Some(data) = outputs.get(&candidate.command, candidate.parser) else {
            debug!(field, command = %candidate.command, "Command output not collected");
            continue;
        };

        match evaluate(candidate, &data, vars) {
            Ok(value) => match candidate.validator {
                Some(validator) if !validator.accepts(&value) => {
                    debug!(field, command = %candidate.command, "Candidate rejected by validator");
                }
                // without a validator only null falls through
                None if value.is_null() => {
                    debug!(field, command = %candidate.command, "Candidate yielded null");
                }
                _ => return value,
            },
            Err(e) if e.is_rule_error() => {
                warn!(field, command = %candidate.command, error = %e, "Extraction rule failed");
            }
            Err(e) => {
                debug!(field, command = %candidate.command, error = %e, "Candidate failed");
            }
        }
    }

    candidates
        .iter()
        .find_map(|c| c.result_shape)
        .map_or(Value::Null, |shape| shape.empty())
}

fn evaluate(candidate: &Candidate, data: &Value, vars: &Map<String, Value>) -> ExtractResult<Value> {
    let value = match &candidate.query {
        QueryRule::Static(query) => query.search(data)?,
        QueryRule::Templated(template) => Query::compile(&template.render_string(vars)?)?.search(data)?,
    };

    let value = match &candidate.post_processor {
        Some(template) => {
            let mut scope = vars.clone();
            scope.insert("obj".into(), value);
            template.render(&scope)?
        }
        None => value,
    };

    Ok(match candidate.result_shape {
        Some(shape) => shape.coerce(value),
        None => value,
    })
}

/// Extracts a composite field. Returns the mapping and the sub-fields that
/// were empty for every member.
fn composite(
    field: &str,
    universe: &[Candidate],
    fields: &FieldTable,
    outputs: &ParsedOutputs<'_>,
    vars: &Map<String, Value>,
) -> (Value, Vec<String>) {
    let keys = member_keys(select(field, universe, outputs, vars));
    let mut members = Map::new();
    let mut filled: BTreeMap<&str, bool> = fields.iter().map(|(name, _)| (name, false)).collect();

    for key in keys {
        let mut scope = vars.clone();
        scope.insert("current_key".into(), Value::String(key.clone()));

        let mut sub_record = Map::new();
        for (name, rule) in fields.iter() {
            let FieldRule::Candidates(candidates) = rule else {
                continue;
            };
            let value = select(name, candidates, outputs, &scope);
            if !is_empty_value(&value) {
                filled.insert(name, true);
            }
            sub_record.insert(name.to_string(), value);
        }
        members.insert(key, Value::Object(sub_record));
    }

    let empty = if members.is_empty() {
        Vec::new()
    } else {
        filled
            .into_iter()
            .filter(|(_, has_value)| !has_value)
            .map(|(name, _)| name.to_string())
            .collect()
    };
    (Value::Object(members), empty)
}

fn member_keys(value: Value) -> Vec<String> {
    let keys: Vec<String> = match value {
        Value::Array(items) => items.iter().map(display).collect(),
        Value::Object(map) => map.into_iter().map(|(k, _)| k).collect(),
        Value::Null => Vec::new(),
        other => vec![display(&other)],
    };
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys.into_iter().map(|k| k.trim().to_string()) {
        if !key.is_empty() && !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PlatformMapping;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MAPPING: &str = r#"
sync_devices:
  serial:
    - command: show version
      query: serialNumber
      validator: not_empty
    - command: show inventory
      query: systemInformation.serialNum
      validator: not_empty
  vlan_name:
    - command: show vlan
      query: "vlans[?vlan_id == '10'].vlan_name"
      result_shape: str
  hostname:
    - command: show hostname
      query: hostname
      post_processor: "{{ obj | upper }}"
  fqdn:
    - command: show hostname
      query: "'{{ facts.hostname | lower }}.example.net'"
  uptime:
    - command: show uptime
      query: "@"
      parser: raw
  interfaces:
    universe:
      - command: show interfaces
        query: keys(interfaces)
    fields:
      mtu:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".mtu'
      description:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".description'
          result_shape: str
"#;

    fn table() -> MappingTable {
        let mut table = MappingTable::new();
        table.insert(PlatformMapping::from_yaml("test_os", "test", MAPPING).unwrap());
        table
    }

    fn outputs() -> HostOutputs {
        let mut outputs = HostOutputs::new();
        outputs.insert("show version".into(), RawOutput::Structured(json!({"serialNumber": ""})));
        outputs.insert(
            "show inventory".into(),
            RawOutput::text(r#"{"systemInformation": {"serialNum": "SN123"}}"#),
        );
        outputs.insert(
            "show vlan".into(),
            RawOutput::text(r#"{"vlans":[{"vlan_id":"10","vlan_name":"DATA"}]}"#),
        );
        outputs.insert("show hostname".into(), RawOutput::Structured(json!({"hostname": "Leaf1"})));
        outputs.insert("show uptime".into(), RawOutput::text("{ not json"));
        outputs.insert(
            "show interfaces".into(),
            RawOutput::Structured(json!({"interfaces": {
                "Ethernet1": {"mtu": 9214},
                "Ethernet2": {"mtu": 1500}
            }})),
        );
        outputs
    }

    #[test]
    fn test_fallback_candidate() {
        let table = table();
        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &outputs())
            .unwrap();
        assert_eq!(record.field("serial"), &json!("SN123"));
    }

    #[test]
    fn test_null_falls_through_without_validator() {
        let mut table = MappingTable::new();
        let mapping = r#"
sync_devices:
  model:
    - command: show version
      query: modelName
    - command: show inventory
      query: systemInformation.model
  vendor:
    - command: show version
      query: vendor
    - command: show inventory
      query: systemInformation.vendor
"#;
        table.insert(PlatformMapping::from_yaml("test_os", "test", mapping).unwrap());
        let mut outputs = HostOutputs::new();
        outputs.insert("show version".into(), RawOutput::Structured(json!({"vendor": ""})));
        outputs.insert(
            "show inventory".into(),
            RawOutput::Structured(json!({"systemInformation": {"model": "DCS-7050SX3", "vendor": "Arista"}})),
        );

        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &outputs)
            .unwrap();
        assert_eq!(record.field("model"), &json!("DCS-7050SX3"));
        // a blank string is still a value
        assert_eq!(record.field("vendor"), &json!(""));
    }

    #[test]
    fn test_single_match_coerced_to_scalar() {
        let table = table();
        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &outputs())
            .unwrap();
        assert_eq!(record.field("vlan_name"), &json!("DATA"));
    }

    #[test]
    fn test_post_processor_and_facts() {
        let table = table();
        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &outputs())
            .unwrap();
        assert_eq!(record.field("hostname"), &json!("LEAF1"));
        assert_eq!(record.field("fqdn"), &json!("leaf1.example.net"));
        assert_eq!(record.field("uptime"), &json!("{ not json"));
    }

    #[test]
    fn test_composite_field() {
        let table = table();
        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &outputs())
            .unwrap();
        assert_eq!(
            record.field("interfaces"),
            &json!({
                "Ethernet1": {"mtu": 9214, "description": ""},
                "Ethernet2": {"mtu": 1500, "description": ""}
            })
        );
        assert_eq!(record.empty_fields, vec!["interfaces.description".to_string()]);
    }

    #[test]
    fn test_missing_outputs_leave_fields_empty() {
        let table = table();
        let record = Extractor::new(&table)
            .extract("10.0.0.1", "test_os", "sync_devices", &HostOutputs::new())
            .unwrap();
        assert_eq!(record.field("serial"), &Value::Null);
        assert_eq!(record.field("vlan_name"), &json!(""));
        assert_eq!(record.field("interfaces"), &json!({}));
        assert_eq!(
            record.empty_fields,
            vec!["serial", "vlan_name", "hostname", "fqdn", "uptime", "interfaces"]
        );
    }

    #[test]
    fn test_unknown_platform() {
        let table = table();
        assert!(Extractor::new(&table)
            .extract("h", "junos", "sync_devices", &HostOutputs::new())
            .is_err());
    }

    #[test]
    fn test_parse_output_modes() {
        let text = RawOutput::text("[1, 2]");
        assert_eq!(parse_output(&text, None), json!([1, 2]));
        assert_eq!(parse_output(&text, Some(OutputParser::Raw)), json!("[1, 2]"));
        assert_eq!(parse_output(&RawOutput::text("x"), Some(OutputParser::Json)), Value::Null);
        assert_eq!(parse_output(&RawOutput::text("plain"), None), json!("plain"));
    }
}
