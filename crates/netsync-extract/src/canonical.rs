//! Canonical per-host records and raw command output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::shape::is_empty_value;

static NULL: Value = Value::Null;

/// Output of one command as returned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOutput {
    /// Unstructured text (possibly JSON).
    Text(String),
    /// Already structured output.
    Structured(Value),
}

impl RawOutput {
    pub fn text(s: impl Into<String>) -> Self {
        RawOutput::Text(s.into())
    }
}

impl From<Value> for RawOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => RawOutput::Text(s),
            other => RawOutput::Structured(other),
        }
    }
}

/// Command outputs collected for one host, keyed by command.
pub type HostOutputs = BTreeMap<String, RawOutput>;

/// The normalised facts extracted for one host.
///
/// Composite fields (interfaces, VLANs, VRFs) are nested mappings keyed by
/// the member name, each holding that member's canonical sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub host: String,
    pub platform: String,
    pub job: String,
    pub fields: Map<String, Value>,
    /// Fields for which no candidate produced a value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub empty_fields: Vec<String>,
}

impl CanonicalRecord {
    pub fn new(host: &str, platform: &str, job: &str) -> Self {
        Self {
            host: host.to_string(),
            platform: platform.to_string(),
            job: job.to_string(),
            fields: Map::new(),
            empty_fields: Vec::new(),
        }
    }

    /// Returns a field, `null` if absent.
    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Returns a non-blank string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns true if the field is missing or empty.
    pub fn is_empty_field(&self, name: &str) -> bool {
        is_empty_value(self.field(name))
    }

    /// Iterates the members of a composite field.
    pub fn nested(&self, name: &str) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.fields
            .get(name)
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|members| members.iter())
            .filter_map(|(key, sub)| sub.as_object().map(|sub| (key.as_str(), sub)))
    }

    /// Removes a field, returning its value.
    pub fn take_field(&mut self, name: &str) -> Value {
        self.fields.remove(name).unwrap_or(Value::Null)
    }

    /// Names of required fields that are empty.
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|name| self.is_empty_field(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> CanonicalRecord {
        let mut record = CanonicalRecord::new("10.0.0.1", "arista_eos", "sync_network_data");
        record.fields.insert("serial".into(), json!(" SN1 "));
        record.fields.insert("hostname".into(), json!(""));
        record.fields.insert(
            "interfaces".into(),
            json!({"Ethernet1": {"mtu": 9214}, "Ethernet2": {"mtu": 1500}, "bogus": 1}),
        );
        record
    }

    #[test]
    fn test_field_accessors() {
        let record = sample();
        assert_eq!(record.str_field("serial"), Some("SN1"));
        assert_eq!(record.str_field("hostname"), None);
        assert_eq!(record.field("missing"), &Value::Null);
        assert_eq!(record.missing(&["serial", "hostname", "model"]), vec!["hostname", "model"]);
    }

    #[test]
    fn test_nested_members() {
        let record = sample();
        let names: Vec<&str> = record.nested("interfaces").map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Ethernet1", "Ethernet2"]);
        assert_eq!(record.nested("serial").count(), 0);
    }

    #[test]
    fn test_raw_output_from_value() {
        assert_eq!(RawOutput::from(json!("text")), RawOutput::text("text"));
        assert_eq!(RawOutput::from(json!({"a": 1})), RawOutput::Structured(json!({"a": 1})));
    }
}
