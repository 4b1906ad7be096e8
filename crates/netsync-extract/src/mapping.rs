//! Declarative per-platform field mapping tables.
//!
//! A mapping file describes one platform. Its top-level keys are sync job
//! names, each holding an ordered table of fields:
//!
//! ```yaml
//! sync_devices:
//!   serial:
//!     - command: show version
//!       query: serialNumber
//!       validator: not_empty
//!     - command: show inventory
//!       query: "systemInformation.serialNum"
//!   interfaces:
//!     universe:
//!       - command: show interfaces
//!         query: keys(interfaces)
//!     fields:
//!       mtu:
//!         - command: show interfaces
//!           query: 'interfaces."{{ current_key }}".mtu'
//! ```
//!
//! Field order is preserved: later fields may read earlier results through
//! `facts` in their templates. Tables are layered by platform key: a later
//! source replaces the whole platform.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::error::{ExtractError, ExtractResult};
use crate::query::Query;
use crate::shape::{is_empty_value, ResultShape};
use crate::template::Template;

const BUILTIN_MAPPINGS: &[(&str, &str)] = &[
    ("arista_eos", include_str!("../mappings/arista_eos.yml")),
    ("cisco_nxos", include_str!("../mappings/cisco_nxos.yml")),
];

/// How a candidate accepts its extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// Rejects `null`, blank strings and empty collections.
    NotEmpty,
    /// Rejects only `null`.
    NotNone,
}

impl Validator {
    /// Returns true if the validator accepts `value`.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Validator::NotEmpty => !is_empty_value(value),
            Validator::NotNone => !value.is_null(),
        }
    }
}

/// How a text command output is turned into a queryable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputParser {
    Json,
    Raw,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CandidateSpec {
    command: String,
    query: String,
    #[serde(default)]
    post_processor: Option<String>,
    #[serde(default)]
    validator: Option<Validator>,
    #[serde(default)]
    result_shape: Option<ResultShape>,
    #[serde(default)]
    parser: Option<OutputParser>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleSpec {
    Candidates(Vec<CandidateSpec>),
    Composite {
        universe: Vec<CandidateSpec>,
        fields: serde_yaml::Mapping,
    },
}

/// A query expression that is either fixed or rendered per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRule {
    Static(Query),
    Templated(Template),
}

/// One way of obtaining a field: a command, a query over its output and
/// optional post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub command: String,
    pub query: QueryRule,
    pub post_processor: Option<Template>,
    pub validator: Option<Validator>,
    pub result_shape: Option<ResultShape>,
    pub parser: Option<OutputParser>,
}

impl Candidate {
    fn compile(raw: CandidateSpec) -> ExtractResult<Self> {
        let template = Template::compile(&raw.query)?;
        let query = if template.is_literal() {
            QueryRule::Static(Query::compile(&raw.query)?)
        } else {
            QueryRule::Templated(template)
        };
        let post_processor = raw
            .post_processor
            .as_deref()
            .map(Template::compile)
            .transpose()?;
        Ok(Self {
            command: raw.command,
            query,
            post_processor,
            validator: raw.validator,
            result_shape: raw.result_shape,
            parser: raw.parser,
        })
    }
}

/// How a field is extracted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Candidates tried in order.
    Candidates(Vec<Candidate>),
    /// A mapping keyed by the values of `universe`, each key holding the
    /// sub-fields evaluated with `current_key` bound.
    Composite {
        universe: Vec<Candidate>,
        fields: FieldTable,
    },
}

impl FieldRule {
    fn compile(raw: RuleSpec, source_name: &str) -> ExtractResult<Self> {
        match raw {
            RuleSpec::Candidates(candidates) => Ok(FieldRule::Candidates(compile_all(candidates)?)),
            RuleSpec::Composite { universe, fields } => {
                let fields = FieldTable::from_mapping(fields, source_name)?;
                if fields.iter().any(|(_, rule)| matches!(rule, FieldRule::Composite { .. })) {
                    return Err(ExtractError::mapping_load(
                        source_name,
                        "composite fields cannot be nested",
                    ));
                }
                Ok(FieldRule::Composite {
                    universe: compile_all(universe)?,
                    fields,
                })
            }
        }
    }

    fn commands(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            FieldRule::Candidates(candidates) => Box::new(candidates.iter().map(|c| c.command.as_str())),
            FieldRule::Composite { universe, fields } => Box::new(
                universe
                    .iter()
                    .map(|c| c.command.as_str())
                    .chain(fields.iter().flat_map(|(_, rule)| rule.commands())),
            ),
        }
    }
}

fn compile_all(specs: Vec<CandidateSpec>) -> ExtractResult<Vec<Candidate>> {
    specs.into_iter().map(Candidate::compile).collect()
}

/// Ordered field rules of one sync job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldTable {
    fields: Vec<(String, FieldRule)>,
}

impl FieldTable {
    fn from_mapping(mapping: serde_yaml::Mapping, source_name: &str) -> ExtractResult<Self> {
        let mut fields = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let Some(name) = key.as_str().map(str::to_string) else {
                return Err(ExtractError::mapping_load(source_name, "field names must be strings"));
            };
            let raw: RuleSpec = serde_yaml::from_value(value).map_err(|e| {
                ExtractError::mapping_load(source_name, format!("field '{}': {}", name, e))
            })?;
            let rule = FieldRule::compile(raw, source_name).map_err(|e| match e {
                e @ ExtractError::MappingLoad { .. } => e,
                other => ExtractError::mapping_load(source_name, format!("field '{}': {}", name, other)),
            })?;
            fields.push((name, rule));
        }
        Ok(Self { fields })
    }

    /// Iterates fields in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Returns the rule for a field.
    pub fn get(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Commands referenced by the table, in declared order, de-duplicated.
    pub fn commands(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for command in self.fields.iter().flat_map(|(_, rule)| rule.commands()) {
            if !out.iter().any(|c| c == command) {
                out.push(command.to_string());
            }
        }
        out
    }
}

/// The job tables of one platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMapping {
    platform: String,
    source_name: String,
    jobs: BTreeMap<String, FieldTable>,
}

impl PlatformMapping {
    /// Parses and compiles a platform mapping from YAML text.
    pub fn from_yaml(platform: &str, source_name: &str, text: &str) -> ExtractResult<Self> {
        let document: serde_yaml::Mapping =
            serde_yaml::from_str(text).map_err(|e| ExtractError::mapping_load(source_name, e))?;

        let mut jobs = BTreeMap::new();
        for (key, value) in document {
            let Some(job) = key.as_str().map(str::to_string) else {
                return Err(ExtractError::mapping_load(source_name, "job names must be strings"));
            };
            let serde_yaml::Value::Mapping(fields) = value else {
                return Err(ExtractError::mapping_load(
                    source_name,
                    format!("job '{}' must map field names to rules", job),
                ));
            };
            jobs.insert(job, FieldTable::from_mapping(fields, source_name)?);
        }

        debug!(platform, source = source_name, jobs = jobs.len(), "Loaded platform mapping");
        Ok(Self {
            platform: platform.to_string(),
            source_name: source_name.to_string(),
            jobs,
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Where the mapping was loaded from (`builtin` or a file path).
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Returns the field table of a job.
    pub fn job(&self, job: &str) -> ExtractResult<&FieldTable> {
        self.jobs.get(job).ok_or_else(|| ExtractError::UnknownJob {
            platform: self.platform.clone(),
            job: job.to_string(),
        })
    }

    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }
}

/// Mapping tables for every known platform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingTable {
    platforms: BTreeMap<String, PlatformMapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled-in tables.
    pub fn builtin() -> ExtractResult<Self> {
        let mut table = Self::new();
        for (platform, text) in BUILTIN_MAPPINGS {
            table.insert(PlatformMapping::from_yaml(platform, "builtin", text)?);
        }
        Ok(table)
    }

    /// Loads every `<platform>.yml` / `<platform>.yaml` file in a directory.
    #[instrument]
    pub fn load_dir(dir: &Path) -> ExtractResult<Self> {
        let source = dir.display().to_string();
        let entries = fs::read_dir(dir).map_err(|e| ExtractError::mapping_load(&source, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ExtractError::mapping_load(&source, e))?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yml" || e == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut table = Self::new();
        for path in paths {
            let name = path.display().to_string();
            let Some(platform) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(|e| ExtractError::mapping_load(&name, e))?;
            table.insert(PlatformMapping::from_yaml(platform, &name, &text)?);
        }
        Ok(table)
    }

    /// Built-in tables overridden by an optional directory.
    pub fn layered(override_dir: Option<&Path>) -> ExtractResult<Self> {
        let mut table = Self::builtin()?;
        if let Some(dir) = override_dir {
            table.merge(Self::load_dir(dir)?);
        }
        Ok(table)
    }

    /// Adds or replaces a platform.
    pub fn insert(&mut self, mapping: PlatformMapping) -> Option<PlatformMapping> {
        self.platforms.insert(mapping.platform.clone(), mapping)
    }

    /// Layers `other` over this table; platforms in `other` win wholesale.
    pub fn merge(&mut self, other: MappingTable) {
        for (platform, mapping) in other.platforms {
            if self.platforms.contains_key(&platform) {
                info!(platform = %platform, source = %mapping.source_name, "Overriding platform mapping");
            }
            self.platforms.insert(platform, mapping);
        }
    }

    /// Returns the mapping of a platform.
    pub fn platform(&self, platform: &str) -> ExtractResult<&PlatformMapping> {
        self.platforms
            .get(platform)
            .ok_or_else(|| ExtractError::UnknownPlatform(platform.to_string()))
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    /// The commands a host of `platform` must run for `job`.
    pub fn commands_for(&self, platform: &str, job: &str) -> ExtractResult<Vec<String>> {
        Ok(self.platform(platform)?.job(job)?.commands())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
sync_devices:
  serial:
    - command: show version
      query: serialNumber
      validator: not_empty
    - command: show inventory
      query: systemInformation.serialNum
  hostname:
    - command: show hostname
      query: hostname
  interfaces:
    universe:
      - command: show interfaces
        query: keys(interfaces)
    fields:
      mtu:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".mtu'
          result_shape: str
"#;

    #[test]
    fn test_parse_preserves_field_order() {
        let mapping = PlatformMapping::from_yaml("eos", "test", SAMPLE).unwrap();
        let table = mapping.job("sync_devices").unwrap();
        let names: Vec<&str> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["serial", "hostname", "interfaces"]);

        let Some(FieldRule::Candidates(serial)) = table.get("serial") else {
            panic!("expected candidate list");
        };
        assert_eq!(serial.len(), 2);
        assert_eq!(serial[0].validator, Some(Validator::NotEmpty));
        assert!(matches!(serial[0].query, QueryRule::Static(_)));

        let Some(FieldRule::Composite { fields, .. }) = table.get("interfaces") else {
            panic!("expected composite");
        };
        let Some(FieldRule::Candidates(mtu)) = fields.get("mtu") else {
            panic!("expected candidate list");
        };
        assert!(matches!(mtu[0].query, QueryRule::Templated(_)));
        assert_eq!(mtu[0].result_shape, Some(ResultShape::Str));
    }

    #[test]
    fn test_commands_declared_order_deduplicated() {
        let mapping = PlatformMapping::from_yaml("eos", "test", SAMPLE).unwrap();
        assert_eq!(
            mapping.job("sync_devices").unwrap().commands(),
            vec!["show version", "show inventory", "show hostname", "show interfaces"]
        );
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let bad_query = "job:\n  f:\n    - command: c\n      query: 'a[?'\n";
        assert!(matches!(
            PlatformMapping::from_yaml("p", "bad", bad_query),
            Err(ExtractError::MappingLoad { .. })
        ));
        let bad_key = "job:\n  f:\n    - command: c\n      querry: a\n";
        assert!(PlatformMapping::from_yaml("p", "bad", bad_key).is_err());
        let bad_filter = "job:\n  f:\n    - command: c\n      query: a\n      post_processor: '{{ obj | nope }}'\n";
        assert!(PlatformMapping::from_yaml("p", "bad", bad_filter).is_err());
    }

    #[test]
    fn test_unknown_platform_and_job() {
        let table = MappingTable::builtin().unwrap();
        assert!(matches!(table.platform("junos"), Err(ExtractError::UnknownPlatform(_))));
        assert!(matches!(
            table.commands_for("arista_eos", "sync_everything"),
            Err(ExtractError::UnknownJob { .. })
        ));
    }

    #[test]
    fn test_builtin_tables_compile() {
        let table = MappingTable::builtin().unwrap();
        let platforms: Vec<&str> = table.platforms().collect();
        assert_eq!(platforms, vec!["arista_eos", "cisco_nxos"]);
        for platform in platforms {
            let mapping = table.platform(platform).unwrap();
            assert!(!mapping.job("sync_devices").unwrap().is_empty());
            assert!(!mapping.job("sync_network_data").unwrap().is_empty());
        }
    }

    #[test]
    fn test_override_dir_replaces_platform() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("arista_eos.yml")).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let table = MappingTable::layered(Some(dir.path())).unwrap();
        let eos = table.platform("arista_eos").unwrap();
        assert!(eos.source_name().ends_with("arista_eos.yml"));
        assert!(eos.job("sync_network_data").is_err());
        assert_eq!(table.platform("cisco_nxos").unwrap().source_name(), "builtin");
    }
}
