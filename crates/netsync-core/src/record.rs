//! Typed, keyed records compared by the diff engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// Named attribute values of a record.
pub type Attributes = BTreeMap<String, Value>;

/// Separator used when rendering a key for logs and reports.
const KEY_SEPARATOR: &str = "__";

/// Static description of a record type: its name, identifier fields (in
/// key order) and compared attribute fields.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordSchema {
    /// Type name (e.g., "interface").
    pub kind: &'static str,
    /// Ordered identifier field names forming the record key.
    pub identifiers: &'static [&'static str],
    /// Attribute field names compared by the diff engine.
    pub attributes: &'static [&'static str],
}

impl RecordSchema {
    /// Creates a schema.
    pub const fn new(
        kind: &'static str,
        identifiers: &'static [&'static str],
        attributes: &'static [&'static str],
    ) -> Self {
        Self {
            kind,
            identifiers,
            attributes,
        }
    }

    /// Builds a record from a flat map holding both identifier and
    /// attribute fields.
    ///
    /// Identifier values must be present and scalar; attribute fields absent
    /// from `values` are stored as `null` so both sides of a comparison
    /// always carry the same attribute names.
    pub fn build(&'static self, values: &Attributes) -> SyncResult<Record> {
        let mut key = Vec::with_capacity(self.identifiers.len());
        for field in self.identifiers {
            let part = match values.get(*field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => {
                    return Err(SyncError::MissingIdentifier {
                        kind: self.kind.to_string(),
                        field: (*field).to_string(),
                    })
                }
            };
            key.push(part);
        }

        let attrs = self
            .attributes
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    values.get(*name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect();

        Ok(Record::new(self, RecordKey::new(key), attrs))
    }
}

/// Ordered tuple of identifier values, unique within a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(Vec<String>);

impl RecordKey {
    /// Creates a key from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Returns the key parts in identifier order.
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(KEY_SEPARATOR))
    }
}

/// Per-record behaviour flags, fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFlags {
    skip_unmatched_destination: bool,
}

impl RecordFlags {
    /// No flags set.
    pub const NONE: RecordFlags = RecordFlags {
        skip_unmatched_destination: false,
    };

    /// A record that exists only in the target store is never deleted.
    pub const SKIP_UNMATCHED_DESTINATION: RecordFlags = RecordFlags {
        skip_unmatched_destination: true,
    };

    /// Returns true if a target-only record must not be classified for deletion.
    pub const fn skips_unmatched_destination(&self) -> bool {
        self.skip_unmatched_destination
    }
}

/// A named collection of child records of another type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRelation {
    /// Type of the child records.
    pub kind: String,
    /// Keys of the child records.
    pub keys: BTreeSet<RecordKey>,
}

/// An immutable value snapshot of one typed record.
///
/// Records are assembled with the consuming `with_*` builders and then
/// moved into a [`crate::RecordStore`], which only hands out shared
/// references. Flags and attributes therefore never change once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static RecordSchema,
    key: RecordKey,
    attrs: Attributes,
    children: BTreeMap<String, ChildRelation>,
    flags: RecordFlags,
}

impl Record {
    /// Creates a record with no children and no flags.
    pub fn new(schema: &'static RecordSchema, key: RecordKey, attrs: Attributes) -> Self {
        Self {
            schema,
            key,
            attrs,
            children: BTreeMap::new(),
            flags: RecordFlags::NONE,
        }
    }

    /// Sets the record flags.
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds a child reference under the named relation.
    pub fn with_child(mut self, relation: &str, kind: &str, key: RecordKey) -> Self {
        self.children
            .entry(relation.to_string())
            .or_insert_with(|| ChildRelation {
                kind: kind.to_string(),
                keys: BTreeSet::new(),
            })
            .keys
            .insert(key);
        self
    }

    /// Returns the record's schema.
    pub fn schema(&self) -> &'static RecordSchema {
        self.schema
    }

    /// Returns the record type name.
    pub fn kind(&self) -> &'static str {
        self.schema.kind
    }

    /// Returns the record identifier.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Returns the identifier value for a named identifier field.
    pub fn id_value(&self, field: &str) -> Option<&str> {
        self.schema
            .identifiers
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.key.parts().get(i))
            .map(String::as_str)
    }

    /// Returns the identifier fields as a name -> value map.
    pub fn identifiers(&self) -> Attributes {
        self.schema
            .identifiers
            .iter()
            .zip(self.key.parts())
            .map(|(name, value)| ((*name).to_string(), Value::String(value.clone())))
            .collect()
    }

    /// Returns all attributes.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Returns one attribute value, treating `null` as absent.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name).filter(|v| !v.is_null())
    }

    /// Returns a string attribute, treating `null` and empty strings as absent.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns a boolean attribute, defaulting to false.
    pub fn attr_bool(&self, name: &str) -> bool {
        self.attr(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns a named child relation.
    pub fn children(&self, relation: &str) -> Option<&ChildRelation> {
        self.children.get(relation)
    }

    /// Returns the record flags.
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Returns the names of attributes whose values differ from `other`.
    ///
    /// Comparison is total equality per attribute; a name present on one
    /// side only compares against `null`.
    pub fn changed_attributes(&self, other: &Record) -> Vec<String> {
        let names: BTreeSet<&String> = self.attrs.keys().chain(other.attrs.keys()).collect();
        names
            .into_iter()
            .filter(|name| {
                let ours = self.attrs.get(*name).unwrap_or(&Value::Null);
                let theirs = other.attrs.get(*name).unwrap_or(&Value::Null);
                ours != theirs
            })
            .cloned()
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.schema.kind, self.key)
    }
}
