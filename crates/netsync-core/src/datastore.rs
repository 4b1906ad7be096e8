//! Persistence collaborator interface.
//!
//! The engine never depends on a storage technology. A datastore exposes
//! typed get/query/create/update/delete over loosely typed objects; each
//! call is synchronous and transactional on its own.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Identifier of a persisted object.
pub type ObjectId = Uuid;

/// Attribute map of a persisted object.
pub type ObjectAttrs = Map<String, Value>;

/// A persisted domain object as returned by the datastore.
///
/// References to other objects are stored as their id rendered as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object id.
    pub id: ObjectId,
    /// Object kind (e.g., "device", "interface").
    pub kind: String,
    /// Attribute values.
    #[serde(default)]
    pub attrs: ObjectAttrs,
}

impl StoredObject {
    /// Returns a string attribute.
    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    /// Returns a boolean attribute, defaulting to false.
    pub fn bool_attr(&self, name: &str) -> bool {
        self.attrs.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns a reference attribute as an object id.
    pub fn ref_attr(&self, name: &str) -> Option<ObjectId> {
        self.str_attr(name).and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Returns a reference attribute, failing on anything that is neither
    /// `null` nor an object id.
    pub fn try_ref_attr(&self, name: &str) -> SyncResult<Option<ObjectId>> {
        let context = || format!("{} {} attribute '{}'", self.kind, self.id, name);
        match self.attrs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Uuid::parse_str(s)
                .map(Some)
                .map_err(|_| SyncError::unexpected_shape(context(), "object id", format!("'{}'", s))),
            Some(other) => Err(SyncError::unexpected_shape(context(), "object id", other.to_string())),
        }
    }

    /// Returns an attribute value or `null`.
    pub fn attr(&self, name: &str) -> Value {
        self.attrs.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Equality filter over object attributes.
///
/// Pairs are kept sorted so two filters with the same pairs render and hash
/// identically regardless of construction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filter(BTreeMap<String, String>);

impl Filter {
    /// Creates an empty filter (matches every object).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition. Values are compared against the
    /// attribute rendered as a plain string.
    pub fn eq(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(field.into(), value.to_string());
        self
    }

    /// Adds an equality condition on a reference attribute.
    pub fn id(self, field: impl Into<String>, id: ObjectId) -> Self {
        self.eq(field, id)
    }

    /// Returns the filter pairs in sorted order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the object satisfies every condition.
    pub fn matches(&self, object: &StoredObject) -> bool {
        self.0.iter().all(|(field, expected)| {
            match object.attrs.get(field) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Null) | None => expected.is_empty(),
                Some(other) => other.to_string() == *expected,
            }
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&rendered.join(","))
    }
}

/// Source-of-truth persistence collaborator.
pub trait Datastore: Send + Sync {
    /// Returns the object with the given id.
    fn get(&self, kind: &str, id: ObjectId) -> SyncResult<StoredObject>;

    /// Returns every object of `kind` matching the filter.
    fn query(&self, kind: &str, filter: &Filter) -> SyncResult<Vec<StoredObject>>;

    /// Creates an object and returns it with its assigned id.
    fn create(&self, kind: &str, attrs: ObjectAttrs) -> SyncResult<StoredObject>;

    /// Merges `attrs` into an existing object and returns the result.
    fn update(&self, kind: &str, id: ObjectId, attrs: ObjectAttrs) -> SyncResult<StoredObject>;

    /// Deletes an object.
    fn delete(&self, kind: &str, id: ObjectId) -> SyncResult<()>;

    /// Returns the single object matching a natural-key filter.
    ///
    /// # Errors
    ///
    /// [`SyncError::RelatedObjectNotFound`] when nothing matches and
    /// [`SyncError::MultipleObjectsReturned`] when the key is ambiguous.
    fn get_one(&self, kind: &str, filter: &Filter) -> SyncResult<StoredObject> {
        let mut found = self.query(kind, filter)?;
        match found.len() {
            0 => Err(SyncError::related_not_found(kind, filter)),
            1 => Ok(found.remove(0)),
            _ => Err(SyncError::MultipleObjectsReturned {
                kind: kind.to_string(),
                filter: filter.to_string(),
            }),
        }
    }
}

/// Builds an [`ObjectAttrs`] map from `name => value` pairs.
#[macro_export]
macro_rules! object_attrs {
    ($($field:expr => $value:expr),* $(,)?) => {{
        let mut attrs = $crate::ObjectAttrs::new();
        $(attrs.insert($field.to_string(), ::serde_json::json!($value));)*
        attrs
    }};
}
