//! Per-type handler interface and the registry that selects handlers by
//! type name.
//!
//! A handler knows how to read its type out of the datastore (target side)
//! and how to apply create/update/delete for it. The reconcile engine only
//! talks to handlers through [`RecordHandler`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::cache::IdentifierCache;
use crate::config::TypeOrder;
use crate::datastore::{Datastore, Filter, StoredObject};
use crate::error::{SyncError, SyncResult};
use crate::record::{Attributes, Record, RecordFlags, RecordSchema};
use crate::store::RecordStore;

/// The three side-effecting operations a handler can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Returns the lowercase operation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of devices whose data is in scope for the target store.
///
/// Only devices whose extraction succeeded are in scope, so a failed host
/// never shows up as target-only data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetScope {
    devices: BTreeSet<String>,
}

impl TargetScope {
    /// Creates a scope over the given device names.
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the device is in scope.
    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    /// Iterates the in-scope device names.
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(String::as_str)
    }

    /// Returns true if no device is in scope.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Collaborators available to handlers during load and apply.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub datastore: &'a dyn Datastore,
    pub cache: &'a IdentifierCache,
    pub scope: &'a TargetScope,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        datastore: &'a dyn Datastore,
        cache: &'a IdentifierCache,
        scope: &'a TargetScope,
    ) -> Self {
        Self {
            datastore,
            cache,
            scope,
        }
    }

    /// Resolves a related object by natural key through the run cache.
    pub fn resolve(&self, kind: &str, filter: &Filter) -> SyncResult<StoredObject> {
        self.cache.resolve(self.datastore, kind, filter)
    }
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("scope", self.scope)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

/// Diff/apply behaviour for one record type.
pub trait RecordHandler: Send + Sync {
    /// Returns the schema of the handled type.
    fn schema(&self) -> &'static RecordSchema;

    /// Returns the handled type name.
    fn kind(&self) -> &'static str {
        self.schema().kind
    }

    /// Types that must be applied before this one.
    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    /// Returns false for operations this type never performs. The engine
    /// skips forbidden operations without calling the handler.
    fn permits(&self, _op: Operation) -> bool {
        true
    }

    /// Secondary ordering within a type: lower ranks are created and
    /// updated first and deleted last.
    fn apply_rank(&self, _record: &Record) -> u8 {
        0
    }

    /// Returns the datastore objects of this type that are in scope.
    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>>;

    /// Returns the identifier field values of a datastore object.
    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes>;

    /// Returns the compared attribute values of a datastore object.
    fn extract_attributes(
        &self,
        ctx: &HandlerContext<'_>,
        object: &StoredObject,
    ) -> SyncResult<Attributes>;

    /// Flags for a record loaded from the datastore.
    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::NONE)
    }

    /// Creates the persisted object for a source-only record.
    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()>;

    /// Updates the persisted object. `source` carries the full new
    /// attribute set; `changed` names the attributes that differ.
    fn update(
        &self,
        ctx: &HandlerContext<'_>,
        source: &Record,
        target: &Record,
        changed: &[String],
    ) -> SyncResult<()>;

    /// Deletes the persisted object behind a target-only record.
    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()>;

    /// Converts a datastore object into a target-side record.
    ///
    /// A structured value where an identifier belongs is a contract
    /// violation; an absent one only makes the object unusable.
    fn to_record(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Record> {
        let mut values = self.identify(ctx, object)?;
        for field in self.schema().identifiers {
            if let Some(value @ (Value::Array(_) | Value::Object(_))) = values.get(*field) {
                return Err(SyncError::unexpected_shape(
                    format!("{} {} identifier '{}'", object.kind, object.id, field),
                    "scalar",
                    value.to_string(),
                ));
            }
        }
        values.extend(self.extract_attributes(ctx, object)?);
        let flags = self.target_flags(ctx, object)?;
        Ok(self.schema().build(&values)?.with_flags(flags))
    }
}

/// Table of handlers keyed by type name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Box<dyn RecordHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous handler of that type.
    pub fn register<H: RecordHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.kind(), Box::new(handler));
    }

    /// Builder form of [`Self::register`].
    pub fn with<H: RecordHandler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Returns the handler for a type.
    pub fn get(&self, kind: &str) -> SyncResult<&dyn RecordHandler> {
        self.handlers
            .get(kind)
            .map(|h| h.as_ref())
            .ok_or_else(|| SyncError::UnknownRecordType {
                kind: kind.to_string(),
            })
    }

    /// Returns the registered type names.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Validates a requested type order and returns it as a [`TypeOrder`].
    ///
    /// Every type must be registered and appear once, and every dependency
    /// of a type that is also part of the order must appear earlier.
    /// Dependencies left out of the order (a disabled sync toggle) are
    /// assumed to already exist in the datastore.
    pub fn type_order(&self, requested: &[&str]) -> SyncResult<TypeOrder> {
        let mut seen: Vec<&'static str> = Vec::with_capacity(requested.len());

        for kind in requested {
            let handler = self.get(kind)?;
            if seen.contains(&handler.kind()) {
                return Err(SyncError::invalid_order(format!(
                    "type '{}' listed more than once",
                    kind
                )));
            }
            seen.push(handler.kind());
        }

        for (position, kind) in seen.iter().enumerate() {
            for dependency in self.get(kind)?.depends_on() {
                match seen.iter().position(|k| k == dependency) {
                    Some(dep_position) if dep_position > position => {
                        return Err(SyncError::invalid_order(format!(
                            "type '{}' must come after '{}'",
                            kind, dependency
                        )));
                    }
                    _ => {}
                }
            }
        }

        Ok(TypeOrder::from_validated(seen))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Loads the target-side store from the datastore, type by type.
///
/// Objects that cannot be turned into records (missing identifiers, broken
/// references) are logged and left out; contract violations abort.
#[instrument(skip(registry, ctx), fields(types = order.len()))]
pub fn load_target_store(
    registry: &HandlerRegistry,
    order: &TypeOrder,
    ctx: &HandlerContext<'_>,
) -> SyncResult<RecordStore> {
    let mut store = RecordStore::new("datastore");

    for kind in order.iter() {
        let handler = registry.get(kind)?;
        let objects = handler.target_objects(ctx)?;
        debug!(kind = %kind, count = objects.len(), "Loading target records");

        for object in &objects {
            if object.kind != kind {
                return Err(SyncError::unexpected_shape(
                    format!("datastore query for {}", kind),
                    format!("{} objects", kind),
                    format!("{} {}", object.kind, object.id),
                ));
            }
            match handler.to_record(ctx, object) {
                Ok(record) => {
                    store.add_or_warn(record);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(kind = %kind, id = %object.id, error = %err, "Skipping target object");
                }
            }
        }
    }

    Ok(store)
}
