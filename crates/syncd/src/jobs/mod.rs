//! Sync jobs.
//!
//! A job turns canonical per-host records into source-side [`Record`]s and
//! supplies the handlers that read and write the matching datastore
//! objects. Two jobs exist: [`SyncDevices`] onboards device identities and
//! [`SyncNetworkData`] keeps per-device network data current.

use netsync_core::{
    Attributes, Datastore, Filter, HandlerContext, HandlerRegistry, ObjectId, Record, StoredObject,
    SyncResult,
};
use netsync_extract::CanonicalRecord;
use serde_json::Value;

use crate::command::HostTarget;
use crate::config_file::SyncConfig;
use crate::datastore::kinds;

mod network_data;
mod sync_devices;

pub use network_data::SyncNetworkData;
pub use sync_devices::SyncDevices;

/// Per-run parameters handed to a job.
#[derive(Debug, Clone)]
pub struct JobParams {
    /// Type toggles.
    pub sync: SyncConfig,
    /// Date stamped on devices whose network data was synced.
    pub sync_date: String,
}

impl JobParams {
    pub fn new(sync: SyncConfig) -> Self {
        Self {
            sync,
            sync_date: chrono::Utc::now().date_naive().to_string(),
        }
    }

    /// Overrides the sync date.
    pub fn with_sync_date(mut self, date: impl Into<String>) -> Self {
        self.sync_date = date.into();
        self
    }
}

/// One sync job: its handlers, type order and source-record builder.
pub trait SyncJob: Send + Sync {
    /// Job name; also the mapping table key.
    fn name(&self) -> &'static str;

    /// Canonical fields a host must have to take part in the run.
    fn required_fields(&self) -> &'static [&'static str];

    /// Handlers for every type the job can sync.
    fn registry(&self) -> HandlerRegistry;

    /// Types to diff and apply, in dependency order, after toggles.
    fn type_order(&self) -> Vec<&'static str>;

    /// Returns the device name the host's records belong to.
    fn device_name(
        &self,
        ctx: &HandlerContext<'_>,
        host: &HostTarget,
        record: &CanonicalRecord,
    ) -> SyncResult<String>;

    /// Builds the source-side records of one host.
    fn source_records(
        &self,
        ctx: &HandlerContext<'_>,
        host: &HostTarget,
        record: &CanonicalRecord,
        device: &str,
    ) -> SyncResult<Vec<Record>>;

    /// Whether the primary address fix-up runs after apply.
    fn repairs_primary_ip(&self) -> bool {
        false
    }
}

/// Returns a trimmed non-empty string, `null` otherwise. Numbers are
/// rendered as text.
pub(crate) fn text(value: &Value) -> Value {
    match value {
        Value::String(s) if !s.trim().is_empty() => Value::String(s.trim().to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        _ => Value::Null,
    }
}

/// Returns a non-negative integer, accepting numeric strings.
pub(crate) fn number(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_u64().map_or(Value::Null, Value::from),
        Value::String(s) => s.trim().parse::<u64>().map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}

/// Returns a boolean, accepting the usual textual spellings.
pub(crate) fn flag(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "up" | "enabled" => Value::Bool(true),
            "false" | "no" | "down" | "disabled" => Value::Bool(false),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Builds record values from `name => value` pairs.
pub(crate) fn values<const N: usize>(pairs: [(&str, Value); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Reads `field` of the object a reference attribute points at; `null` when
/// the reference is unset.
pub(crate) fn referenced(
    ctx: &HandlerContext<'_>,
    object: &StoredObject,
    attr: &str,
    kind: &str,
    field: &str,
) -> SyncResult<Value> {
    match object.try_ref_attr(attr)? {
        Some(id) => Ok(ctx.datastore.get(kind, id)?.attr(field)),
        None => Ok(Value::Null),
    }
}

/// Resolves a device by name.
pub(crate) fn device_by_name(ctx: &HandlerContext<'_>, name: &str) -> SyncResult<StoredObject> {
    ctx.resolve(kinds::DEVICE, &Filter::new().eq("name", name))
}

/// Returns the datastore devices named in the run's scope.
pub(crate) fn scoped_devices(ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
    let mut devices = Vec::new();
    for name in ctx.scope.devices() {
        devices.extend(
            ctx.datastore
                .query(kinds::DEVICE, &Filter::new().eq("name", name))?,
        );
    }
    Ok(devices)
}

/// Returns every interface of the in-scope devices.
pub(crate) fn scoped_interfaces(ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
    let mut interfaces = Vec::new();
    for device in scoped_devices(ctx)? {
        interfaces.extend(
            ctx.datastore
                .query(kinds::INTERFACE, &Filter::new().id("device", device.id))?,
        );
    }
    Ok(interfaces)
}

/// Looks an interface up by device and name, bypassing the cache since
/// interfaces come and go within a run.
pub(crate) fn interface_on(
    datastore: &dyn Datastore,
    device: ObjectId,
    name: &str,
) -> SyncResult<StoredObject> {
    datastore.get_one(
        kinds::INTERFACE,
        &Filter::new().id("device", device).eq("name", name),
    )
}
