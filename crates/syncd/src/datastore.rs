//! In-memory datastore with JSON snapshot persistence.
//!
//! Objects live in per-kind maps behind one lock, so every call is atomic.
//! Natural keys are unique per kind, and deleting an interface or an IP
//! address cascades the way a relational source of truth does: address
//! assignments go with it, and a device loses its primary address once
//! that address is no longer assigned to any of its interfaces.

use netsync_core::{Datastore, Filter, ObjectAttrs, ObjectId, StoredObject, SyncError, SyncResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{JobError, Result};

/// Object kinds and attribute names shared by the jobs and the datastore.
pub mod kinds {
    pub const LOCATION: &str = "location";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const PLATFORM: &str = "platform";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const DEVICE: &str = "device";
    pub const SOFTWARE_VERSION: &str = "software_version";
    pub const VLAN: &str = "vlan";
    pub const VRF: &str = "vrf";
    pub const INTERFACE: &str = "interface";
    pub const IP_ADDRESS: &str = "ip_address";
    pub const IP_ASSIGNMENT: &str = "ip_address_to_interface";
}

/// Attributes forming the natural key of a kind.
fn natural_key(kind: &str) -> &'static [&'static str] {
    match kind {
        kinds::LOCATION | kinds::MANUFACTURER | kinds::PLATFORM | kinds::VRF => &["name"],
        kinds::DEVICE => &["name"],
        kinds::DEVICE_TYPE => &["manufacturer", "model"],
        kinds::SOFTWARE_VERSION => &["platform", "version"],
        kinds::VLAN => &["location", "vid"],
        kinds::INTERFACE => &["device", "name"],
        kinds::IP_ADDRESS => &["host"],
        kinds::IP_ASSIGNMENT => &["ip_address", "interface"],
        _ => &[],
    }
}

type Table = BTreeMap<ObjectId, StoredObject>;

/// Reference [`Datastore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a datastore from existing objects.
    pub fn from_objects(objects: impl IntoIterator<Item = StoredObject>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for object in objects {
                tables
                    .entry(object.kind.clone())
                    .or_default()
                    .insert(object.id, object);
            }
        }
        store
    }

    /// Loads a JSON snapshot; a missing file yields an empty datastore.
    #[instrument]
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let objects: Vec<StoredObject> = serde_json::from_str(&content).map_err(|e| {
                    JobError::Config(format!(
                        "Failed to parse datastore snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(objects = objects.len(), "Loaded datastore snapshot");
                Ok(Self::from_objects(objects))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Datastore snapshot not found, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(JobError::Io(e)),
        }
    }

    /// Writes every object to a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot()).map_err(|e| {
            JobError::Config(format!("Failed to serialize datastore snapshot: {}", e))
        })?;
        fs::write(path, content)?;
        debug!(path = %path.display(), "Saved datastore snapshot");
        Ok(())
    }

    /// Returns every object, grouped by kind.
    pub fn snapshot(&self) -> Vec<StoredObject> {
        self.tables
            .read()
            .values()
            .flat_map(|table| table.values().cloned())
            .collect()
    }

    /// Returns every object of a kind.
    pub fn objects(&self, kind: &str) -> Vec<StoredObject> {
        self.tables
            .read()
            .get(kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of objects of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.tables.read().get(kind).map_or(0, Table::len)
    }

    fn conflict(tables: &BTreeMap<String, Table>, kind: &str, candidate: &StoredObject) -> Option<String> {
        let fields = natural_key(kind);
        if fields.is_empty() {
            return None;
        }
        let mut filter = Filter::new();
        for field in fields {
            filter = filter.eq(*field, render(candidate.attrs.get(*field)));
        }
        tables.get(kind).and_then(|table| {
            table
                .values()
                .find(|existing| existing.id != candidate.id && filter.matches(existing))
                .map(|_| filter.to_string())
        })
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn not_found(kind: &str, id: ObjectId) -> SyncError {
    SyncError::datastore("get", format!("{} {} does not exist", kind, id))
}

/// Removes `ip_address_to_interface` rows matching `pred`, returning the
/// address ids they pointed at.
fn drop_assignments(tables: &mut BTreeMap<String, Table>, pred: impl Fn(&StoredObject) -> bool) -> Vec<ObjectId> {
    let mut addresses = Vec::new();
    if let Some(table) = tables.get_mut(kinds::IP_ASSIGNMENT) {
        table.retain(|_, assignment| {
            if pred(assignment) {
                addresses.extend(assignment.ref_attr("ip_address"));
                false
            } else {
                true
            }
        });
    }
    addresses
}

/// Clears `primary_ip4` on `device` if the address is no longer assigned to
/// any of its interfaces.
fn release_primary(tables: &mut BTreeMap<String, Table>, device: ObjectId) {
    let primary = tables
        .get(kinds::DEVICE)
        .and_then(|t| t.get(&device))
        .and_then(|d| d.ref_attr("primary_ip4"));
    let Some(primary) = primary else {
        return;
    };

    let device_interfaces: Vec<ObjectId> = tables
        .get(kinds::INTERFACE)
        .map(|t| {
            t.values()
                .filter(|i| i.ref_attr("device") == Some(device))
                .map(|i| i.id)
                .collect()
        })
        .unwrap_or_default();
    let still_assigned = tables.get(kinds::IP_ASSIGNMENT).is_some_and(|t| {
        t.values().any(|a| {
            a.ref_attr("ip_address") == Some(primary)
                && a.ref_attr("interface").is_some_and(|i| device_interfaces.contains(&i))
        })
    });

    if !still_assigned {
        if let Some(object) = tables.get_mut(kinds::DEVICE).and_then(|t| t.get_mut(&device)) {
            debug!(device = %device, "Clearing primary address no longer assigned to the device");
            object.attrs.insert("primary_ip4".to_string(), Value::Null);
        }
    }
}

impl Datastore for MemoryDatastore {
    fn get(&self, kind: &str, id: ObjectId) -> SyncResult<StoredObject> {
        self.tables
            .read()
            .get(kind)
            .and_then(|table| table.get(&id))
            .cloned()
            .ok_or_else(|| not_found(kind, id))
    }

    fn query(&self, kind: &str, filter: &Filter) -> SyncResult<Vec<StoredObject>> {
        Ok(self
            .tables
            .read()
            .get(kind)
            .map(|table| table.values().filter(|o| filter.matches(o)).cloned().collect())
            .unwrap_or_default())
    }

    fn create(&self, kind: &str, attrs: ObjectAttrs) -> SyncResult<StoredObject> {
        let mut tables = self.tables.write();
        let object = StoredObject {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            attrs,
        };
        if let Some(key) = Self::conflict(&tables, kind, &object) {
            return Err(SyncError::datastore(
                "create",
                format!("{} with {} already exists", kind, key),
            ));
        }
        tables
            .entry(kind.to_string())
            .or_default()
            .insert(object.id, object.clone());
        debug!(kind = %kind, id = %object.id, "Created object");
        Ok(object)
    }

    fn update(&self, kind: &str, id: ObjectId, attrs: ObjectAttrs) -> SyncResult<StoredObject> {
        let mut tables = self.tables.write();
        let mut object = tables
            .get(kind)
            .and_then(|table| table.get(&id))
            .cloned()
            .ok_or_else(|| not_found(kind, id))?;
        object.attrs.extend(attrs);
        if let Some(key) = Self::conflict(&tables, kind, &object) {
            return Err(SyncError::datastore(
                "update",
                format!("{} with {} already exists", kind, key),
            ));
        }
        tables
            .entry(kind.to_string())
            .or_default()
            .insert(id, object.clone());
        debug!(kind = %kind, id = %id, "Updated object");
        Ok(object)
    }

    fn delete(&self, kind: &str, id: ObjectId) -> SyncResult<()> {
        let mut tables = self.tables.write();
        let removed = tables
            .get_mut(kind)
            .and_then(|table| table.remove(&id))
            .ok_or_else(|| not_found(kind, id))?;

        match kind {
            kinds::INTERFACE => {
                drop_assignments(&mut tables, |a| a.ref_attr("interface") == Some(id));
                if let Some(table) = tables.get_mut(kinds::INTERFACE) {
                    for member in table.values_mut().filter(|i| i.ref_attr("lag") == Some(id)) {
                        member.attrs.insert("lag".to_string(), Value::Null);
                    }
                }
                if let Some(device) = removed.ref_attr("device") {
                    release_primary(&mut tables, device);
                }
            }
            kinds::IP_ADDRESS => {
                drop_assignments(&mut tables, |a| a.ref_attr("ip_address") == Some(id));
                if let Some(table) = tables.get_mut(kinds::DEVICE) {
                    for device in table.values_mut().filter(|d| d.ref_attr("primary_ip4") == Some(id)) {
                        device.attrs.insert("primary_ip4".to_string(), Value::Null);
                    }
                }
            }
            kinds::IP_ASSIGNMENT => {
                let device = removed.ref_attr("interface").and_then(|i| {
                    tables
                        .get(kinds::INTERFACE)
                        .and_then(|t| t.get(&i))
                        .and_then(|i| i.ref_attr("device"))
                });
                if let Some(device) = device {
                    release_primary(&mut tables, device);
                }
            }
            _ => {}
        }
        debug!(kind = %kind, id = %id, "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_core::object_attrs;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Seeded {
        store: MemoryDatastore,
        device: ObjectId,
        mgmt: ObjectId,
        address: ObjectId,
    }

    fn seeded() -> Seeded {
        let store = MemoryDatastore::new();
        let device = store
            .create(kinds::DEVICE, object_attrs! {"name" => "leaf1", "serial" => "SN1"})
            .unwrap();
        let mgmt = store
            .create(
                kinds::INTERFACE,
                object_attrs! {"device" => device.id.to_string(), "name" => "Management1"},
            )
            .unwrap();
        let address = store
            .create(kinds::IP_ADDRESS, object_attrs! {"host" => "10.0.0.1", "address" => "10.0.0.1/24"})
            .unwrap();
        store
            .create(
                kinds::IP_ASSIGNMENT,
                object_attrs! {"ip_address" => address.id.to_string(), "interface" => mgmt.id.to_string()},
            )
            .unwrap();
        store
            .update(kinds::DEVICE, device.id, object_attrs! {"primary_ip4" => address.id.to_string()})
            .unwrap();
        Seeded {
            store,
            device: device.id,
            mgmt: mgmt.id,
            address: address.id,
        }
    }

    #[test]
    fn test_natural_key_uniqueness() {
        let store = MemoryDatastore::new();
        store.create(kinds::VRF, object_attrs! {"name" => "blue"}).unwrap();
        let err = store.create(kinds::VRF, object_attrs! {"name" => "blue"}).unwrap_err();
        assert!(matches!(err, SyncError::Datastore { .. }));

        let red = store.create(kinds::VRF, object_attrs! {"name" => "red"}).unwrap();
        assert!(store.update(kinds::VRF, red.id, object_attrs! {"name" => "blue"}).is_err());
        assert_eq!(store.count(kinds::VRF), 2);
    }

    #[test]
    fn test_get_one_and_missing_object() {
        let Seeded { store, device, .. } = seeded();
        let found = store
            .get_one(kinds::DEVICE, &Filter::new().eq("name", "leaf1"))
            .unwrap();
        assert_eq!(found.id, device);
        assert!(matches!(
            store.get_one(kinds::DEVICE, &Filter::new().eq("name", "leaf9")),
            Err(SyncError::RelatedObjectNotFound { .. })
        ));
        assert!(store.get(kinds::DEVICE, Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_interface_delete_clears_primary_address() {
        let Seeded {
            store,
            device,
            mgmt,
            address,
        } = seeded();
        store.delete(kinds::INTERFACE, mgmt).unwrap();

        assert_eq!(store.count(kinds::IP_ASSIGNMENT), 0);
        assert!(store.get(kinds::IP_ADDRESS, address).is_ok());
        assert_eq!(store.get(kinds::DEVICE, device).unwrap().attr("primary_ip4"), Value::Null);
    }

    #[test]
    fn test_primary_kept_while_assigned_elsewhere_on_device() {
        let Seeded {
            store,
            device,
            mgmt,
            address,
        } = seeded();
        let other = store
            .create(
                kinds::INTERFACE,
                object_attrs! {"device" => device.to_string(), "name" => "Management0"},
            )
            .unwrap();
        store
            .create(
                kinds::IP_ASSIGNMENT,
                object_attrs! {"ip_address" => address.to_string(), "interface" => other.id.to_string()},
            )
            .unwrap();
        store.delete(kinds::INTERFACE, mgmt).unwrap();
        assert_eq!(
            store.get(kinds::DEVICE, device).unwrap().ref_attr("primary_ip4"),
            Some(address)
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let Seeded { store, device, .. } = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");
        store.save(&path).unwrap();

        let loaded = MemoryDatastore::load_or_default(&path).unwrap();
        assert_eq!(loaded.get(kinds::DEVICE, device).unwrap().attr("serial"), json!("SN1"));
        assert_eq!(loaded.count(kinds::IP_ASSIGNMENT), 1);

        let empty = MemoryDatastore::load_or_default(&dir.path().join("missing.json")).unwrap();
        assert_eq!(empty.snapshot().len(), 0);
    }
}
