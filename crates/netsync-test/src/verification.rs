//! Verification helpers for testing sync runs
//!
//! Provides assertion helpers to verify datastore state after a run

use netsync_core::{Datastore, Filter, StoredObject, SyncError};
use netsync_syncd::{kinds, MemoryDatastore};
use serde_json::Value;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Datastore error: {0}")]
    Sync(#[from] SyncError),

    #[error("Expected {kind} matching '{filter}' not found")]
    NotFound { kind: String, filter: String },

    #[error("Unexpected {kind} matching '{filter}'")]
    Unexpected { kind: String, filter: String },

    #[error("Value mismatch for {kind} '{filter}' field {field}: expected {expected}, got {actual}")]
    ValueMismatch {
        kind: String,
        filter: String,
        field: String,
        expected: Value,
        actual: Value,
    },

    #[error("Expected {expected} {kind} objects, found {actual}")]
    CountMismatch {
        kind: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Datastore verification helper
pub struct DatastoreVerifier<'a> {
    store: &'a MemoryDatastore,
}

impl<'a> DatastoreVerifier<'a> {
    pub fn new(store: &'a MemoryDatastore) -> Self {
        Self { store }
    }

    /// Verify the number of objects of a kind
    pub fn assert_count(&self, kind: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.store.count(kind);
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                kind: kind.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that exactly one object matches and return it
    pub fn assert_exists(&self, kind: &str, filter: &Filter) -> VerifyResult<StoredObject> {
        match self.store.get_one(kind, filter) {
            Ok(object) => Ok(object),
            Err(SyncError::RelatedObjectNotFound { .. }) => Err(VerificationError::NotFound {
                kind: kind.to_string(),
                filter: filter.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify that no object matches
    pub fn assert_absent(&self, kind: &str, filter: &Filter) -> VerifyResult<()> {
        if !self.store.query(kind, filter)?.is_empty() {
            return Err(VerificationError::Unexpected {
                kind: kind.to_string(),
                filter: filter.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that an attribute of the matching object has a specific value
    pub fn assert_attr(&self, kind: &str, filter: &Filter, field: &str, expected: Value) -> VerifyResult<()> {
        let object = self.assert_exists(kind, filter)?;
        let actual = object.attr(field);
        if actual != expected {
            return Err(VerificationError::ValueMismatch {
                kind: kind.to_string(),
                filter: filter.to_string(),
                field: field.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that a device exists and return it
    pub fn device(&self, name: &str) -> VerifyResult<StoredObject> {
        self.assert_exists(kinds::DEVICE, &Filter::new().eq("name", name))
    }

    /// Verify that an interface exists on a device and return it
    pub fn interface(&self, device: &str, name: &str) -> VerifyResult<StoredObject> {
        let device = self.device(device)?;
        self.assert_exists(
            kinds::INTERFACE,
            &Filter::new().id("device", device.id).eq("name", name),
        )
    }

    /// Names of a device's interfaces, sorted
    pub fn interface_names(&self, device: &str) -> VerifyResult<Vec<String>> {
        let device = self.device(device)?;
        let mut names: Vec<String> = self
            .store
            .query(kinds::INTERFACE, &Filter::new().id("device", device.id))?
            .iter()
            .filter_map(|i| i.str_attr("name").map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Primary address of a device in `address/len` form
    pub fn primary_ip(&self, device: &str) -> VerifyResult<Option<String>> {
        let device = self.device(device)?;
        match device.ref_attr("primary_ip4") {
            Some(id) => Ok(self
                .store
                .get(kinds::IP_ADDRESS, id)?
                .str_attr("address")
                .map(str::to_string)),
            None => Ok(None),
        }
    }

    /// Name of the object a reference attribute points at
    pub fn referenced_name(&self, object: &StoredObject, attr: &str, kind: &str, field: &str) -> VerifyResult<Value> {
        match object.ref_attr(attr) {
            Some(id) => Ok(self.store.get(kind, id)?.attr(field)),
            None => Ok(Value::Null),
        }
    }

    /// Interfaces of a device an address is assigned to, sorted
    pub fn assigned_interfaces(&self, device: &str, host: &str) -> VerifyResult<Vec<String>> {
        let device = self.device(device)?;
        let mut names = Vec::new();
        for ip in self.store.query(kinds::IP_ADDRESS, &Filter::new().eq("host", host))? {
            for assignment in self
                .store
                .query(kinds::IP_ASSIGNMENT, &Filter::new().id("ip_address", ip.id))?
            {
                let Some(id) = assignment.ref_attr("interface") else {
                    continue;
                };
                let interface = self.store.get(kinds::INTERFACE, id)?;
                if interface.ref_attr("device") == Some(device.id) {
                    names.extend(interface.str_attr("name").map(str::to_string));
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_core::object_attrs;
    use serde_json::json;

    #[test]
    fn test_verifier_reports_mismatches() {
        let store = MemoryDatastore::new();
        store
            .create(kinds::DEVICE, object_attrs! {"name" => "leaf1", "serial" => "SN1"})
            .unwrap();
        let verify = DatastoreVerifier::new(&store);

        verify.assert_count(kinds::DEVICE, 1).unwrap();
        verify
            .assert_attr(kinds::DEVICE, &Filter::new().eq("name", "leaf1"), "serial", json!("SN1"))
            .unwrap();
        assert!(matches!(
            verify.assert_attr(kinds::DEVICE, &Filter::new().eq("name", "leaf1"), "serial", json!("SN2")),
            Err(VerificationError::ValueMismatch { .. })
        ));
        assert!(matches!(verify.device("leaf2"), Err(VerificationError::NotFound { .. })));
        assert!(matches!(
            verify.assert_absent(kinds::DEVICE, &Filter::new()),
            Err(VerificationError::Unexpected { .. })
        ));
        assert_eq!(verify.primary_ip("leaf1").unwrap(), None);
    }
}
