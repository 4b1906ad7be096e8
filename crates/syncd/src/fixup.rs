//! Primary address fix-up.
//!
//! Deleting an interface clears `primary_ip4` on its device when the
//! primary address was assigned to it. When the same address is moved to
//! another interface in the same run (a management interface rename, for
//! example) the device would be left without a primary address. This hook
//! remembers every in-scope device's primary address before apply and
//! restores the ones that ended up null, pointing at whichever interface
//! of the device now carries the address.

use netsync_core::{
    object_attrs, ApplyReport, ChangeSet, Datastore, Filter, HandlerContext, StoredObject,
    SyncHook, SyncResult,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::datastore::kinds;
use crate::jobs::scoped_devices;

/// Primary address of a device as seen before apply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrimarySnapshot {
    host: String,
    interface: Option<String>,
}

/// [`SyncHook`] restoring primary addresses cleared during apply.
#[derive(Debug, Default)]
pub struct PrimaryIpFixup {
    snapshot: Mutex<BTreeMap<String, PrimarySnapshot>>,
    repaired: Mutex<Vec<String>>,
}

impl PrimaryIpFixup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices repaired by the last run, as `device (address)`.
    pub fn repaired(&self) -> Vec<String> {
        self.repaired.lock().clone()
    }

    fn primary_of(datastore: &dyn Datastore, device: &StoredObject) -> SyncResult<Option<PrimarySnapshot>> {
        let Some(ip_id) = device.ref_attr("primary_ip4") else {
            return Ok(None);
        };
        let ip = datastore.get(kinds::IP_ADDRESS, ip_id)?;
        let Some(host) = ip.str_attr("host") else {
            return Ok(None);
        };

        let mut interface = None;
        for assignment in datastore.query(kinds::IP_ASSIGNMENT, &Filter::new().id("ip_address", ip_id))? {
            if let Some(candidate) = assignment.ref_attr("interface") {
                let candidate = datastore.get(kinds::INTERFACE, candidate)?;
                if candidate.ref_attr("device") == Some(device.id) {
                    interface = candidate.str_attr("name").map(str::to_string);
                    break;
                }
            }
        }

        Ok(Some(PrimarySnapshot {
            host: host.to_string(),
            interface,
        }))
    }

    /// Re-points `device` at `host` if the address is assigned to one of
    /// its interfaces. Returns the hosting interface name.
    fn restore(ctx: &HandlerContext<'_>, device: &StoredObject, host: &str) -> SyncResult<Option<String>> {
        let Some(ip) = ctx
            .datastore
            .query(kinds::IP_ADDRESS, &Filter::new().eq("host", host))?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        for assignment in ctx
            .datastore
            .query(kinds::IP_ASSIGNMENT, &Filter::new().id("ip_address", ip.id))?
        {
            let Some(interface_id) = assignment.ref_attr("interface") else {
                continue;
            };
            let interface = ctx.datastore.get(kinds::INTERFACE, interface_id)?;
            if interface.ref_attr("device") != Some(device.id) {
                continue;
            }

            ctx.datastore.update(
                kinds::DEVICE,
                device.id,
                object_attrs! {"primary_ip4" => ip.id.to_string()},
            )?;
            ctx.datastore
                .update(kinds::INTERFACE, interface.id, object_attrs! {"mgmt_only" => true})?;
            ctx.cache.invalidate_object(device.id);
            return Ok(interface.str_attr("name").map(str::to_string));
        }
        Ok(None)
    }
}

impl SyncHook for PrimaryIpFixup {
    fn name(&self) -> &str {
        "primary_ip_fixup"
    }

    fn before_apply(&self, ctx: &HandlerContext<'_>, _changes: &ChangeSet<'_>) -> SyncResult<()> {
        let mut snapshot = BTreeMap::new();
        for device in scoped_devices(ctx)? {
            let Some(name) = device.str_attr("name") else {
                continue;
            };
            match Self::primary_of(ctx.datastore, &device) {
                Ok(Some(primary)) => {
                    debug!(device = %name, host = %primary.host, interface = ?primary.interface, "Remembering primary address");
                    snapshot.insert(name.to_string(), primary);
                }
                Ok(None) => {}
                Err(e) => warn!(device = %name, error = %e, "Cannot read primary address"),
            }
        }
        *self.snapshot.lock() = snapshot;
        self.repaired.lock().clear();
        Ok(())
    }

    fn after_apply(&self, ctx: &HandlerContext<'_>, _report: &ApplyReport) -> SyncResult<()> {
        let snapshot = std::mem::take(&mut *self.snapshot.lock());
        for (name, primary) in snapshot {
            let device = match ctx
                .datastore
                .query(kinds::DEVICE, &Filter::new().eq("name", &name))?
                .into_iter()
                .next()
            {
                Some(device) => device,
                None => continue,
            };
            if device.ref_attr("primary_ip4").is_some() {
                continue;
            }

            match Self::restore(ctx, &device, &primary.host) {
                Ok(Some(interface)) => {
                    info!(
                        device = %name,
                        host = %primary.host,
                        previous = ?primary.interface,
                        interface = %interface,
                        "Restored primary address"
                    );
                    self.repaired
                        .lock()
                        .push(format!("{} ({})", name, primary.host));
                }
                Ok(None) => {
                    warn!(device = %name, host = %primary.host, "Primary address is no longer assigned to the device");
                }
                Err(e) => {
                    warn!(device = %name, host = %primary.host, error = %e, "Failed to restore primary address");
                }
            }
        }
        Ok(())
    }
}
