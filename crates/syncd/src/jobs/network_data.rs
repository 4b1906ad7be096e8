//! Network data job.
//!
//! Keeps the data of already onboarded devices current: software version,
//! VLANs, VRFs, interfaces, IP addresses and the IP/VLAN/VRF-to-interface
//! relations. Devices themselves are never created or deleted here, and
//! neither are software version assignments.
//!
//! Relations that live on the interface object (untagged VLAN, tagged
//! VLANs, VRF) are separate record types so that they are applied after
//! both ends exist.

use netsync_core::{
    aggregation_rank, object_attrs, Attributes, Filter, HandlerContext, HandlerRegistry, ObjectAttrs,
    ObjectId, Operation, Record, RecordFlags, RecordHandler, RecordSchema, StoredObject, SyncError,
    SyncResult,
};
use netsync_extract::CanonicalRecord;
use netsync_types::{IpInterface, VlanId};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{
    device_by_name, flag, interface_on, number, referenced, scoped_devices, scoped_interfaces,
    text, values, JobParams, SyncJob,
};
use crate::command::HostTarget;
use crate::datastore::kinds;

pub(crate) const SOFTWARE_VERSION: &str = "software_version";
pub(crate) const UNTAGGED_VLAN: &str = "untagged_vlan_to_interface";
pub(crate) const TAGGED_VLANS: &str = "tagged_vlans_to_interface";
pub(crate) const VRF_TO_INTERFACE: &str = "vrf_to_interface";

static DEVICE: RecordSchema =
    RecordSchema::new(kinds::DEVICE, &["name", "serial"], &["last_network_data_sync"]);
static SOFTWARE: RecordSchema = RecordSchema::new(SOFTWARE_VERSION, &["device"], &["version"]);
static VLAN: RecordSchema = RecordSchema::new(kinds::VLAN, &["location", "vid"], &["name"]);
static VRF: RecordSchema = RecordSchema::new(kinds::VRF, &["name"], &["rd"]);
static INTERFACE: RecordSchema = RecordSchema::new(
    kinds::INTERFACE,
    &["device", "name"],
    &["type", "enabled", "mtu", "description", "mac_address", "mode", "lag"],
);
static IP_ADDRESS: RecordSchema = RecordSchema::new(kinds::IP_ADDRESS, &["host"], &["mask_length"]);
static IP_ASSIGNMENT: RecordSchema =
    RecordSchema::new(kinds::IP_ASSIGNMENT, &["device", "interface", "host"], &[]);
static UNTAGGED: RecordSchema =
    RecordSchema::new(UNTAGGED_VLAN, &["device", "name"], &["untagged_vlan"]);
static TAGGED: RecordSchema = RecordSchema::new(TAGGED_VLANS, &["device", "name"], &["tagged_vlans"]);
static VRF_MEMBER: RecordSchema = RecordSchema::new(VRF_TO_INTERFACE, &["device", "name"], &["vrf"]);

/// The network data job.
#[derive(Debug, Clone)]
pub struct SyncNetworkData {
    params: JobParams,
}

impl SyncNetworkData {
    pub fn new(params: JobParams) -> Self {
        Self { params }
    }
}

impl SyncJob for SyncNetworkData {
    fn name(&self) -> &'static str {
        "sync_network_data"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["serial"]
    }

    fn registry(&self) -> HandlerRegistry {
        HandlerRegistry::new()
            .with(DeviceHandler)
            .with(SoftwareVersionHandler)
            .with(VlanHandler)
            .with(VrfHandler)
            .with(InterfaceHandler {
                include_lags: self.params.sync.include_lags,
            })
            .with(IpAddressHandler)
            .with(IpAssignmentHandler)
            .with(RelationHandler::new(Relation::UntaggedVlan))
            .with(RelationHandler::new(Relation::TaggedVlans))
            .with(RelationHandler::new(Relation::Vrf))
    }

    fn type_order(&self) -> Vec<&'static str> {
        let sync = &self.params.sync;
        let mut order = vec![kinds::DEVICE];
        if sync.include_software_version {
            order.push(SOFTWARE_VERSION);
        }
        if sync.include_vlans {
            order.push(kinds::VLAN);
        }
        if sync.include_vrfs {
            order.push(kinds::VRF);
        }
        order.extend([kinds::INTERFACE, kinds::IP_ADDRESS, kinds::IP_ASSIGNMENT]);
        if sync.include_vlans {
            order.extend([UNTAGGED_VLAN, TAGGED_VLANS]);
        }
        if sync.include_vrfs {
            order.push(VRF_TO_INTERFACE);
        }
        order
    }

    /// The device is found by serial; a host whose device was never
    /// onboarded is excluded.
    fn device_name(
        &self,
        ctx: &HandlerContext<'_>,
        host: &HostTarget,
        record: &CanonicalRecord,
    ) -> SyncResult<String> {
        let serial = record.str_field("serial").unwrap_or_default();
        let device = ctx
            .resolve(kinds::DEVICE, &Filter::new().eq("serial", serial))
            .map_err(|e| match e {
                SyncError::RelatedObjectNotFound { .. } => SyncError::related_not_found(
                    kinds::DEVICE,
                    format!("serial={} (host {} not onboarded)", serial, host.address),
                ),
                other => other,
            })?;
        device
            .str_attr("name")
            .map(str::to_string)
            .ok_or_else(|| SyncError::unexpected_shape("device object", "a name", "none"))
    }

    fn source_records(
        &self,
        ctx: &HandlerContext<'_>,
        host: &HostTarget,
        record: &CanonicalRecord,
        device: &str,
    ) -> SyncResult<Vec<Record>> {
        let sync = &self.params.sync;
        let device_object = device_by_name(ctx, device)?;
        let location = referenced(ctx, &device_object, "location", kinds::LOCATION, "name")?;
        let mut records = vec![DEVICE.build(&values([
            ("name", Value::from(device)),
            ("serial", text(record.field("serial"))),
            ("last_network_data_sync", Value::from(self.params.sync_date.as_str())),
        ]))?];

        if sync.include_software_version {
            records.push(SOFTWARE.build(&values([
                ("device", Value::from(device)),
                ("version", text(record.field("software_version"))),
            ]))?);
        }

        if sync.include_vlans {
            for (vid, vlan) in record.nested("vlans") {
                match vid.parse::<VlanId>() {
                    Ok(vid) => records.push(VLAN.build(&values([
                        ("location", location.clone()),
                        ("vid", Value::from(u16::from(vid))),
                        ("name", text(vlan.get("name").unwrap_or(&Value::Null))),
                    ]))?),
                    Err(e) => warn!(host = %host.address, vid = %vid, error = %e, "Skipping VLAN"),
                }
            }
        }

        if sync.include_vrfs {
            for (name, vrf) in record.nested("vrfs") {
                records.push(VRF.build(&values([
                    ("name", Value::from(name)),
                    ("rd", text(vrf.get("rd").unwrap_or(&Value::Null))),
                ]))?);
            }
        }

        for (name, fields) in record.nested("interfaces") {
            records.extend(interface_records(sync.include_lags, device, name, fields, host)?);
        }

        let order = self.type_order();
        Ok(records
            .into_iter()
            .filter(|r| order.contains(&r.kind()))
            .collect())
    }

    fn repairs_primary_ip(&self) -> bool {
        true
    }
}

fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    fields.get(name).unwrap_or(&NULL)
}

/// Canonical interface attributes, normalised the same way on both sides.
fn interface_attrs(fields: &Map<String, Value>, include_lags: bool) -> [(&'static str, Value); 7] {
    [
        ("type", text(field(fields, "type"))),
        ("enabled", flag(field(fields, "enabled"))),
        ("mtu", number(field(fields, "mtu"))),
        ("description", text(field(fields, "description"))),
        ("mac_address", text(field(fields, "mac_address"))),
        ("mode", text(field(fields, "mode"))),
        (
            "lag",
            if include_lags {
                text(field(fields, "lag"))
            } else {
                Value::Null
            },
        ),
    ]
}

/// Builds the interface record and its relation records.
fn interface_records(
    include_lags: bool,
    device: &str,
    name: &str,
    fields: &Map<String, Value>,
    host: &HostTarget,
) -> SyncResult<Vec<Record>> {
    let mut interface = values([("device", Value::from(device)), ("name", Value::from(name))]);
    interface.extend(
        interface_attrs(fields, include_lags)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v)),
    );
    let mut records = vec![INTERFACE.build(&interface)?];

    let mut hosts = BTreeSet::new();
    for raw in field(fields, "ip_addresses").as_array().into_iter().flatten() {
        let Some(raw) = raw.as_str() else { continue };
        let address = match raw.parse::<IpInterface>() {
            Ok(address) => address,
            Err(e) => {
                warn!(host = %host.address, interface = %name, address = %raw, error = %e, "Skipping address");
                continue;
            }
        };
        let ip = address.address().to_string();
        if !hosts.insert(ip.clone()) {
            continue;
        }
        records.push(IP_ADDRESS.build(&values([
            ("host", Value::from(ip.as_str())),
            ("mask_length", Value::from(address.prefix_len())),
        ]))?);
        records.push(IP_ASSIGNMENT.build(&values([
            ("device", Value::from(device)),
            ("interface", Value::from(name)),
            ("host", Value::from(ip)),
        ]))?);
    }

    let untagged = number(field(fields, "untagged_vlan"));
    if !untagged.is_null() {
        records.push(UNTAGGED.build(&values([
            ("device", Value::from(device)),
            ("name", Value::from(name)),
            ("untagged_vlan", untagged),
        ]))?);
    }

    let tagged = vlan_ids(field(fields, "tagged_vlans"));
    if !tagged.is_empty() {
        records.push(TAGGED.build(&values([
            ("device", Value::from(device)),
            ("name", Value::from(name)),
            ("tagged_vlans", Value::from(tagged)),
        ]))?);
    }

    let vrf = text(field(fields, "vrf"));
    if !vrf.is_null() {
        records.push(VRF_MEMBER.build(&values([
            ("device", Value::from(device)),
            ("name", Value::from(name)),
            ("vrf", vrf),
        ]))?);
    }

    Ok(records)
}

/// Sorted, de-duplicated VLAN ids of a tagged list. "all" yields nothing:
/// the interface mode already says every VLAN is carried.
fn vlan_ids(value: &Value) -> Vec<u64> {
    let ids: BTreeSet<u64> = value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| number(v).as_u64())
        .collect();
    ids.into_iter().collect()
}

/// Returns the device and interface objects behind a `(device, name)`
/// keyed record.
fn interface_of(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<(StoredObject, StoredObject)> {
    let device = device_by_name(ctx, record.id_value("device").unwrap_or_default())?;
    let name = record
        .id_value("name")
        .or_else(|| record.id_value("interface"))
        .unwrap_or_default();
    let interface = interface_on(ctx.datastore, device.id, name)?;
    Ok((device, interface))
}

/// Resolves a VLAN by id at the device's location.
fn vlan_at(ctx: &HandlerContext<'_>, device: &StoredObject, vid: u64) -> SyncResult<ObjectId> {
    let mut filter = Filter::new().eq("vid", vid);
    if let Some(location) = device.ref_attr("location") {
        filter = filter.id("location", location);
    }
    Ok(ctx.resolve(kinds::VLAN, &filter)?.id)
}

struct DeviceHandler;

impl RecordHandler for DeviceHandler {
    fn schema(&self) -> &'static RecordSchema {
        &DEVICE
    }

    fn permits(&self, op: Operation) -> bool {
        op == Operation::Update
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        scoped_devices(ctx)
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("name", object.attr("name")), ("serial", object.attr("serial"))]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("last_network_data_sync", object.attr("last_network_data_sync"))]))
    }

    fn create(&self, _ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        info!(device = %record.key(), "Devices are onboarded by sync_devices, not created here");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        let device = device_by_name(ctx, source.id_value("name").unwrap_or_default())?;
        ctx.datastore.update(
            kinds::DEVICE,
            device.id,
            object_attrs! {"last_network_data_sync" => source.attr("last_network_data_sync")},
        )?;
        ctx.cache.invalidate_object(device.id);
        Ok(())
    }

    fn delete(&self, _ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        info!(device = %target.key(), "Devices are never deleted by network data sync");
        Ok(())
    }
}

/// The software version assigned to a device. Every in-scope device has
/// one such record, so only updates occur.
struct SoftwareVersionHandler;

impl RecordHandler for SoftwareVersionHandler {
    fn schema(&self) -> &'static RecordSchema {
        &SOFTWARE
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::DEVICE]
    }

    fn permits(&self, op: Operation) -> bool {
        op == Operation::Update
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        scoped_devices(ctx)
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("device", object.attr("name"))]))
    }

    fn extract_attributes(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([(
            "version",
            referenced(ctx, object, "software_version", kinds::SOFTWARE_VERSION, "version")?,
        )]))
    }

    fn create(&self, _ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        info!(device = %record.key(), "Software version assignments are only updated");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        let device = device_by_name(ctx, source.id_value("device").unwrap_or_default())?;
        let reference = match source.attr_str("version") {
            Some(version) => {
                let platform = device.ref_attr("platform").map(|id| id.to_string());
                let filter = Filter::new()
                    .eq("version", version)
                    .eq("platform", platform.clone().unwrap_or_default());
                let attrs = object_attrs! {"version" => version, "platform" => platform};
                let existing = ctx.datastore.query(kinds::SOFTWARE_VERSION, &filter)?;
                let object = match existing.into_iter().next() {
                    Some(object) => object,
                    None => ctx.datastore.create(kinds::SOFTWARE_VERSION, attrs)?,
                };
                Value::String(object.id.to_string())
            }
            None => Value::Null,
        };
        ctx.datastore.update(
            kinds::DEVICE,
            device.id,
            object_attrs! {"software_version" => reference},
        )?;
        ctx.cache.invalidate_object(device.id);
        Ok(())
    }

    fn delete(&self, _ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        info!(device = %target.key(), "Software version assignments are only updated");
        Ok(())
    }
}

/// VLANs at the locations of the in-scope devices. VLANs are shared by
/// every device of a location, so target-only VLANs are kept.
struct VlanHandler;

impl VlanHandler {
    /// Location id and VLAN id of a record.
    fn natural_key(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<(ObjectId, Value)> {
        let location = ctx.resolve(
            kinds::LOCATION,
            &Filter::new().eq("name", record.id_value("location").unwrap_or_default()),
        )?;
        let vid = number(&Value::from(record.id_value("vid").unwrap_or_default()));
        Ok((location.id, vid))
    }

    fn find(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<StoredObject> {
        let (location, vid) = Self::natural_key(ctx, record)?;
        ctx.resolve(
            kinds::VLAN,
            &Filter::new().id("location", location).eq("vid", vid),
        )
    }
}

impl RecordHandler for VlanHandler {
    fn schema(&self) -> &'static RecordSchema {
        &VLAN
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        let locations: BTreeSet<ObjectId> = scoped_devices(ctx)?
            .iter()
            .filter_map(|d| d.ref_attr("location"))
            .collect();
        let mut vlans = Vec::new();
        for location in locations {
            vlans.extend(
                ctx.datastore
                    .query(kinds::VLAN, &Filter::new().id("location", location))?,
            );
        }
        Ok(vlans)
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([
            ("location", referenced(ctx, object, "location", kinds::LOCATION, "name")?),
            ("vid", object.attr("vid")),
        ]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("name", text(&object.attr("name")))]))
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let (location, vid) = Self::natural_key(ctx, record)?;
        ctx.datastore.create(
            kinds::VLAN,
            object_attrs! {
                "location" => location.to_string(),
                "vid" => vid,
                "name" => record.attr("name").cloned().unwrap_or(Value::Null),
            },
        )?;
        info!(vlan = %record.key(), "Created VLAN");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        let vlan = Self::find(ctx, source)?;
        ctx.datastore.update(
            kinds::VLAN,
            vlan.id,
            object_attrs! {"name" => source.attr("name").cloned().unwrap_or(Value::Null)},
        )?;
        ctx.cache.invalidate_object(vlan.id);
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let vlan = Self::find(ctx, target)?;
        ctx.datastore.delete(kinds::VLAN, vlan.id)?;
        ctx.cache.invalidate_object(vlan.id);
        Ok(())
    }
}

/// VRFs are global; target-only VRFs are kept.
struct VrfHandler;

impl RecordHandler for VrfHandler {
    fn schema(&self) -> &'static RecordSchema {
        &VRF
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        ctx.datastore.query(kinds::VRF, &Filter::new())
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("name", object.attr("name"))]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("rd", text(&object.attr("rd")))]))
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let name = record.id_value("name").unwrap_or_default();
        let created = ctx.datastore.create(
            kinds::VRF,
            object_attrs! {"name" => name, "rd" => record.attr("rd").cloned().unwrap_or(Value::Null)},
        )?;
        ctx.cache.insert(kinds::VRF, Filter::new().eq("name", name), created);
        info!(vrf = %name, "Created VRF");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        let name = source.id_value("name").unwrap_or_default();
        let vrf = ctx.resolve(kinds::VRF, &Filter::new().eq("name", name))?;
        ctx.datastore.update(
            kinds::VRF,
            vrf.id,
            object_attrs! {"rd" => source.attr("rd").cloned().unwrap_or(Value::Null)},
        )?;
        ctx.cache.invalidate_object(vrf.id);
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let name = target.id_value("name").unwrap_or_default();
        let vrf = ctx.resolve(kinds::VRF, &Filter::new().eq("name", name))?;
        ctx.datastore.delete(kinds::VRF, vrf.id)?;
        ctx.cache.invalidate_object(vrf.id);
        Ok(())
    }
}

/// Interfaces of the in-scope devices.
struct InterfaceHandler {
    include_lags: bool,
}

impl InterfaceHandler {
    /// Datastore attributes for the given record fields; `lag` is turned
    /// into a reference to the parent interface.
    fn object_attrs(
        &self,
        ctx: &HandlerContext<'_>,
        device: ObjectId,
        record: &Record,
        fields: &[String],
    ) -> SyncResult<ObjectAttrs> {
        let mut attrs = ObjectAttrs::new();
        for name in fields {
            if name == "lag" {
                if !self.include_lags {
                    continue;
                }
                let parent = match record.attr_str("lag") {
                    Some(lag) => Value::String(interface_on(ctx.datastore, device, lag)?.id.to_string()),
                    None => Value::Null,
                };
                attrs.insert("lag".to_string(), parent);
            } else {
                attrs.insert(name.clone(), record.attr(name).cloned().unwrap_or(Value::Null));
            }
        }
        Ok(attrs)
    }
}

impl RecordHandler for InterfaceHandler {
    fn schema(&self) -> &'static RecordSchema {
        &INTERFACE
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::DEVICE]
    }

    fn apply_rank(&self, record: &Record) -> u8 {
        aggregation_rank(record)
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        scoped_interfaces(ctx)
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([
            ("device", referenced(ctx, object, "device", kinds::DEVICE, "name")?),
            ("name", object.attr("name")),
        ]))
    }

    fn extract_attributes(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        let mut fields = object.attrs.clone();
        let lag = if self.include_lags {
            referenced(ctx, object, "lag", kinds::INTERFACE, "name")?
        } else {
            Value::Null
        };
        fields.insert("lag".to_string(), lag);
        Ok(interface_attrs(&fields, true)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect())
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let device = device_by_name(ctx, record.id_value("device").unwrap_or_default())?;
        let names: Vec<String> = INTERFACE.attributes.iter().map(|s| s.to_string()).collect();
        let mut attrs = self.object_attrs(ctx, device.id, record, &names)?;
        attrs.insert("device".to_string(), Value::String(device.id.to_string()));
        attrs.insert(
            "name".to_string(),
            Value::from(record.id_value("name").unwrap_or_default()),
        );
        attrs.insert("mgmt_only".to_string(), Value::Bool(false));
        ctx.datastore.create(kinds::INTERFACE, attrs)?;
        debug!(interface = %record.key(), "Created interface");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, changed: &[String]) -> SyncResult<()> {
        let (device, interface) = interface_of(ctx, source)?;
        let attrs = self.object_attrs(ctx, device.id, source, changed)?;
        ctx.datastore.update(kinds::INTERFACE, interface.id, attrs)?;
        debug!(interface = %source.key(), changed = ?changed, "Updated interface");
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let (_, interface) = interface_of(ctx, target)?;
        ctx.datastore.delete(kinds::INTERFACE, interface.id)?;
        ctx.cache.invalidate_object(interface.id);
        info!(interface = %target.key(), "Deleted interface");
        Ok(())
    }
}

/// Addresses assigned to interfaces of the in-scope devices.
struct IpAddressHandler;

impl IpAddressHandler {
    fn upsert(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let host = record.id_value("host").unwrap_or_default();
        let mask_length = record.attr("mask_length").cloned().unwrap_or(Value::Null);
        let address = match mask_length.as_u64() {
            Some(len) => format!("{}/{}", host, len),
            None => host.to_string(),
        };
        let attrs = object_attrs! {"host" => host, "address" => address, "mask_length" => mask_length};
        match ctx
            .datastore
            .query(kinds::IP_ADDRESS, &Filter::new().eq("host", host))?
            .into_iter()
            .next()
        {
            Some(existing) => {
                ctx.datastore.update(kinds::IP_ADDRESS, existing.id, attrs)?;
                ctx.cache.invalidate_object(existing.id);
            }
            None => {
                ctx.datastore.create(kinds::IP_ADDRESS, attrs)?;
            }
        }
        Ok(())
    }

    /// True when the address is also assigned to an interface of a device
    /// outside the run's scope.
    fn assigned_outside_scope(ctx: &HandlerContext<'_>, ip: &StoredObject) -> SyncResult<bool> {
        for assignment in ctx
            .datastore
            .query(kinds::IP_ASSIGNMENT, &Filter::new().id("ip_address", ip.id))?
        {
            let Some(id) = assignment.ref_attr("interface") else {
                continue;
            };
            let interface = ctx.datastore.get(kinds::INTERFACE, id)?;
            let device = referenced(ctx, &interface, "device", kinds::DEVICE, "name")?;
            if !device.as_str().is_some_and(|name| ctx.scope.contains(name)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl RecordHandler for IpAddressHandler {
    fn schema(&self) -> &'static RecordSchema {
        &IP_ADDRESS
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        let mut ids = BTreeSet::new();
        for interface in scoped_interfaces(ctx)? {
            for assignment in ctx
                .datastore
                .query(kinds::IP_ASSIGNMENT, &Filter::new().id("interface", interface.id))?
            {
                ids.extend(assignment.ref_attr("ip_address"));
            }
        }
        ids.into_iter()
            .map(|id| ctx.datastore.get(kinds::IP_ADDRESS, id))
            .collect()
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("host", object.attr("host"))]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("mask_length", number(&object.attr("mask_length")))]))
    }

    /// Addresses shared with unpolled devices are never deleted; only the
    /// in-scope assignment goes.
    fn target_flags(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<RecordFlags> {
        if Self::assigned_outside_scope(ctx, object)? {
            Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
        } else {
            Ok(RecordFlags::NONE)
        }
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        Self::upsert(ctx, record)
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        Self::upsert(ctx, source)
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let host = target.id_value("host").unwrap_or_default();
        for ip in ctx
            .datastore
            .query(kinds::IP_ADDRESS, &Filter::new().eq("host", host))?
        {
            ctx.datastore.delete(kinds::IP_ADDRESS, ip.id)?;
            ctx.cache.invalidate_object(ip.id);
        }
        Ok(())
    }
}

/// Address-to-interface assignments on the in-scope devices.
struct IpAssignmentHandler;

impl RecordHandler for IpAssignmentHandler {
    fn schema(&self) -> &'static RecordSchema {
        &IP_ASSIGNMENT
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::INTERFACE, kinds::IP_ADDRESS]
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        let mut assignments = Vec::new();
        for interface in scoped_interfaces(ctx)? {
            assignments.extend(
                ctx.datastore
                    .query(kinds::IP_ASSIGNMENT, &Filter::new().id("interface", interface.id))?,
            );
        }
        Ok(assignments)
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        let (device, interface) = match object.ref_attr("interface") {
            Some(id) => {
                let interface = ctx.datastore.get(kinds::INTERFACE, id)?;
                (
                    referenced(ctx, &interface, "device", kinds::DEVICE, "name")?,
                    interface.attr("name"),
                )
            }
            None => (Value::Null, Value::Null),
        };
        Ok(values([
            ("device", device),
            ("interface", interface),
            ("host", referenced(ctx, object, "ip_address", kinds::IP_ADDRESS, "host")?),
        ]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<Attributes> {
        Ok(Attributes::new())
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let (_, interface) = interface_of(ctx, record)?;
        let host = record.id_value("host").unwrap_or_default();
        let ip = ctx
            .datastore
            .get_one(kinds::IP_ADDRESS, &Filter::new().eq("host", host))?;
        ctx.datastore.create(
            kinds::IP_ASSIGNMENT,
            object_attrs! {"ip_address" => ip.id.to_string(), "interface" => interface.id.to_string()},
        )?;
        debug!(assignment = %record.key(), "Assigned address");
        Ok(())
    }

    fn update(&self, _ctx: &HandlerContext<'_>, _source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        Ok(())
    }

    /// An assignment already removed by an interface or address delete
    /// earlier in the run counts as deleted.
    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let interface = match interface_of(ctx, target) {
            Ok((_, interface)) => interface,
            Err(SyncError::RelatedObjectNotFound { .. }) => {
                debug!(assignment = %target.key(), "Interface already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let host = target.id_value("host").unwrap_or_default();
        for ip in ctx
            .datastore
            .query(kinds::IP_ADDRESS, &Filter::new().eq("host", host))?
        {
            let filter = Filter::new()
                .id("ip_address", ip.id)
                .id("interface", interface.id);
            for assignment in ctx.datastore.query(kinds::IP_ASSIGNMENT, &filter)? {
                ctx.datastore.delete(kinds::IP_ASSIGNMENT, assignment.id)?;
            }
        }
        Ok(())
    }
}

/// Interface-to-X relations stored as attributes of the interface object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    UntaggedVlan,
    TaggedVlans,
    Vrf,
}

struct RelationHandler {
    relation: Relation,
}

impl RelationHandler {
    fn new(relation: Relation) -> Self {
        Self { relation }
    }

    /// Interface attribute holding the relation.
    fn field(&self) -> &'static str {
        match self.relation {
            Relation::UntaggedVlan => "untagged_vlan",
            Relation::TaggedVlans => "tagged_vlans",
            Relation::Vrf => "vrf",
        }
    }

    fn cleared(&self) -> Value {
        match self.relation {
            Relation::TaggedVlans => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Converts a record value into the stored reference(s).
    fn to_reference(&self, ctx: &HandlerContext<'_>, device: &StoredObject, value: Option<&Value>) -> SyncResult<Value> {
        let Some(value) = value else {
            return Ok(self.cleared());
        };
        match self.relation {
            Relation::UntaggedVlan => match value.as_u64() {
                Some(vid) => Ok(Value::String(vlan_at(ctx, device, vid)?.to_string())),
                None => Ok(Value::Null),
            },
            Relation::TaggedVlans => {
                let mut ids = Vec::new();
                for vid in vlan_ids(value) {
                    ids.push(Value::String(vlan_at(ctx, device, vid)?.to_string()));
                }
                Ok(Value::Array(ids))
            }
            Relation::Vrf => match value.as_str() {
                Some(name) => Ok(Value::String(
                    ctx.resolve(kinds::VRF, &Filter::new().eq("name", name))?
                        .id
                        .to_string(),
                )),
                None => Ok(Value::Null),
            },
        }
    }

    /// Converts the stored reference(s) back into the record value.
    fn from_reference(&self, ctx: &HandlerContext<'_>, interface: &StoredObject) -> SyncResult<Value> {
        match self.relation {
            Relation::UntaggedVlan => {
                Ok(number(&referenced(ctx, interface, "untagged_vlan", kinds::VLAN, "vid")?))
            }
            Relation::TaggedVlans => {
                let mut vids = BTreeSet::new();
                for id in interface.attr("tagged_vlans").as_array().into_iter().flatten() {
                    let Some(id) = id.as_str().and_then(|s| s.parse::<ObjectId>().ok()) else {
                        continue;
                    };
                    if let Some(vid) = number(&ctx.datastore.get(kinds::VLAN, id)?.attr("vid")).as_u64() {
                        vids.insert(vid);
                    }
                }
                Ok(if vids.is_empty() {
                    Value::Null
                } else {
                    Value::from(vids.into_iter().collect::<Vec<u64>>())
                })
            }
            Relation::Vrf => referenced(ctx, interface, "vrf", kinds::VRF, "name"),
        }
    }

    fn assign(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let (device, interface) = interface_of(ctx, record)?;
        let reference = self.to_reference(ctx, &device, record.attr(self.field()))?;
        let mut attrs = ObjectAttrs::new();
        attrs.insert(self.field().to_string(), reference);
        ctx.datastore.update(kinds::INTERFACE, interface.id, attrs)?;
        debug!(relation = self.schema().kind, interface = %record.key(), "Relation assigned");
        Ok(())
    }
}

impl RecordHandler for RelationHandler {
    fn schema(&self) -> &'static RecordSchema {
        match self.relation {
            Relation::UntaggedVlan => &UNTAGGED,
            Relation::TaggedVlans => &TAGGED,
            Relation::Vrf => &VRF_MEMBER,
        }
    }

    fn depends_on(&self) -> &'static [&'static str] {
        match self.relation {
            Relation::UntaggedVlan | Relation::TaggedVlans => &[kinds::INTERFACE, kinds::VLAN],
            Relation::Vrf => &[kinds::INTERFACE, kinds::VRF],
        }
    }

    /// Only interfaces that currently hold the relation.
    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        let field = self.field();
        Ok(scoped_interfaces(ctx)?
            .into_iter()
            .filter(|interface| match interface.attrs.get(field) {
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            })
            .collect())
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([
            ("device", referenced(ctx, object, "device", kinds::DEVICE, "name")?),
            ("name", object.attr("name")),
        ]))
    }

    fn extract_attributes(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([(self.field(), self.from_reference(ctx, object)?)]))
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        self.assign(ctx, record)
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        self.assign(ctx, source)
    }

    /// Clears the relation; a deleted interface has nothing left to clear.
    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let interface = match interface_of(ctx, target) {
            Ok((_, interface)) => interface,
            Err(SyncError::RelatedObjectNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut attrs = ObjectAttrs::new();
        attrs.insert(self.field().to_string(), self.cleared());
        ctx.datastore.update(kinds::INTERFACE, interface.id, attrs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::SyncConfig;
    use crate::datastore::MemoryDatastore;
    use netsync_core::{Datastore, IdentifierCache, TargetScope};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn seeded() -> MemoryDatastore {
        let store = MemoryDatastore::new();
        let location = store
            .create(kinds::LOCATION, object_attrs! {"name" => "dc1"})
            .unwrap();
        store
            .create(
                kinds::DEVICE,
                object_attrs! {"name" => "leaf1", "serial" => "SN1", "location" => location.id.to_string()},
            )
            .unwrap();
        store
    }

    fn canonical() -> CanonicalRecord {
        let mut record = CanonicalRecord::new("10.0.0.1", "arista_eos", "sync_network_data");
        record.fields.insert("serial".into(), json!("SN1"));
        record.fields.insert("software_version".into(), json!("4.30.1F"));
        record.fields.insert("vlans".into(), json!({"10": {"name": "DATA"}, "bogus": {"name": "x"}}));
        record.fields.insert("vrfs".into(), json!({"blue": {"rd": "65000:1"}}));
        record.fields.insert(
            "interfaces".into(),
            json!({
                "Ethernet1": {
                    "type": "1000base-t", "enabled": true, "mtu": 9214, "description": "",
                    "mac_address": "00:1C:73:00:00:01", "mode": "tagged", "lag": "Port-Channel1",
                    "untagged_vlan": null, "tagged_vlans": [20, 10, 10], "vrf": "",
                    "ip_addresses": []
                },
                "Vlan10": {
                    "type": "virtual", "enabled": "True", "mtu": "1500", "mode": null, "lag": "",
                    "vrf": "blue", "ip_addresses": ["10.1.0.1/24", "10.1.0.1/24", "bad"]
                }
            }),
        );
        record
    }

    fn job(sync: SyncConfig) -> SyncNetworkData {
        SyncNetworkData::new(JobParams::new(sync).with_sync_date("2024-05-01"))
    }

    #[test]
    fn test_type_order_follows_toggles() {
        let all = job(SyncConfig::default());
        assert_eq!(all.type_order().len(), 10);
        all.registry().type_order(&all.type_order()).unwrap();

        let sync = SyncConfig {
            include_vlans: false,
            include_software_version: false,
            ..SyncConfig::default()
        };
        let reduced = job(sync);
        assert_eq!(
            reduced.type_order(),
            vec![
                "device",
                "vrf",
                "interface",
                "ip_address",
                "ip_address_to_interface",
                "vrf_to_interface"
            ]
        );
        reduced.registry().type_order(&reduced.type_order()).unwrap();
    }

    #[test]
    fn test_device_found_by_serial() {
        let store = seeded();
        let cache = IdentifierCache::new();
        let scope = TargetScope::default();
        let ctx = HandlerContext::new(&store, &cache, &scope);
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let job = job(SyncConfig::default());

        assert_eq!(job.device_name(&ctx, &host, &canonical()).unwrap(), "leaf1");

        let mut unknown = canonical();
        unknown.fields.insert("serial".into(), json!("SN9"));
        let err = job.device_name(&ctx, &host, &unknown).unwrap_err();
        assert!(matches!(err, SyncError::RelatedObjectNotFound { .. }));
    }

    #[test]
    fn test_source_records() {
        let store = seeded();
        let cache = IdentifierCache::new();
        let scope = TargetScope::default();
        let ctx = HandlerContext::new(&store, &cache, &scope);
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let records = job(SyncConfig::default())
            .source_records(&ctx, &host, &canonical(), "leaf1")
            .unwrap();

        let keys: Vec<String> = records
            .iter()
            .map(|r| format!("{}:{}", r.kind(), r.key()))
            .collect();
        assert_eq!(
            keys,
            vec![
                "device:leaf1__SN1",
                "software_version:leaf1",
                "vlan:dc1__10",
                "vrf:blue",
                "interface:leaf1__Ethernet1",
                "tagged_vlans_to_interface:leaf1__Ethernet1",
                "interface:leaf1__Vlan10",
                "ip_address:10.1.0.1",
                "ip_address_to_interface:leaf1__Vlan10__10.1.0.1",
                "vrf_to_interface:leaf1__Vlan10",
            ]
        );

        let ethernet = &records[4];
        assert_eq!(ethernet.attr("mtu"), Some(&json!(9214)));
        assert_eq!(ethernet.attr("description"), None);
        assert_eq!(ethernet.attr_str("lag"), Some("Port-Channel1"));
        assert_eq!(records[5].attr("tagged_vlans"), Some(&json!([10, 20])));

        let svi = &records[6];
        assert_eq!(svi.attr("enabled"), Some(&json!(true)));
        assert_eq!(svi.attr("mtu"), Some(&json!(1500)));
        assert_eq!(svi.attr("lag"), None);
        assert_eq!(records[7].attr("mask_length"), Some(&json!(24)));
    }

    #[test]
    fn test_lags_stripped_when_disabled() {
        let store = seeded();
        let cache = IdentifierCache::new();
        let scope = TargetScope::default();
        let ctx = HandlerContext::new(&store, &cache, &scope);
        let host = HostTarget::new("10.0.0.1", "arista_eos");
        let sync = SyncConfig {
            include_lags: false,
            include_vlans: false,
            ..SyncConfig::default()
        };
        let records = job(sync)
            .source_records(&ctx, &host, &canonical(), "leaf1")
            .unwrap();
        let ethernet = records
            .iter()
            .find(|r| r.kind() == "interface" && r.id_value("name") == Some("Ethernet1"))
            .unwrap();
        assert_eq!(ethernet.attr("lag"), None);
        assert!(records.iter().all(|r| r.kind() != "vlan" && r.kind() != TAGGED_VLANS));
    }

    #[test]
    fn test_vlan_ids() {
        assert_eq!(vlan_ids(&json!([30, "10", 10])), vec![10, 30]);
        assert_eq!(vlan_ids(&json!("all")), Vec::<u64>::new());
    }
}
