//! Device onboarding job.
//!
//! Syncs the identity chain `manufacturer -> platform -> device_type ->
//! device`. A newly created device also gets its management interface and
//! primary address. Shared catalogue objects and devices that were not
//! polled in this run are never deleted.

use netsync_core::{
    object_attrs, Attributes, Filter, HandlerContext, HandlerRegistry, ObjectId, Record,
    RecordFlags, RecordHandler, RecordSchema, StoredObject, SyncError, SyncResult,
};
use netsync_extract::CanonicalRecord;
use netsync_types::{InterfaceType, IpInterface};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{device_by_name, interface_on, referenced, scoped_devices, text, values, SyncJob};
use crate::command::HostTarget;
use crate::datastore::kinds;

static MANUFACTURER: RecordSchema = RecordSchema::new(kinds::MANUFACTURER, &["name"], &[]);
static PLATFORM: RecordSchema = RecordSchema::new(kinds::PLATFORM, &["name"], &["manufacturer"]);
static DEVICE_TYPE: RecordSchema =
    RecordSchema::new(kinds::DEVICE_TYPE, &["model", "manufacturer"], &[]);
static DEVICE: RecordSchema = RecordSchema::new(
    kinds::DEVICE,
    &["location", "name", "serial"],
    &["device_type", "manufacturer", "platform", "mgmt_interface", "primary_ip4"],
);

/// The onboarding job.
#[derive(Debug, Clone, Default)]
pub struct SyncDevices;

impl SyncDevices {
    pub fn new() -> Self {
        Self
    }
}

impl SyncJob for SyncDevices {
    fn name(&self) -> &'static str {
        "sync_devices"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["hostname", "serial"]
    }

    fn registry(&self) -> HandlerRegistry {
        HandlerRegistry::new()
            .with(ManufacturerHandler)
            .with(PlatformHandler)
            .with(DeviceTypeHandler)
            .with(DeviceHandler)
    }

    fn type_order(&self) -> Vec<&'static str> {
        vec![
            kinds::MANUFACTURER,
            kinds::PLATFORM,
            kinds::DEVICE_TYPE,
            kinds::DEVICE,
        ]
    }

    fn device_name(
        &self,
        _ctx: &HandlerContext<'_>,
        _host: &HostTarget,
        record: &CanonicalRecord,
    ) -> SyncResult<String> {
        record
            .str_field("hostname")
            .map(str::to_string)
            .ok_or_else(|| SyncError::invalid_config("hostname", "empty after extraction"))
    }

    fn source_records(
        &self,
        _ctx: &HandlerContext<'_>,
        host: &HostTarget,
        record: &CanonicalRecord,
        device: &str,
    ) -> SyncResult<Vec<Record>> {
        let location = host
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| {
                SyncError::invalid_config("location", format!("no location for host {}", host.address))
            })?;
        let manufacturer = text(record.field("manufacturer"));
        let model = text(record.field("model"));
        let mgmt_address = management_address(record, &host.address);
        let mgmt_interface = if mgmt_address.is_null() {
            Value::Null
        } else {
            text(record.field("mgmt_interface"))
        };

        let mut records = Vec::with_capacity(4);
        if !manufacturer.is_null() {
            records.push(MANUFACTURER.build(&values([("name", manufacturer.clone())]))?);
            if !model.is_null() {
                records.push(DEVICE_TYPE.build(&values([
                    ("model", model.clone()),
                    ("manufacturer", manufacturer.clone()),
                ]))?);
            }
        }
        records.push(PLATFORM.build(&values([
            ("name", Value::from(host.platform.as_str())),
            ("manufacturer", manufacturer.clone()),
        ]))?);
        records.push(DEVICE.build(&values([
            ("location", Value::from(location)),
            ("name", Value::from(device)),
            ("serial", text(record.field("serial"))),
            ("device_type", model),
            ("manufacturer", manufacturer),
            ("platform", Value::from(host.platform.as_str())),
            ("mgmt_interface", mgmt_interface),
            ("primary_ip4", mgmt_address),
        ]))?);
        Ok(records)
    }
}

/// Returns the extracted management address in `address/len` form, `null`
/// when it is missing or unparseable.
fn management_address(record: &CanonicalRecord, host: &str) -> Value {
    let Some(raw) = record.str_field("mgmt_address") else {
        return Value::Null;
    };
    match raw.parse::<IpInterface>() {
        Ok(address) => Value::String(address.to_string()),
        Err(e) => {
            warn!(host = %host, address = %raw, error = %e, "Ignoring invalid management address");
            Value::Null
        }
    }
}

struct ManufacturerHandler;

impl RecordHandler for ManufacturerHandler {
    fn schema(&self) -> &'static RecordSchema {
        &MANUFACTURER
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        ctx.datastore.query(kinds::MANUFACTURER, &Filter::new())
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("name", object.attr("name"))]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<Attributes> {
        Ok(Attributes::new())
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let name = record.id_value("name").unwrap_or_default();
        let created = ctx
            .datastore
            .create(kinds::MANUFACTURER, object_attrs! {"name" => name})?;
        ctx.cache
            .insert(kinds::MANUFACTURER, Filter::new().eq("name", name), created);
        info!(manufacturer = %name, "Created manufacturer");
        Ok(())
    }

    fn update(&self, _ctx: &HandlerContext<'_>, _source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let name = target.id_value("name").unwrap_or_default();
        let object = ctx.resolve(kinds::MANUFACTURER, &Filter::new().eq("name", name))?;
        ctx.datastore.delete(kinds::MANUFACTURER, object.id)?;
        ctx.cache.invalidate_object(object.id);
        Ok(())
    }
}

struct PlatformHandler;

impl PlatformHandler {
    fn manufacturer_ref(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<Value> {
        match record.attr_str("manufacturer") {
            Some(name) => {
                let manufacturer =
                    ctx.resolve(kinds::MANUFACTURER, &Filter::new().eq("name", name))?;
                Ok(Value::String(manufacturer.id.to_string()))
            }
            None => Ok(Value::Null),
        }
    }
}

impl RecordHandler for PlatformHandler {
    fn schema(&self) -> &'static RecordSchema {
        &PLATFORM
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::MANUFACTURER]
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        ctx.datastore.query(kinds::PLATFORM, &Filter::new())
    }

    fn identify(&self, _ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([("name", object.attr("name"))]))
    }

    fn extract_attributes(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([(
            "manufacturer",
            referenced(ctx, object, "manufacturer", kinds::MANUFACTURER, "name")?,
        )]))
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let name = record.id_value("name").unwrap_or_default();
        let manufacturer = Self::manufacturer_ref(ctx, record)?;
        let created = ctx.datastore.create(
            kinds::PLATFORM,
            object_attrs! {"name" => name, "manufacturer" => manufacturer},
        )?;
        ctx.cache
            .insert(kinds::PLATFORM, Filter::new().eq("name", name), created);
        info!(platform = %name, "Created platform");
        Ok(())
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        let name = source.id_value("name").unwrap_or_default();
        let platform = ctx.resolve(kinds::PLATFORM, &Filter::new().eq("name", name))?;
        let manufacturer = Self::manufacturer_ref(ctx, source)?;
        ctx.datastore.update(
            kinds::PLATFORM,
            platform.id,
            object_attrs! {"manufacturer" => manufacturer},
        )?;
        ctx.cache.invalidate_object(platform.id);
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let name = target.id_value("name").unwrap_or_default();
        let platform = ctx.resolve(kinds::PLATFORM, &Filter::new().eq("name", name))?;
        ctx.datastore.delete(kinds::PLATFORM, platform.id)?;
        ctx.cache.invalidate_object(platform.id);
        Ok(())
    }
}

struct DeviceTypeHandler;

fn device_type_filter(ctx: &HandlerContext<'_>, model: &str, manufacturer: &str) -> SyncResult<Filter> {
    let manufacturer = ctx.resolve(kinds::MANUFACTURER, &Filter::new().eq("name", manufacturer))?;
    Ok(Filter::new()
        .eq("model", model)
        .id("manufacturer", manufacturer.id))
}

impl RecordHandler for DeviceTypeHandler {
    fn schema(&self) -> &'static RecordSchema {
        &DEVICE_TYPE
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::MANUFACTURER]
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        ctx.datastore.query(kinds::DEVICE_TYPE, &Filter::new())
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([
            ("model", object.attr("model")),
            (
                "manufacturer",
                referenced(ctx, object, "manufacturer", kinds::MANUFACTURER, "name")?,
            ),
        ]))
    }

    fn extract_attributes(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<Attributes> {
        Ok(Attributes::new())
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let model = record.id_value("model").unwrap_or_default();
        let manufacturer = record.id_value("manufacturer").unwrap_or_default();
        let filter = device_type_filter(ctx, model, manufacturer)?;
        let mut attrs = object_attrs! {"model" => model};
        for (field, value) in filter.pairs() {
            attrs.insert(field.to_string(), Value::from(value));
        }
        let created = ctx.datastore.create(kinds::DEVICE_TYPE, attrs)?;
        ctx.cache.insert(kinds::DEVICE_TYPE, filter, created);
        info!(model = %model, manufacturer = %manufacturer, "Created device type");
        Ok(())
    }

    fn update(&self, _ctx: &HandlerContext<'_>, _source: &Record, _target: &Record, _changed: &[String]) -> SyncResult<()> {
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let filter = device_type_filter(
            ctx,
            target.id_value("model").unwrap_or_default(),
            target.id_value("manufacturer").unwrap_or_default(),
        )?;
        let device_type = ctx.resolve(kinds::DEVICE_TYPE, &filter)?;
        ctx.datastore.delete(kinds::DEVICE_TYPE, device_type.id)?;
        ctx.cache.invalidate_object(device_type.id);
        Ok(())
    }
}

struct DeviceHandler;

impl DeviceHandler {
    /// Resolves the device type and platform references of a source record.
    fn references(ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<(Value, Value)> {
        let device_type = match (record.attr_str("device_type"), record.attr_str("manufacturer")) {
            (Some(model), Some(manufacturer)) => {
                let filter = device_type_filter(ctx, model, manufacturer)?;
                Value::String(ctx.resolve(kinds::DEVICE_TYPE, &filter)?.id.to_string())
            }
            _ => Value::Null,
        };
        let platform = match record.attr_str("platform") {
            Some(name) => Value::String(
                ctx.resolve(kinds::PLATFORM, &Filter::new().eq("name", name))?
                    .id
                    .to_string(),
            ),
            None => Value::Null,
        };
        Ok((device_type, platform))
    }

    /// Makes `address` the device's primary address, hosted on the named
    /// management interface. Missing objects are created.
    #[instrument(skip(ctx))]
    fn ensure_management(
        ctx: &HandlerContext<'_>,
        device: ObjectId,
        interface: &str,
        address: &str,
    ) -> SyncResult<()> {
        let parsed: IpInterface = address
            .parse()
            .map_err(|e| SyncError::datastore("create", format!("invalid address {}: {}", address, e)))?;
        let host = parsed.address().to_string();

        let interface = match interface_on(ctx.datastore, device, interface) {
            Ok(existing) => existing,
            Err(SyncError::RelatedObjectNotFound { .. }) => ctx.datastore.create(
                kinds::INTERFACE,
                object_attrs! {
                    "device" => device.to_string(),
                    "name" => interface,
                    "type" => InterfaceType::classify(interface, "").as_str(),
                    "enabled" => true,
                    "mgmt_only" => true,
                },
            )?,
            Err(e) => return Err(e),
        };

        let ip_attrs = object_attrs! {
            "host" => host,
            "address" => parsed.to_string(),
            "mask_length" => parsed.prefix_len(),
        };
        let existing = ctx
            .datastore
            .query(kinds::IP_ADDRESS, &Filter::new().eq("host", &host))?;
        let ip = match existing.into_iter().next() {
            Some(ip) => ctx.datastore.update(kinds::IP_ADDRESS, ip.id, ip_attrs)?,
            None => ctx.datastore.create(kinds::IP_ADDRESS, ip_attrs)?,
        };

        let assignment = Filter::new()
            .id("ip_address", ip.id)
            .id("interface", interface.id);
        if ctx.datastore.query(kinds::IP_ASSIGNMENT, &assignment)?.is_empty() {
            ctx.datastore.create(
                kinds::IP_ASSIGNMENT,
                object_attrs! {
                    "ip_address" => ip.id.to_string(),
                    "interface" => interface.id.to_string(),
                },
            )?;
        }

        ctx.datastore.update(
            kinds::DEVICE,
            device,
            object_attrs! {"primary_ip4" => ip.id.to_string()},
        )?;
        ctx.cache.invalidate_object(device);
        debug!(device = %device, address = %parsed, "Primary address assigned");
        Ok(())
    }

    fn apply_management(ctx: &HandlerContext<'_>, device: ObjectId, record: &Record) -> SyncResult<()> {
        match (record.attr_str("mgmt_interface"), record.attr_str("primary_ip4")) {
            (Some(interface), Some(address)) => Self::ensure_management(ctx, device, interface, address),
            (None, Some(address)) => {
                warn!(device = %record.key(), address = %address, "No management interface extracted, primary address not set");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl RecordHandler for DeviceHandler {
    fn schema(&self) -> &'static RecordSchema {
        &DEVICE
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[kinds::DEVICE_TYPE, kinds::PLATFORM]
    }

    fn target_objects(&self, ctx: &HandlerContext<'_>) -> SyncResult<Vec<StoredObject>> {
        scoped_devices(ctx)
    }

    fn identify(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        Ok(values([
            ("location", referenced(ctx, object, "location", kinds::LOCATION, "name")?),
            ("name", object.attr("name")),
            ("serial", object.attr("serial")),
        ]))
    }

    fn extract_attributes(&self, ctx: &HandlerContext<'_>, object: &StoredObject) -> SyncResult<Attributes> {
        let (device_type, manufacturer) = match object.ref_attr("device_type") {
            Some(id) => {
                let device_type = ctx.datastore.get(kinds::DEVICE_TYPE, id)?;
                let manufacturer =
                    referenced(ctx, &device_type, "manufacturer", kinds::MANUFACTURER, "name")?;
                (device_type.attr("model"), manufacturer)
            }
            None => (Value::Null, Value::Null),
        };

        let (mgmt_interface, primary_ip4) = match object.ref_attr("primary_ip4") {
            Some(ip) => {
                let address = ctx.datastore.get(kinds::IP_ADDRESS, ip)?.attr("address");
                let mut hosting = Value::Null;
                for assignment in ctx
                    .datastore
                    .query(kinds::IP_ASSIGNMENT, &Filter::new().id("ip_address", ip))?
                {
                    let Some(interface) = assignment.ref_attr("interface") else {
                        continue;
                    };
                    let interface = ctx.datastore.get(kinds::INTERFACE, interface)?;
                    if interface.ref_attr("device") == Some(object.id) {
                        hosting = interface.attr("name");
                        break;
                    }
                }
                (hosting, address)
            }
            None => (Value::Null, Value::Null),
        };

        Ok(values([
            ("device_type", device_type),
            ("manufacturer", manufacturer),
            ("platform", referenced(ctx, object, "platform", kinds::PLATFORM, "name")?),
            ("mgmt_interface", mgmt_interface),
            ("primary_ip4", primary_ip4),
        ]))
    }

    fn target_flags(&self, _ctx: &HandlerContext<'_>, _object: &StoredObject) -> SyncResult<RecordFlags> {
        Ok(RecordFlags::SKIP_UNMATCHED_DESTINATION)
    }

    fn create(&self, ctx: &HandlerContext<'_>, record: &Record) -> SyncResult<()> {
        let name = record.id_value("name").unwrap_or_default();
        let location_name = record.id_value("location").unwrap_or_default();
        let location = ctx.resolve(kinds::LOCATION, &Filter::new().eq("name", location_name))?;
        let (device_type, platform) = Self::references(ctx, record)?;

        let device = ctx.datastore.create(
            kinds::DEVICE,
            object_attrs! {
                "name" => name,
                "serial" => record.id_value("serial").unwrap_or_default(),
                "location" => location.id.to_string(),
                "device_type" => device_type,
                "platform" => platform,
                "status" => "active",
                "primary_ip4" => Value::Null,
            },
        )?;
        info!(device = %name, location = %location_name, "Created device");
        Self::apply_management(ctx, device.id, record)
    }

    fn update(&self, ctx: &HandlerContext<'_>, source: &Record, _target: &Record, changed: &[String]) -> SyncResult<()> {
        let name = source.id_value("name").unwrap_or_default();
        let device = device_by_name(ctx, name)?;

        let touches = |fields: &[&str]| changed.iter().any(|c| fields.contains(&c.as_str()));
        if touches(&["device_type", "manufacturer", "platform"]) {
            let (device_type, platform) = Self::references(ctx, source)?;
            ctx.datastore.update(
                kinds::DEVICE,
                device.id,
                object_attrs! {"device_type" => device_type, "platform" => platform},
            )?;
            ctx.cache.invalidate_object(device.id);
        }
        if touches(&["mgmt_interface", "primary_ip4"]) {
            Self::apply_management(ctx, device.id, source)?;
        }
        debug!(device = %name, changed = ?changed, "Updated device");
        Ok(())
    }

    fn delete(&self, ctx: &HandlerContext<'_>, target: &Record) -> SyncResult<()> {
        let name = target.id_value("name").unwrap_or_default();
        let device = device_by_name(ctx, name)?;
        ctx.datastore.delete(kinds::DEVICE, device.id)?;
        ctx.cache.invalidate_object(device.id);
        Ok(())
    }
}
