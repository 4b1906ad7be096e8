//! Test fixtures for netsync runs
//!
//! Device facts are rendered as the structured command outputs of a small
//! test platform whose mapping table reads them back with plain path
//! queries. This keeps end-to-end scenarios about reconciliation rather
//! than about vendor output parsing.

use netsync_core::{object_attrs, Datastore, StoredObject};
use netsync_extract::{ExtractResult, HostOutputs, MappingTable, PlatformMapping, RawOutput};
use netsync_syncd::{
    kinds, Dispatcher, HostTarget, JobParams, JobRunner, MemoryDatastore, SyncConfig,
    SyncNetworkData,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::executor::ScriptedExecutor;

/// Platform key of the test mapping table.
pub const FIXTURE_PLATFORM: &str = "fixture_os";

/// Location every fixture device is onboarded into.
pub const FIXTURE_LOCATION: &str = "dc1";

/// Date stamped on synced devices in tests.
pub const SYNC_DATE: &str = "2024-05-01";

const FIXTURE_MAPPING: &str = r#"
sync_devices:
  hostname:
    - command: show hostname
      query: hostname
      validator: not_empty
  serial:
    - command: show version
      query: serialNumber
      validator: not_empty
    - command: show inventory
      query: systemInformation.serialNum
      result_shape: str
  model:
    - command: show version
      query: modelName
      result_shape: str
  manufacturer:
    - command: show version
      query: vendor
      result_shape: str
  mgmt_interface:
    - command: show management
      query: name
      result_shape: str
  mgmt_address:
    - command: show management
      query: address
      result_shape: str

sync_network_data:
  hostname:
    - command: show hostname
      query: hostname
  serial:
    - command: show version
      query: serialNumber
      validator: not_empty
    - command: show inventory
      query: systemInformation.serialNum
      result_shape: str
  software_version:
    - command: show version
      query: version
      result_shape: str
  vlans:
    universe:
      - command: show vlan
        query: keys(vlans)
    fields:
      name:
        - command: show vlan
          query: 'vlans."{{ current_key }}".name'
          result_shape: str
  vrfs:
    universe:
      - command: show vrf
        query: keys(vrfs)
    fields:
      rd:
        - command: show vrf
          query: 'vrfs."{{ current_key }}".rd'
          result_shape: str
  interfaces:
    universe:
      - command: show interfaces
        query: keys(interfaces)
    fields:
      type:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".type'
      enabled:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".enabled'
      mtu:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".mtu'
      description:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".description'
          result_shape: str
      mac_address:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".mac_address'
      mode:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".mode'
      untagged_vlan:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".untagged_vlan'
      tagged_vlans:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".tagged_vlans'
          result_shape: list
      lag:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".lag'
      vrf:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".vrf'
      ip_addresses:
        - command: show interfaces
          query: 'interfaces."{{ current_key }}".ip_addresses'
          result_shape: list
"#;

/// Built-in mapping tables plus the test platform.
pub fn mapping_table() -> ExtractResult<MappingTable> {
    let mut table = MappingTable::builtin()?;
    table.insert(PlatformMapping::from_yaml(
        FIXTURE_PLATFORM,
        "fixtures",
        FIXTURE_MAPPING,
    )?);
    Ok(table)
}

/// Facts of one fixture device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFacts {
    pub hostname: String,
    pub serial: String,
    pub model: String,
    pub vendor: String,
    pub version: String,
    pub mgmt_interface: String,
    pub mgmt_address: String,
    pub vlans: BTreeMap<u16, String>,
    pub vrfs: BTreeMap<String, String>,
    pub interfaces: BTreeMap<String, Value>,
}

impl DeviceFacts {
    /// A leaf switch with a management port, a LAG with one member, an
    /// access port and an SVI in VRF `blue`.
    ///
    /// `index` picks the management address `10.0.0.<index>/24`.
    pub fn leaf(hostname: &str, serial: &str, index: u8) -> Self {
        let mgmt_address = format!("10.0.0.{}/24", index);
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "Management1".to_string(),
            interface("1000base-t", None)
                .with_ip(&mgmt_address)
                .into_value(),
        );
        interfaces.insert(
            "Port-Channel1".to_string(),
            interface("lag", None).with("mode", json!("tagged")).with("tagged_vlans", json!([10, 20])).into_value(),
        );
        interfaces.insert(
            "Ethernet1".to_string(),
            interface("1000base-t", Some("Port-Channel1"))
                .with("description", json!("uplink"))
                .into_value(),
        );
        interfaces.insert(
            "Ethernet2".to_string(),
            interface("1000base-t", None)
                .with("mode", json!("access"))
                .with("untagged_vlan", json!(10))
                .into_value(),
        );
        interfaces.insert(
            "Vlan10".to_string(),
            interface("virtual", None)
                .with("vrf", json!("blue"))
                .with_ip(&format!("10.1.{}.1/24", index))
                .into_value(),
        );

        Self {
            hostname: hostname.to_string(),
            serial: serial.to_string(),
            model: "DCS-7050SX3".to_string(),
            vendor: "Arista".to_string(),
            version: "4.30.1F".to_string(),
            mgmt_interface: "Management1".to_string(),
            mgmt_address,
            vlans: BTreeMap::from([(10, "DATA".to_string()), (20, "VOICE".to_string())]),
            vrfs: BTreeMap::from([("blue".to_string(), "65000:1".to_string())]),
            interfaces,
        }
    }

    /// Renames an interface, keeping its data.
    pub fn rename_interface(mut self, from: &str, to: &str) -> Self {
        if let Some(data) = self.interfaces.remove(from) {
            self.interfaces.insert(to.to_string(), data);
        }
        if self.mgmt_interface == from {
            self.mgmt_interface = to.to_string();
        }
        self
    }

    /// Removes an interface.
    pub fn without_interface(mut self, name: &str) -> Self {
        self.interfaces.remove(name);
        self
    }

    /// Sets one field of an interface.
    pub fn with_interface_field(mut self, name: &str, field: &str, value: Value) -> Self {
        if let Some(Value::Object(data)) = self.interfaces.get_mut(name) {
            data.insert(field.to_string(), value);
        }
        self
    }

    pub fn host(&self) -> HostTarget {
        HostTarget::new(self.address(), FIXTURE_PLATFORM).with_location(FIXTURE_LOCATION)
    }

    /// Address the device is polled at: its management address.
    pub fn address(&self) -> String {
        self.mgmt_address
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Renders the facts as the test platform's command outputs.
    pub fn outputs(&self) -> HostOutputs {
        let vlans: Map<String, Value> = self
            .vlans
            .iter()
            .map(|(vid, name)| (vid.to_string(), json!({ "name": name })))
            .collect();
        let vrfs: Map<String, Value> = self
            .vrfs
            .iter()
            .map(|(name, rd)| (name.clone(), json!({ "rd": rd })))
            .collect();
        let interfaces: Map<String, Value> = self
            .interfaces
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();

        let mut outputs = HostOutputs::new();
        outputs.insert(
            "show hostname".into(),
            RawOutput::Structured(json!({ "hostname": self.hostname })),
        );
        outputs.insert(
            "show version".into(),
            RawOutput::Structured(json!({
                "serialNumber": self.serial,
                "modelName": self.model,
                "vendor": self.vendor,
                "version": self.version,
            })),
        );
        outputs.insert(
            "show management".into(),
            RawOutput::Structured(json!({
                "name": self.mgmt_interface,
                "address": self.mgmt_address,
            })),
        );
        outputs.insert("show vlan".into(), RawOutput::Structured(json!({ "vlans": vlans })));
        outputs.insert("show vrf".into(), RawOutput::Structured(json!({ "vrfs": vrfs })));
        outputs.insert(
            "show interfaces".into(),
            RawOutput::text(json!({ "interfaces": interfaces }).to_string()),
        );
        outputs
    }
}

struct InterfaceFacts(Map<String, Value>);

fn interface(kind: &str, lag: Option<&str>) -> InterfaceFacts {
    let mut data = Map::new();
    data.insert("type".into(), json!(kind));
    data.insert("enabled".into(), json!(true));
    data.insert("mtu".into(), json!(1500));
    data.insert("description".into(), json!(""));
    data.insert("mac_address".into(), Value::Null);
    data.insert("mode".into(), Value::Null);
    data.insert("untagged_vlan".into(), Value::Null);
    data.insert("tagged_vlans".into(), json!([]));
    data.insert("lag".into(), json!(lag.unwrap_or_default()));
    data.insert("vrf".into(), json!(""));
    data.insert("ip_addresses".into(), json!([]));
    InterfaceFacts(data)
}

impl InterfaceFacts {
    fn with(mut self, field: &str, value: Value) -> Self {
        self.0.insert(field.to_string(), value);
        self
    }

    fn with_ip(mut self, address: &str) -> Self {
        if let Some(Value::Array(ips)) = self.0.get_mut("ip_addresses") {
            ips.push(json!(address));
        }
        self
    }

    fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Scripted devices wired to an in-memory datastore.
pub struct TestBed {
    pub datastore: Arc<MemoryDatastore>,
    pub executor: Arc<ScriptedExecutor>,
    pub location: StoredObject,
    pub mappings: MappingTable,
}

impl TestBed {
    /// A datastore holding only the fixture location.
    ///
    /// # Panics
    ///
    /// If the mapping tables do not compile or the location cannot be
    /// seeded.
    pub fn new() -> Self {
        let mappings = mapping_table().expect("mapping tables must compile");
        let datastore = Arc::new(MemoryDatastore::new());
        let location = datastore
            .create(kinds::LOCATION, object_attrs! {"name" => FIXTURE_LOCATION})
            .expect("seeding the location must succeed");
        Self {
            datastore,
            executor: Arc::new(ScriptedExecutor::new()),
            location,
            mappings,
        }
    }

    /// Scripts the device's outputs and returns its inventory entry.
    pub fn script(&self, facts: &DeviceFacts) -> HostTarget {
        self.executor.set_outputs(&facts.address(), facts.outputs());
        facts.host()
    }

    /// A runner over the scripted devices.
    pub fn runner(&self, sync: SyncConfig) -> JobRunner {
        JobRunner::new(
            self.mappings.clone(),
            Dispatcher::new(self.executor.clone(), 4),
            self.datastore.clone(),
            sync,
        )
    }

    /// The network data job with a fixed sync date.
    pub fn network_data_job(sync: SyncConfig) -> SyncNetworkData {
        SyncNetworkData::new(JobParams::new(sync).with_sync_date(SYNC_DATE))
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}
