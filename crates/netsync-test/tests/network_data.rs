//! End-to-end network data runs against scripted, onboarded devices.

use netsync_core::{object_attrs, Datastore, Filter};
use netsync_syncd::{kinds, HostTarget, SyncConfig, SyncDevices};
use netsync_test::fixtures::SYNC_DATE;
use netsync_test::{DatastoreVerifier, DeviceFacts, TestBed};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

async fn onboard(bed: &TestBed, hosts: &[HostTarget]) {
    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), hosts)
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
}

#[tokio::test]
async fn test_full_sync_creates_network_data() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[host])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts["vlan"].created, 2);
    assert_eq!(report.counts["interface"].created, 4);
    assert_eq!(report.counts["interface"].updated, 1);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::VLAN, 2).unwrap();
    verify
        .assert_attr(kinds::VRF, &Filter::new().eq("name", "blue"), "rd", json!("65000:1"))
        .unwrap();
    assert_eq!(
        verify.interface_names("leaf1").unwrap(),
        vec!["Ethernet1", "Ethernet2", "Management1", "Port-Channel1", "Vlan10"]
    );

    let device = verify.device("leaf1").unwrap();
    assert_eq!(device.attr("last_network_data_sync"), json!(SYNC_DATE));
    assert_eq!(
        verify
            .referenced_name(&device, "software_version", kinds::SOFTWARE_VERSION, "version")
            .unwrap(),
        json!("4.30.1F")
    );

    let ethernet1 = verify.interface("leaf1", "Ethernet1").unwrap();
    assert_eq!(ethernet1.attr("description"), json!("uplink"));
    assert_eq!(
        verify
            .referenced_name(&ethernet1, "lag", kinds::INTERFACE, "name")
            .unwrap(),
        json!("Port-Channel1")
    );

    let ethernet2 = verify.interface("leaf1", "Ethernet2").unwrap();
    assert_eq!(ethernet2.attr("mode"), json!("access"));
    assert_eq!(
        verify
            .referenced_name(&ethernet2, "untagged_vlan", kinds::VLAN, "vid")
            .unwrap(),
        json!(10)
    );

    let port_channel = verify.interface("leaf1", "Port-Channel1").unwrap();
    assert_eq!(port_channel.attr("type"), json!("lag"));
    assert_eq!(
        port_channel.attr("tagged_vlans").as_array().map(Vec::len),
        Some(2)
    );

    let svi = verify.interface("leaf1", "Vlan10").unwrap();
    assert_eq!(
        verify.referenced_name(&svi, "vrf", kinds::VRF, "name").unwrap(),
        json!("blue")
    );
    assert_eq!(
        verify.assigned_interfaces("leaf1", "10.1.1.1").unwrap(),
        vec!["Vlan10"]
    );
    verify
        .assert_attr(
            kinds::IP_ADDRESS,
            &Filter::new().eq("host", "10.1.1.1"),
            "address",
            json!("10.1.1.1/24"),
        )
        .unwrap();

    // the management port keeps its role and the primary address
    assert!(verify.interface("leaf1", "Management1").unwrap().bool_attr("mgmt_only"));
    assert_eq!(verify.primary_ip("leaf1").unwrap().as_deref(), Some("10.0.0.1/24"));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig::default();
    let runner = bed.runner(sync.clone());
    let job = TestBed::network_data_job(sync);

    let first = runner.run(&job, &[host.clone()]).await;
    assert!(first.is_clean(), "{}", first.render_text());

    let second = runner.run(&job, &[host]).await;
    assert!(second.is_clean(), "{}", second.render_text());
    assert!(!second.totals().has_changes(), "{}", second.render_text());
    assert!(second.repaired_primary_ips.is_empty());
}

#[tokio::test]
async fn test_shared_objects_synced_once_for_a_location() {
    let bed = TestBed::new();
    let leaf1 = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    let leaf2 = bed.script(&DeviceFacts::leaf("leaf2", "SN2", 2));
    onboard(&bed, &[leaf1.clone(), leaf2.clone()]).await;

    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[leaf1, leaf2])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::VLAN, 2).unwrap();
    verify.assert_count(kinds::VRF, 1).unwrap();
    verify.assert_count(kinds::SOFTWARE_VERSION, 1).unwrap();
    verify.assert_count(kinds::INTERFACE, 10).unwrap();
    assert_eq!(
        verify.assigned_interfaces("leaf2", "10.1.2.1").unwrap(),
        vec!["Vlan10"]
    );
}

#[tokio::test]
async fn test_removed_interface_is_deleted() {
    let bed = TestBed::new();
    let facts = DeviceFacts::leaf("leaf1", "SN1", 1);
    let host = bed.script(&facts);
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig::default();
    let runner = bed.runner(sync.clone());
    let job = TestBed::network_data_job(sync);
    runner.run(&job, &[host.clone()]).await;

    bed.script(&facts.without_interface("Ethernet2"));
    let report = runner.run(&job, &[host]).await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts["interface"].deleted, 1);

    let verify = DatastoreVerifier::new(&bed.datastore);
    assert_eq!(
        verify.interface_names("leaf1").unwrap(),
        vec!["Ethernet1", "Management1", "Port-Channel1", "Vlan10"]
    );
    // VLANs are shared by the location and stay
    verify.assert_count(kinds::VLAN, 2).unwrap();
}

#[tokio::test]
async fn test_address_shared_with_unpolled_device_survives() {
    let bed = TestBed::new();
    let leaf1 = DeviceFacts::leaf("leaf1", "SN1", 1)
        .with_interface_field("Ethernet2", "ip_addresses", json!(["10.9.9.9/32"]));
    let leaf2 = DeviceFacts::leaf("leaf2", "SN2", 2)
        .with_interface_field("Ethernet2", "ip_addresses", json!(["10.9.9.9/32"]));
    let host1 = bed.script(&leaf1);
    let host2 = bed.script(&leaf2);
    onboard(&bed, &[host1.clone(), host2.clone()]).await;

    let sync = SyncConfig::default();
    let runner = bed.runner(sync.clone());
    let job = TestBed::network_data_job(sync);
    let first = runner.run(&job, &[host1.clone(), host2]).await;
    assert!(first.is_clean(), "{}", first.render_text());

    bed.script(&leaf1.with_interface_field("Ethernet2", "ip_addresses", json!([])));
    let report = runner.run(&job, &[host1]).await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts[kinds::IP_ADDRESS].deleted, 0);
    assert_eq!(report.counts[kinds::IP_ADDRESS].skipped, 1);
    assert_eq!(report.counts[kinds::IP_ASSIGNMENT].deleted, 1);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify
        .assert_exists(kinds::IP_ADDRESS, &Filter::new().eq("host", "10.9.9.9"))
        .unwrap();
    assert!(verify.assigned_interfaces("leaf1", "10.9.9.9").unwrap().is_empty());
    assert_eq!(
        verify.assigned_interfaces("leaf2", "10.9.9.9").unwrap(),
        vec!["Ethernet2"]
    );
}

#[tokio::test]
async fn test_address_owned_by_polled_device_is_deleted() {
    let bed = TestBed::new();
    let facts = DeviceFacts::leaf("leaf1", "SN1", 1)
        .with_interface_field("Ethernet2", "ip_addresses", json!(["10.9.9.9/32"]));
    let host = bed.script(&facts);
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig::default();
    let runner = bed.runner(sync.clone());
    let job = TestBed::network_data_job(sync);
    runner.run(&job, &[host.clone()]).await;

    bed.script(&facts.with_interface_field("Ethernet2", "ip_addresses", json!([])));
    let report = runner.run(&job, &[host]).await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts[kinds::IP_ADDRESS].deleted, 1);

    DatastoreVerifier::new(&bed.datastore)
        .assert_absent(kinds::IP_ADDRESS, &Filter::new().eq("host", "10.9.9.9"))
        .unwrap();
}

#[tokio::test]
async fn test_skip_unmatched_destination_keeps_interface() {
    let bed = TestBed::new();
    let facts = DeviceFacts::leaf("leaf1", "SN1", 1);
    let host = bed.script(&facts);
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig {
        skip_unmatched_destination: true,
        ..SyncConfig::default()
    };
    let runner = bed.runner(sync.clone());
    let job = TestBed::network_data_job(sync);
    runner.run(&job, &[host.clone()]).await;

    bed.script(&facts.without_interface("Ethernet2"));
    let report = runner.run(&job, &[host]).await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts["interface"].deleted, 0);

    DatastoreVerifier::new(&bed.datastore)
        .interface("leaf1", "Ethernet2")
        .unwrap();
}

#[tokio::test]
async fn test_renamed_management_interface_keeps_primary_address() {
    let bed = TestBed::new();
    let facts = DeviceFacts::leaf("leaf1", "SN1", 1);
    let host = bed.script(&facts);
    onboard(&bed, &[host.clone()]).await;

    bed.script(&facts.rename_interface("Management1", "Management0"));
    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[host])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.repaired_primary_ips, vec!["leaf1 (10.0.0.1)"]);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify
        .assert_absent(
            kinds::INTERFACE,
            &Filter::new()
                .id("device", verify.device("leaf1").unwrap().id)
                .eq("name", "Management1"),
        )
        .unwrap();
    assert_eq!(verify.primary_ip("leaf1").unwrap().as_deref(), Some("10.0.0.1/24"));
    assert_eq!(
        verify.assigned_interfaces("leaf1", "10.0.0.1").unwrap(),
        vec!["Management0"]
    );
    assert!(verify.interface("leaf1", "Management0").unwrap().bool_attr("mgmt_only"));
}

#[tokio::test]
async fn test_device_not_onboarded_is_excluded() {
    let bed = TestBed::new();
    let leaf1 = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[leaf1.clone()]).await;
    let stranger = bed.script(&DeviceFacts::leaf("leaf7", "SN7", 7));

    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[leaf1, stranger])
        .await;

    assert!(report.excluded_hosts["10.0.0.7"].contains("not onboarded"));
    assert_eq!(report.counts["device"].created, 0);
    assert_eq!(report.counts["device"].forbidden, 0);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::DEVICE, 1).unwrap();
    verify.assert_count(kinds::INTERFACE, 5).unwrap();
}

#[tokio::test]
async fn test_malformed_datastore_reference_aborts_the_run() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[host.clone()]).await;

    let verify = DatastoreVerifier::new(&bed.datastore);
    let device = verify.device("leaf1").unwrap();
    bed.datastore
        .update(kinds::DEVICE, device.id, object_attrs! {"location" => "dc1"})
        .unwrap();

    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[host])
        .await;

    let error = report.error.as_deref().unwrap();
    assert!(error.starts_with("Unexpected result shape"), "{}", error);
    assert!(error.contains("'location'"), "{}", error);
    assert!(!report.is_clean());
    verify.assert_count(kinds::VLAN, 0).unwrap();
}

#[tokio::test]
async fn test_type_toggles_limit_the_run() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig {
        include_vlans: false,
        include_software_version: false,
        include_lags: false,
        ..SyncConfig::default()
    };
    let report = bed
        .runner(sync.clone())
        .run(&TestBed::network_data_job(sync), &[host])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert!(!report.counts.contains_key("vlan"));
    assert!(!report.counts.contains_key("software_version"));

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::VLAN, 0).unwrap();
    verify.assert_count(kinds::SOFTWARE_VERSION, 0).unwrap();
    verify.assert_count(kinds::VRF, 1).unwrap();

    let ethernet1 = verify.interface("leaf1", "Ethernet1").unwrap();
    assert_eq!(ethernet1.attr("lag"), Value::Null);
    let ethernet2 = verify.interface("leaf1", "Ethernet2").unwrap();
    assert_eq!(ethernet2.attr("untagged_vlan"), Value::Null);
}

#[tokio::test]
async fn test_dry_run_reports_without_writing() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    onboard(&bed, &[host.clone()]).await;

    let sync = SyncConfig::default();
    let report = bed
        .runner(sync.clone())
        .with_dry_run(true)
        .run(&TestBed::network_data_job(sync), &[host])
        .await;

    assert!(report.error.is_none());
    assert_eq!(report.counts["interface"].created, 4);
    assert_eq!(report.counts["vlan"].created, 2);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::VLAN, 0).unwrap();
    verify.assert_count(kinds::INTERFACE, 1).unwrap();
    assert_eq!(verify.device("leaf1").unwrap().attr("last_network_data_sync"), Value::Null);
}
