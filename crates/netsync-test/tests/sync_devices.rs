//! End-to-end onboarding runs against scripted devices.

use netsync_core::{object_attrs, Datastore, Filter};
use netsync_syncd::{kinds, CommandError, HostTarget, SyncConfig, SyncDevices};
use netsync_test::{DatastoreVerifier, DeviceFacts, TestBed, FIXTURE_PLATFORM};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[tokio::test]
async fn test_onboarding_creates_identity_chain() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[host])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts["device"].created, 1);
    assert_eq!(report.counts["manufacturer"].created, 1);

    let verify = DatastoreVerifier::new(&bed.datastore);
    let device = verify.device("leaf1").unwrap();
    assert_eq!(device.attr("serial"), json!("SN1"));
    assert_eq!(
        verify
            .referenced_name(&device, "location", kinds::LOCATION, "name")
            .unwrap(),
        json!("dc1")
    );
    assert_eq!(
        verify
            .referenced_name(&device, "platform", kinds::PLATFORM, "name")
            .unwrap(),
        json!(FIXTURE_PLATFORM)
    );
    assert_eq!(
        verify
            .referenced_name(&device, "device_type", kinds::DEVICE_TYPE, "model")
            .unwrap(),
        json!("DCS-7050SX3")
    );
    verify
        .assert_attr(kinds::MANUFACTURER, &Filter::new(), "name", json!("Arista"))
        .unwrap();

    let mgmt = verify.interface("leaf1", "Management1").unwrap();
    assert!(mgmt.bool_attr("mgmt_only"));
    assert_eq!(verify.primary_ip("leaf1").unwrap().as_deref(), Some("10.0.0.1/24"));
    assert_eq!(
        verify.assigned_interfaces("leaf1", "10.0.0.1").unwrap(),
        vec!["Management1"]
    );
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    let runner = bed.runner(SyncConfig::default());

    let first = runner.run(&SyncDevices::new(), &[host.clone()]).await;
    assert!(first.is_clean(), "{}", first.render_text());

    let second = runner.run(&SyncDevices::new(), &[host]).await;
    assert!(second.is_clean(), "{}", second.render_text());
    assert!(!second.totals().has_changes(), "{}", second.render_text());
    DatastoreVerifier::new(&bed.datastore)
        .assert_count(kinds::DEVICE, 1)
        .unwrap();
}

#[tokio::test]
async fn test_unpolled_devices_and_catalogue_are_kept() {
    let bed = TestBed::new();
    bed.datastore
        .create(kinds::MANUFACTURER, object_attrs! {"name" => "Cisco"})
        .unwrap();
    bed.datastore
        .create(
            kinds::DEVICE,
            object_attrs! {
                "name" => "spine1",
                "serial" => "SN9",
                "location" => bed.location.id.to_string(),
            },
        )
        .unwrap();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[host])
        .await;
    assert!(report.is_clean(), "{}", report.render_text());
    assert_eq!(report.counts["device"].deleted, 0);
    assert_eq!(report.counts["manufacturer"].deleted, 0);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.device("spine1").unwrap();
    verify.device("leaf1").unwrap();
    verify
        .assert_exists(kinds::MANUFACTURER, &Filter::new().eq("name", "Cisco"))
        .unwrap();
    verify.assert_count(kinds::MANUFACTURER, 2).unwrap();
}

#[tokio::test]
async fn test_unreachable_host_is_isolated() {
    let bed = TestBed::new();
    let leaf1 = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));
    let leaf2 = bed.script(&DeviceFacts::leaf("leaf2", "SN2", 2));
    let leaf3 = DeviceFacts::leaf("leaf3", "SN3", 3).host();
    bed.executor
        .set_failure(&leaf3.address, CommandError::unreachable(&leaf3.address, "connection refused"));

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[leaf1, leaf2, leaf3])
        .await;

    assert!(!report.is_clean());
    assert!(report.error.is_none());
    assert_eq!(
        report.excluded_hosts.keys().collect::<Vec<_>>(),
        vec!["10.0.0.3"]
    );
    assert!(report.excluded_hosts["10.0.0.3"].contains("unreachable"));
    assert_eq!(report.counts["device"].created, 2);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.device("leaf1").unwrap();
    verify.device("leaf2").unwrap();
    verify.assert_count(kinds::DEVICE, 2).unwrap();
    assert_eq!(
        bed.executor.contacted_hosts(),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
}

#[tokio::test]
async fn test_host_without_location_is_excluded() {
    let bed = TestBed::new();
    let facts = DeviceFacts::leaf("leaf1", "SN1", 1);
    bed.script(&facts);
    let host = HostTarget::new(facts.address(), FIXTURE_PLATFORM);

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[host])
        .await;

    assert!(report.excluded_hosts["10.0.0.1"].contains("location"));
    DatastoreVerifier::new(&bed.datastore)
        .assert_count(kinds::DEVICE, 0)
        .unwrap();
}

#[tokio::test]
async fn test_host_missing_required_field_is_excluded() {
    let bed = TestBed::new();
    let mut facts = DeviceFacts::leaf("leaf1", "SN1", 1);
    facts.hostname = String::new();
    let host = bed.script(&facts);

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[host])
        .await;

    assert_eq!(
        report.excluded_hosts["10.0.0.1"],
        "missing required fields: hostname"
    );
    assert!(report
        .empty_fields
        .get("10.0.0.1")
        .is_some_and(|fields| fields.contains(&"hostname".to_string())));
    DatastoreVerifier::new(&bed.datastore)
        .assert_count(kinds::DEVICE, 0)
        .unwrap();
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));

    let report = bed
        .runner(SyncConfig::default())
        .with_dry_run(true)
        .run(&SyncDevices::new(), &[host])
        .await;

    assert!(report.dry_run);
    assert!(report.error.is_none());
    assert_eq!(report.counts["device"].created, 1);
    assert_eq!(report.counts["platform"].created, 1);

    let verify = DatastoreVerifier::new(&bed.datastore);
    verify.assert_count(kinds::DEVICE, 0).unwrap();
    verify.assert_count(kinds::MANUFACTURER, 0).unwrap();
    verify.assert_count(kinds::IP_ADDRESS, 0).unwrap();
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let bed = TestBed::new();
    let host = bed.script(&DeviceFacts::leaf("leaf1", "SN1", 1));

    let report = bed
        .runner(SyncConfig::default())
        .run(&SyncDevices::new(), &[host])
        .await;
    let value: Value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["job"], json!("sync_devices"));
    assert_eq!(value["counts"]["device"]["created"], json!(1));
}
