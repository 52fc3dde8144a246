use crate::provisioning::{bring_online, provider};
use crate::support::MockFirmware;
use machlink_communication::rest::{CachedAccess, GlobalsBlock, RestAddress};
use machlink_communication::AnyProvider;
use machlink_core::{
    Backend, BulkBuffer, MemoryAccess, Temperature, Value, ValueKind, VariableStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PASSWORD: &str = crate::provisioning::PASSWORD;

#[tokio::test(start_paused = true)]
async fn globals_are_written_with_set_commands() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;

    assert!(provider.write_variable(|s| &s.chamber_light, true).await);
    assert!(firmware
        .gcodes()
        .contains(&"set global.chamberLight = true".to_string()));
    assert_eq!(firmware.global("chamberLight"), Some(json!(true)));

    assert!(provider.write_variable(|s| &s.tool_offset_z, -0.125).await);
    assert_eq!(firmware.global("toolOffsetZ"), Some(json!(-0.125)));

    assert!(provider.toggle_variable(|s| &s.chamber_light).await);
    assert_eq!(firmware.global("chamberLight"), Some(json!(false)));
}

#[tokio::test(start_paused = true)]
async fn object_model_values_are_read_only() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;
    let sent = firmware.gcodes().len();

    assert!(!provider.write_named("axis_position", Some("X"), Value::Float(1.0)).await);
    assert!(!provider.write_named("machine_status", None, Value::Text("idle".into())).await);
    assert!(!provider.write_named("bed_temperature", None, Value::Float(60.0)).await);
    assert_eq!(firmware.gcodes().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn reads_walk_the_object_model() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;

    firmware.set("/move/axes/2/machinePosition", json!(12.5));
    assert_eq!(provider.read_element(|s| &s.axis_position, "Z").await, Some(12.5));
    assert_eq!(provider.read_element(|s| &s.axis_position, "A").await, None);

    firmware.set("/state/currentTool", json!(2));
    assert_eq!(provider.read_variable(|s| &s.current_tool).await, Some(2));
    assert_eq!(
        provider.read_variable(|s| &s.machine_status).await.as_deref(),
        Some("idle")
    );
}

#[tokio::test(start_paused = true)]
async fn heater_pairs_update_together() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;

    let mut bed = provider.observe_variable(|s| &s.bed_temperature);
    firmware.set("/heat/heaters/0/current", json!(58.0));
    firmware.set("/heat/heaters/0/active", json!(60.0));
    bed.wait_for(|value| *value == Some(Temperature::new(58.0, 60.0)))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn control_operations_wait_for_status() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;
    let backend = provider.backend();

    assert_eq!(backend.all_axes_homed().await, Some(false));
    assert!(backend.home_axes().await);
    assert_eq!(backend.all_axes_homed().await, Some(true));

    assert!(backend.cycle_start().await);
    assert_eq!(firmware.get("/state/status"), Some(json!("processing")));
    assert!(backend.feed_hold().await);
    assert_eq!(firmware.get("/state/status"), Some(json!("paused")));
    assert!(backend.cycle_stop().await);
    assert_eq!(firmware.get("/state/status"), Some(json!("idle")));

    assert!(backend.send_gcode("M106 S0.5").await);
    assert_eq!(firmware.gcodes().last().map(String::as_str), Some("M106 S0.5"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_firmware_fails_control() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;

    firmware.set_down(true);
    assert!(!provider.backend().cycle_start().await);
    firmware.set_down(false);

    // M0 while already idle is accepted and reached at once
    assert!(provider.backend().cycle_stop().await);
}

#[tokio::test(start_paused = true)]
async fn files_upload_and_exist() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;
    let backend = provider.backend();

    assert_eq!(backend.file_exists("0:/gcodes/part.g").await, Some(false));
    assert!(backend.upload_file("0:/gcodes/part.g", b"G1 X10\n").await);
    assert_eq!(backend.file_exists("0:/gcodes/part.g").await, Some(true));
    assert_eq!(firmware.file("0:/gcodes/part.g").as_deref(), Some("G1 X10\n"));

    firmware.set_down(true);
    assert_eq!(backend.file_exists("0:/gcodes/part.g").await, None);
}

#[tokio::test(start_paused = true)]
async fn globals_snapshot_serves_polling_reads() {
    let firmware = MockFirmware::new(PASSWORD);
    let provider = provider(&firmware);
    bring_online(&provider).await;
    provider.stop().await;
    assert_eq!(firmware.requests("/rr_disconnect"), 2, "stop must close the session");

    let backend = provider.backend();
    assert_eq!(provider.buffer().is_bulk_complete("globals"), Some(true));

    let connection = backend.connection().clone();
    let snapshot = Arc::new(
        GlobalsBlock::for_registry(
            backend.store().registry(),
            connection.clone(),
            Duration::from_millis(250),
        )
        .unwrap(),
    );
    assert_eq!(snapshot.missing().len(), 4, "nothing fetched yet");
    assert_eq!(
        snapshot.names(),
        ["chamberLight", "processMode", "queuePos", "toolOffsetZ"]
    );
    firmware.set_global("queuePos", json!(9));
    assert!(snapshot.refresh().await);
    assert!(snapshot.missing().is_empty());

    let access = CachedAccess::new(connection, Some(snapshot), Duration::from_millis(500));
    firmware.set_global("queuePos", json!(10));
    let before = firmware.requests("/rr_model");
    let address = RestAddress::global("queuePos");
    assert_eq!(access.read(&address, ValueKind::Int32).await, Some(Value::Int(9)));
    assert_eq!(firmware.requests("/rr_model"), before);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(access.read(&address, ValueKind::Int32).await, Some(Value::Int(10)));
    assert_eq!(firmware.requests("/rr_model"), before + 1);
}

#[tokio::test(start_paused = true)]
async fn any_provider_exposes_rest_by_name() {
    let firmware = MockFirmware::new(PASSWORD);
    let any = AnyProvider::Rest(provider(&firmware));
    any.start_connection();
    assert!(any.wait_ready(Duration::from_secs(30)).await);

    firmware.set("/move/axes/0/machinePosition", json!(-4.0));
    assert_eq!(any.read("axis_position", Some("X")).await, Some(Value::Float(-4.0)));
    assert!(any.write("process_mode", None, Value::Int(2)).await);
    assert_eq!(firmware.global("processMode"), Some(json!(2)));
    assert!(any.variable_names().contains(&"bed_temperature".to_string()));
    assert!(any.feed_hold().await);
    any.stop().await;
    assert!(!any.is_ready());
}
