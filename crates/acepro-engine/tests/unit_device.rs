//! Device operations, retry policy and status folding on one unit.

mod support;

use std::time::Duration;

use acepro_dispatch::{Priority, Request};
use acepro_engine::{RetractOutcome, SlotStatus, UnitError, UnitRegistry};
use support::{pla_unit, Rig, SimSlot};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_forbidden_is_retried_with_backoff() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.devices[0].forbid("feed_filament", 2);

    let start = Instant::now();
    rig.unit(0).feed(1, 10, 60).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(rig.devices[0].count("feed_filament"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_gives_up_after_retries() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.devices[0].forbid("start_feed_assist", 10);

    let err = rig.unit(0).enable_feed_assist(0).await.unwrap_err();

    assert!(
        matches!(err, UnitError::Forbidden { attempts: 3, .. }),
        "{err}"
    );
    assert_eq!(rig.devices[0].count("start_feed_assist"), 3);
    assert_eq!(rig.unit(0).feed_assist(), None);
}

#[tokio::test(start_paused = true)]
async fn test_device_error_fails_immediately() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.devices[0].fail("drying", 1, "dryer fault");

    let err = rig.unit(0).start_drying(45, 60).await.unwrap_err();

    match err {
        UnitError::Device { code, msg, method, .. } => {
            assert_eq!(code, 1);
            assert_eq!(msg, "dryer fault");
            assert_eq!(method, "drying");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(rig.devices[0].count("drying"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silence_is_retried_then_reported() {
    let rig = Rig::new(vec![pla_unit()]).await;
    let unit = rig.unit(0);

    rig.devices[0].mute("stop_feed_filament", 2);
    unit.stop_feed(0).await.unwrap();
    assert_eq!(rig.devices[0].count("stop_feed_filament"), 3);

    rig.devices[0].mute("stop_feed_filament", 3);
    let start = Instant::now();
    let err = unit.stop_feed(0).await.unwrap_err();
    assert!(
        matches!(err, UnitError::NoResponse { attempts: 3, .. }),
        "{err}"
    );
    assert!(start.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_execute_raw_request() {
    let rig = Rig::new(vec![pla_unit()]).await;

    let response = rig
        .unit(0)
        .execute(Request::get_info(), Priority::Normal)
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.result.unwrap()["firmware"], "V1.3.84");
}

#[tokio::test(start_paused = true)]
async fn test_drying_temperature_is_capped() {
    let rig = Rig::new(vec![pla_unit()]).await;

    let err = rig.unit(0).start_drying(90, 60).await.unwrap_err();

    assert!(matches!(err, UnitError::DryerTemperature { requested: 90, .. }));
    assert_eq!(rig.devices[0].count("drying"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slot_out_of_range() {
    let rig = Rig::new(vec![pla_unit()]).await;

    let err = rig.unit(0).feed(4, 10, 60).await.unwrap_err();

    assert!(matches!(err, UnitError::SlotOutOfRange { slot: 4, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_retract_skips_and_stops_on_empty_slot() {
    let rig = Rig::new(vec![pla_unit()]).await;
    let unit = rig.unit(0);

    rig.devices[0].set_slot(1, SimSlot::empty());
    unit.refresh_status().await.unwrap();
    assert_eq!(unit.retract(1, 100, 50).await.unwrap(), RetractOutcome::SlotEmpty);
    assert_eq!(rig.devices[0].count("unwind_filament"), 0);

    let device = rig.devices[0].clone();
    let refresher = unit.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        device.set_slot(2, SimSlot::empty());
        refresher.refresh_status().await.unwrap();
    });
    assert_eq!(unit.retract(2, 500, 50).await.unwrap(), RetractOutcome::StoppedEarly);
    assert_eq!(rig.devices[0].count("stop_unwind_filament"), 1);

    assert_eq!(unit.retract(3, 100, 50).await.unwrap(), RetractOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_status_adopts_rfid_tags() {
    let rig = Rig::new(vec![pla_unit()]).await;
    let unit = rig.unit(0);

    let slot = unit.slot(0).unwrap();
    assert_eq!(slot.status, SlotStatus::Ready);
    assert_eq!(slot.material, "PLA");
    assert_eq!(slot.color, [255, 0, 0]);
    assert!(slot.rfid);
    assert_eq!(slot.temp, 200);

    unit.process_effects().await;

    let slot = unit.slot(0).unwrap();
    assert_eq!(slot.temp, 210);
    assert_eq!(slot.sku.as_deref(), Some("AHPLBK-101"));
    assert_eq!(slot.brand.as_deref(), Some("Anycubic"));
    assert_eq!(rig.devices[0].count("get_filament_info"), 4);

    // Already identified slots are not queried again.
    unit.refresh_status().await.unwrap();
    unit.process_effects().await;
    assert_eq!(rig.devices[0].count("get_filament_info"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_status_defaults_and_clears_metadata() {
    let untagged = SimSlot {
        status: "ready".to_string(),
        material: String::new(),
        color: [0, 0, 0],
        rfid: 0,
    };
    let rig = Rig::new(vec![vec![
        untagged,
        SimSlot::ready("PETG", [0, 0, 0]),
        SimSlot::empty(),
        SimSlot::empty(),
    ]])
    .await;
    let unit = rig.unit(0);

    let slot = unit.slot(0).unwrap();
    assert_eq!(slot.material, "Unknown");
    assert_eq!(slot.temp, 225);
    assert_eq!(slot.color, [128, 128, 128]);

    unit.process_effects().await;
    assert!(unit.slot(1).unwrap().extruder_temp.is_some());

    rig.devices[0].set_slot(1, SimSlot::empty());
    let effects = unit.apply_status(unit.refresh_status().await.unwrap());
    assert!(effects.rfid_queries.is_empty());
    let slot = unit.slot(1).unwrap();
    assert_eq!(slot.status, SlotStatus::Empty);
    assert!(!slot.rfid);
    assert!(slot.sku.is_none());
    assert!(slot.extruder_temp.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_auto_load_restores_feed_assist() {
    let rig = Rig::new(vec![pla_unit()]).await;
    let unit = rig.unit(0);
    unit.enable_feed_assist(2).await.unwrap();

    rig.devices[0].set_slot(2, SimSlot::empty());
    unit.refresh_status().await.unwrap();
    rig.devices[0].set_slot(2, SimSlot::ready("PLA", [255, 0, 0]));
    let before = rig.devices[0].count("start_feed_assist");
    unit.refresh_status().await.unwrap();
    unit.process_effects().await;

    assert_eq!(rig.devices[0].count("start_feed_assist"), before + 1);
    assert_eq!(unit.feed_assist(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_inventory_survives_restart() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.unit(0).enable_feed_assist(3).await.unwrap();

    let restored = acepro_engine::Unit::new(
        0,
        Default::default(),
        Default::default(),
        rig.handles[0].clone(),
        rig.store.clone(),
        rig.machine.scheduler.clone(),
    );

    assert_eq!(restored.feed_assist(), Some(3));
    assert_eq!(restored.slot(1).unwrap().material, "PLA");
    assert_eq!(restored.slot(1).unwrap().color, [0, 255, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_registry_maps_tools_across_units() {
    let rig = Rig::new(vec![pla_unit(), pla_unit()]).await;
    let registry = &rig.machine.registry;

    assert_eq!(registry.tool_count(), 8);
    let (unit, slot) = registry.locate(6).unwrap();
    assert_eq!((unit.index(), slot), (1, 2));
    assert!(registry.locate(8).is_none());
    assert_eq!(UnitRegistry::tool_index(1, 2), 6);
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_tracks_device() {
    let rig = Rig::new(vec![pla_unit()]).await;
    let cancel = rig.start_units();
    let unit = rig.unit(0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(unit.firmware().unwrap()["model"], "Anycubic Color Engine Pro");
    // Tags seen at start-up are read in the background.
    assert_eq!(rig.devices[0].count("get_filament_info"), 4);

    rig.devices[0].set_slot(3, SimSlot::empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(unit.slot(3).unwrap().status, SlotStatus::Empty);

    cancel.cancel();
    rig.shutdown();
}
