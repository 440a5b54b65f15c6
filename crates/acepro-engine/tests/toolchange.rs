//! Tool changes against the simulated rig.

mod support;

use std::time::Duration;

use acepro_engine::{
    ChangeMode, ChangeOutcome, EngineConfig, FilamentPosition, PrintHost, PrintState,
    SmartLoadReport, ToolChangeError,
};
use support::{pla_unit, Rig, SimSlot, LOADED_AT, NOZZLE_AT, SPLITTER_AT};

#[tokio::test(start_paused = true)]
async fn test_load_from_clear_path() {
    let rig = Rig::new(vec![pla_unit()]).await;

    let outcome = rig.changer.change_tool(Some(2), ChangeMode::Normal).await.unwrap();

    assert_eq!(
        outcome,
        ChangeOutcome::Loaded {
            from: None,
            to: 2,
            unit: 0
        }
    );
    assert_eq!(rig.machine.current_tool(), Some(2));
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Nozzle);
    assert!(rig.world.position(2) >= NOZZLE_AT);
    assert_eq!(rig.unit(0).feed_assist(), Some(2));
    assert!(rig.machine.coordination.detection_active());
    assert!(rig.host.ran("_ACE_PRE_TOOLCHANGE FROM=-1 TO=2"));
    assert!(rig.host.ran("_ACE_POST_TOOLCHANGE FROM=-1 TO=2 PURGELENGTH=50.0"));
    assert!(rig.host.ran("SET_GCODE_VARIABLE MACRO=_ACE_STATE VARIABLE=active VALUE=2"));
}

#[tokio::test(start_paused = true)]
async fn test_change_across_units() {
    let rig = Rig::new(vec![pla_unit(), pla_unit()]).await;
    rig.preload(1);
    rig.unit(0).enable_feed_assist(1).await.unwrap();

    let outcome = rig.changer.change_tool(Some(5), ChangeMode::Normal).await.unwrap();

    assert_eq!(
        outcome,
        ChangeOutcome::Loaded {
            from: Some(1),
            to: 5,
            unit: 1
        }
    );
    assert!(rig.world.position(1) < SPLITTER_AT);
    assert!(rig.world.position(5) >= NOZZLE_AT);
    assert_eq!(rig.unit(0).feed_assist(), None);
    assert_eq!(rig.unit(1).feed_assist(), Some(1));
    assert_eq!(rig.machine.current_tool(), Some(5));
    assert!(rig.host.ran("_ACE_PRE_TOOLCHANGE FROM=1 TO=5"));
}

#[tokio::test(start_paused = true)]
async fn test_reselect_loaded_tool_only_purges() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.preload(1);

    let outcome = rig.changer.change_tool(Some(1), ChangeMode::Normal).await.unwrap();

    assert_eq!(outcome, ChangeOutcome::AlreadyLoaded(1));
    assert_eq!(rig.unit(0).feed_assist(), Some(1));
    assert_eq!(rig.host.extruder_position().unwrap(), 10.0);
    assert_eq!(rig.devices[0].count("feed_filament"), 0);
    assert!(!rig.host.ran("_ACE_PRE_TOOLCHANGE"));
}

#[tokio::test(start_paused = true)]
async fn test_reselect_corrects_stale_position() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.preload(0);
    // Filament is really at the nozzle but the stored position lags behind.
    rig.machine.set_filament_position(FilamentPosition::Toolhead).unwrap();

    let outcome = rig.changer.change_tool(Some(0), ChangeMode::Normal).await.unwrap();

    assert_eq!(outcome, ChangeOutcome::StateCorrected(0));
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Nozzle);
}

#[tokio::test(start_paused = true)]
async fn test_parked_position_with_filament_present_is_cleared_first() {
    let rig = Rig::new(vec![pla_unit()]).await;
    // Tool 3 sits in the nozzle although nothing is recorded as loaded.
    rig.world.place(3, LOADED_AT);
    rig.machine.set_filament_position(FilamentPosition::Bowden).unwrap();

    let outcome = rig.changer.change_tool(Some(0), ChangeMode::Normal).await.unwrap();

    assert_eq!(
        outcome,
        ChangeOutcome::Loaded {
            from: None,
            to: 0,
            unit: 0
        }
    );
    assert!(rig.world.position(3) < SPLITTER_AT);
    assert!(rig.world.position(0) >= NOZZLE_AT);
    assert_eq!(rig.machine.current_tool(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_unload_only() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.preload(2);

    let outcome = rig.changer.change_tool(None, ChangeMode::Normal).await.unwrap();

    assert_eq!(outcome, ChangeOutcome::Unloaded { from: Some(2) });
    assert_eq!(rig.machine.current_tool(), None);
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Bowden);
    assert!(rig.machine.sensors.path_free());
    assert!(rig.host.ran("SET_GCODE_VARIABLE MACRO=_ACE_STATE VARIABLE=active VALUE=-1"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_pauses_print() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.world.jam(1);
    rig.host.set_state(PrintState::Printing);

    let err = rig
        .changer
        .change_tool(Some(1), ChangeMode::Normal)
        .await
        .unwrap_err();

    assert!(matches!(err, ToolChangeError::LoadFailed { tool: 1, .. }), "{err}");
    assert_eq!(rig.host.state(), PrintState::Paused);
    assert!(rig.console.said("tool change failed"));
    assert_eq!(rig.machine.current_tool(), None);
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Bowden);
    assert!(rig.devices[0].count("stop_feed_filament") > 0);
    assert!(!rig.machine.coordination.toolchange_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_failed_endless_change_does_not_pause() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.world.jam(1);
    rig.host.set_state(PrintState::Printing);

    let result = rig.changer.change_tool(Some(1), ChangeMode::EndlessSpool).await;

    assert!(result.is_err());
    assert_eq!(rig.host.state(), PrintState::Printing);
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_refilled_spool() {
    let mut units = pla_unit();
    units[1] = SimSlot::empty();
    let rig = Rig::new(vec![units]).await;

    let device = rig.devices[0].clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        device.set_slot(1, SimSlot::ready("PLA", [0, 255, 0]));
    });

    let outcome = rig.changer.change_tool(Some(1), ChangeMode::Normal).await.unwrap();

    assert!(matches!(outcome, ChangeOutcome::Loaded { to: 1, .. }));
    assert_eq!(rig.console.prompt_titles(), vec!["Spool Not Ready".to_string()]);
    assert!(*rig.console.closed.lock().unwrap() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_spool_never_ready_times_out() {
    let mut config = EngineConfig::default();
    config.toolchange.spool_ready_timeout = Duration::from_secs(10);
    let mut units = pla_unit();
    units[3] = SimSlot::empty();
    let rig = Rig::build(vec![units], config, true).await;

    let err = rig
        .changer
        .change_tool(Some(3), ChangeMode::Normal)
        .await
        .unwrap_err();

    assert!(matches!(err, ToolChangeError::SpoolNotReady { tool: 3 }), "{err}");
    assert_eq!(rig.devices[0].count("feed_filament"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_without_splitter_sensor() {
    let rig = Rig::build(vec![pla_unit()], EngineConfig::default(), false).await;

    let outcome = rig.changer.change_tool(Some(3), ChangeMode::Normal).await.unwrap();

    assert!(matches!(outcome, ChangeOutcome::Loaded { to: 3, .. }));
    assert!(rig.world.position(3) >= NOZZLE_AT);
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Nozzle);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_tool() {
    let rig = Rig::new(vec![pla_unit()]).await;

    let err = rig
        .changer
        .change_tool(Some(9), ChangeMode::Normal)
        .await
        .unwrap_err();

    assert!(matches!(err, ToolChangeError::UnknownTool(9)));
}

#[tokio::test(start_paused = true)]
async fn test_smart_load_parks_every_ready_slot() {
    let mut units = pla_unit();
    units[2] = SimSlot::empty();
    let rig = Rig::new(vec![units]).await;
    rig.world.jam(3);

    let report = rig.changer.smart_load().await.unwrap();

    assert_eq!(report, SmartLoadReport { loaded: 2, total: 3 });
    assert!(rig.machine.sensors.path_free());
    assert_eq!(rig.machine.filament_position(), FilamentPosition::Bowden);
    assert_eq!(rig.machine.current_tool(), None);
    assert!(rig.world.position(0) > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_smart_load_needs_clear_path() {
    let rig = Rig::new(vec![pla_unit()]).await;
    rig.world.place(0, SPLITTER_AT + 10.0);

    let err = rig.changer.smart_load().await.unwrap_err();

    assert!(matches!(err, ToolChangeError::Implausible(_)));
}
