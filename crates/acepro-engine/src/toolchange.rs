//! Tool-change orchestration.
//!
//! A change runs in a fixed order: reconcile the stored filament position
//! with the sensors, run the pre hook, unload the current tool, wait for the
//! target spool, load it to the nozzle, then run the post hook. The stored
//! position is only advanced after the sensor that proves it has triggered.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ToolChangeError;
use crate::host::{tool_value, ButtonStyle, PrintState, Prompt};
use crate::machine::Machine;
use crate::position::FilamentPosition;
use crate::registry::UnitRegistry;
use crate::scheduler::wait_for;
use crate::sensor::SensorKind;
use crate::unit::{RetractOutcome, Unit, SLOTS_PER_UNIT};

type Result<T> = std::result::Result<T, ToolChangeError>;

const SENSOR_POLL: Duration = Duration::from_millis(50);
const UNLOAD_SETTLE: Duration = Duration::from_secs(1);
const IDENTIFY_SETTLE: Duration = Duration::from_millis(500);

/// What kind of change is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMode {
    Normal,
    /// The current spool is depleted; its unload is skipped.
    EndlessSpool,
}

/// How a tool change ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The target was already at the nozzle.
    AlreadyLoaded(usize),
    /// The target was loaded but the stored position was stale.
    StateCorrected(usize),
    Loaded {
        from: Option<usize>,
        to: usize,
        unit: usize,
    },
    Unloaded {
        from: Option<usize>,
    },
}

impl fmt::Display for ChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOutcome::AlreadyLoaded(tool) => write!(f, "tool {tool} (already loaded)"),
            ChangeOutcome::StateCorrected(tool) => write!(f, "tool {tool} (state corrected)"),
            ChangeOutcome::Loaded { from, to, unit } => {
                write!(f, "tool {} -> {to} (unit {unit})", tool_value(*from))
            }
            ChangeOutcome::Unloaded { from } => write!(f, "unloaded tool {}", tool_value(*from)),
        }
    }
}

/// Result of [`ToolChanger::smart_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmartLoadReport {
    pub loaded: usize,
    pub total: usize,
}

/// Runs tool changes, loads and unloads against the shared [`Machine`].
#[derive(Debug, Clone)]
pub struct ToolChanger {
    machine: Arc<Machine>,
}

impl ToolChanger {
    pub fn new(machine: Arc<Machine>) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    fn locate(&self, tool: usize) -> Result<(Arc<Unit>, usize)> {
        self.machine
            .registry
            .locate(tool)
            .ok_or(ToolChangeError::UnknownTool(tool))
    }

    /// Change from the stored current tool to `target`; `None` unloads only.
    ///
    /// On failure the operator is told why and, for a normal change during a
    /// print, the job is paused.
    pub async fn change_tool(&self, target: Option<usize>, mode: ChangeMode) -> Result<ChangeOutcome> {
        let m = &*self.machine;
        let _scope = m.coordination.toolchange_scope();
        let current = m.current_tool();
        info!(from = tool_value(current), to = tool_value(target), ?mode, "tool change");

        match self.run_change(current, target, mode).await {
            Ok(outcome) => {
                info!(%outcome, "tool change complete");
                Ok(outcome)
            }
            Err(err) => {
                error!(from = tool_value(current), to = tool_value(target), %err, "tool change failed");
                m.console.info(&format!("ACE: tool change failed: {err}"));
                if mode == ChangeMode::Normal && !err.is_fatal() {
                    if let Ok(PrintState::Printing) = m.host.print_state() {
                        if let Err(pause_err) = m.host.pause() {
                            warn!(%pause_err, "failed to pause after tool change error");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn run_change(
        &self,
        mut current: Option<usize>,
        target: Option<usize>,
        mode: ChangeMode,
    ) -> Result<ChangeOutcome> {
        let m = &*self.machine;
        let tc = &m.config.toolchange;

        let nozzle = m.sensors.present(SensorKind::Nozzle);
        let splitter = m.sensors.present(SensorKind::Splitter);
        let position = m.filament_position();
        debug!(nozzle, splitter, %position, current = tool_value(current), "plausibility check");

        if (nozzle || splitter) && position == FilamentPosition::Bowden {
            warn!(%position, "sensors report filament but position is parked, clearing path");
            m.console.info("ACE: filament detected while parked, clearing path");
            self.smart_unload(current).await?;
            current = None;
        } else if !nozzle && splitter && position == FilamentPosition::Splitter {
            warn!("filament stopped at the splitter, clearing path");
            self.smart_unload(current).await?;
            current = None;
        }

        let target_temp = match target {
            Some(tool) => {
                let (unit, slot) = self.locate(tool)?;
                unit.slot(slot).map_or(0, |s| s.temp)
            }
            None => 0,
        };

        if let Some(tool) = target.filter(|t| current == Some(*t)) {
            if let Some(outcome) = self.reselect(tool).await? {
                return Ok(outcome);
            }
        }

        if !tc.pre_toolchange_macro.is_empty() {
            m.host.run_gcode(&format!(
                "{} FROM={} TO={} TARGET_TEMP={target_temp}",
                tc.pre_toolchange_macro,
                tool_value(current),
                tool_value(target)
            ))?;
        }

        match (current, mode) {
            (Some(_), ChangeMode::EndlessSpool) => {
                info!(from = tool_value(current), "depleted spool, skipping unload");
                m.set_filament_position(FilamentPosition::Bowden)?;
            }
            (Some(tool), ChangeMode::Normal) => match m.filament_position() {
                FilamentPosition::Bowden => {
                    info!(tool, "current tool parked, skipping unload");
                }
                position => {
                    if position == FilamentPosition::Nozzle && !m.sensors.present(SensorKind::Nozzle) {
                        warn!(tool, "position says nozzle but sensor is clear, unloading anyway");
                    }
                    self.smart_unload(Some(tool)).await?;
                }
            },
            (None, _) => debug!("no current tool, skipping unload"),
        }

        let Some(tool) = target else {
            m.set_current_tool(None)?;
            m.host.set_active_tool_variable(None)?;
            return Ok(ChangeOutcome::Unloaded { from: current });
        };

        let (unit, slot) = self.locate(tool)?;
        self.wait_spool_ready(&unit, slot, tool).await?;
        let purged = self.load_to_nozzle(&unit, slot, tool).await?;

        m.set_current_tool(Some(tool))?;
        m.host.set_active_tool_variable(Some(tool))?;
        unit.enable_feed_assist(slot).await?;
        m.coordination.request_rebaseline();
        if !m.coordination.set_detection_active(true) {
            info!("runout detection re-enabled after tool change");
        }

        let mut purge_length = tc.purge_length;
        if mode == ChangeMode::EndlessSpool && current.is_some() {
            purge_length *= m.config.endless_spool.purge_multiplier;
        }
        purge_length *= tc.purge_multiplier;

        if !tc.post_toolchange_macro.is_empty() {
            m.host.run_gcode(&format!(
                "{} FROM={} TO={tool} PURGELENGTH={purge_length:.1} PURGESPEED={:.0} \
                 TARGET_TEMP={target_temp} PURGED_AMOUNT={purged:.1} PURGE_MAX_CHUNK_LENGTH={:.0}",
                tc.post_toolchange_macro,
                tool_value(current),
                tc.purge_speed,
                tc.purge_max_chunk_length,
            ))?;
        }

        Ok(ChangeOutcome::Loaded {
            from: current,
            to: tool,
            unit: unit.index(),
        })
    }

    /// Selecting the tool that is already current.
    ///
    /// Returns `Some` when nothing more needs to happen, `None` to continue
    /// with a normal load.
    async fn reselect(&self, tool: usize) -> Result<Option<ChangeOutcome>> {
        let m = &*self.machine;
        let tc = &m.config.toolchange;
        let mut position = m.filament_position();
        let nozzle = m.sensors.present(SensorKind::Nozzle);

        if m.sensors.has_splitter()
            && position == FilamentPosition::Nozzle
            && nozzle
            && !m.sensors.present(SensorKind::Splitter)
        {
            return Err(ToolChangeError::Implausible(format!(
                "tool {tool} is at the nozzle but nothing is at the splitter; clear the path manually"
            )));
        }

        if position == FilamentPosition::Nozzle {
            if nozzle {
                let (unit, slot) = self.locate(tool)?;
                info!(tool, slot, "already loaded, re-enabling feed assist");
                unit.enable_feed_assist(slot).await?;
                if tc.reselect_purge_length > 0.0 {
                    m.host.extrude(tc.reselect_purge_length, tc.reselect_purge_speed)?;
                }
                return Ok(Some(ChangeOutcome::AlreadyLoaded(tool)));
            }

            position = if m.sensors.present(SensorKind::Splitter) {
                FilamentPosition::Splitter
            } else {
                FilamentPosition::Bowden
            };
            warn!(tool, %position, "position said nozzle but sensor is clear, corrected");
            m.set_filament_position(position)?;
        }

        if nozzle {
            info!(tool, "nozzle sensor triggered, correcting position to nozzle");
            m.set_filament_position(FilamentPosition::Nozzle)?;
            return Ok(Some(ChangeOutcome::StateCorrected(tool)));
        }

        if !m.sensors.path_free() {
            warn!(tool, %position, "path blocked, clearing before reload");
            self.smart_unload(None).await?;
        }
        Ok(None)
    }

    /// Wait until both the inventory and the device say the slot is ready.
    ///
    /// If it is not ready right away the operator is prompted and the slot
    /// must then stay ready for `spool_ready_stable` before the load goes on.
    pub async fn wait_spool_ready(&self, unit: &Unit, slot: usize, tool: usize) -> Result<()> {
        let m = &*self.machine;
        let tc = &m.config.toolchange;
        let ready = || {
            unit.slot(slot).is_some_and(|s| s.status.is_ready()) && unit.device_slot_status(slot).is_ready()
        };

        unit.wait_ready().await?;
        if ready() {
            return Ok(());
        }

        let inventory = unit.slot(slot).map(|s| s.status).unwrap_or_default();
        let device = unit.device_slot_status(slot);
        warn!(tool, unit = unit.index(), slot, %inventory, %device, "spool not ready, waiting");
        m.console.show_prompt(
            &Prompt::new(
                "Spool Not Ready",
                format!(
                    "Spool not ready on ACE {} slot {slot} (T{tool}): inventory={inventory}, ACE={device}. \
                     Reload the spool; loading continues once it is detected and stable.",
                    unit.index()
                ),
            )
            .footer_button("Cancel Print", "CANCEL_PRINT", ButtonStyle::Error),
        );

        let start = m.scheduler.now();
        let mut stable_since = None;
        loop {
            let now = m.scheduler.now();
            if now.saturating_duration_since(start) > tc.spool_ready_timeout {
                m.console.close_prompt();
                return Err(ToolChangeError::SpoolNotReady { tool });
            }

            if let Err(err) = unit.refresh_status().await {
                debug!(unit = unit.index(), %err, "status refresh failed while waiting for spool");
            }
            if ready() {
                let since = *stable_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= tc.spool_ready_stable {
                    info!(tool, "spool stable and ready");
                    m.console.close_prompt();
                    return Ok(());
                }
            } else if stable_since.take().is_some() {
                debug!(tool, "spool left ready state, restarting stability timer");
            }

            m.scheduler.sleep(tc.spool_ready_interval).await;
        }
    }

    /// Feed `tool` to the nozzle. Returns the length purged through the nozzle.
    ///
    /// A failed load stops the feed, pulls back `load_failure_retract_length`
    /// and records the position the sensors still see.
    pub async fn load_to_nozzle(&self, unit: &Unit, slot: usize, tool: usize) -> Result<f64> {
        let m = &*self.machine;
        match self.feed_to_nozzle(unit, slot).await {
            Ok(purged) => Ok(purged),
            Err(err) => {
                warn!(tool, %err, "load failed, recovering");
                if let Err(stop_err) = unit.stop_feed(slot).await {
                    debug!(%stop_err, "stop_feed during recovery failed");
                }
                let length = m.config.toolchange.load_failure_retract_length;
                if let Err(retract_err) = unit.retract(slot, length, unit.config().retract_speed).await {
                    warn!(%retract_err, "recovery retract failed");
                }
                m.set_filament_position(m.sensed_position())?;
                Err(ToolChangeError::LoadFailed {
                    tool,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn feed_to_nozzle(&self, unit: &Unit, slot: usize) -> Result<f64> {
        let m = &*self.machine;
        let cfg = unit.config();
        unit.wait_ready().await?;

        let sensor = m.sensors.verification_sensor();
        if m.sensors.present(sensor) {
            return Err(ToolChangeError::Implausible(format!(
                "filament already at the {sensor} sensor"
            )));
        }

        self.feed_to_sensor(unit, slot, sensor).await?;

        if sensor == SensorKind::Splitter {
            m.set_filament_position(FilamentPosition::Splitter)?;
            self.feed_splitter_to_toolhead(unit, slot).await?;
        }
        m.set_filament_position(FilamentPosition::Toolhead)?;

        m.host.extrude(cfg.extruder_feeding_length, cfg.extruder_feeding_speed)?;
        m.host.extrude(cfg.toolhead_full_purge_length, cfg.toolhead_slow_loading_speed)?;
        m.set_filament_position(FilamentPosition::Nozzle)?;
        info!(unit = unit.index(), slot, purged = cfg.toolhead_full_purge_length, "filament at nozzle");
        Ok(cfg.toolhead_full_purge_length)
    }

    /// Feed until `sensor` triggers, then in increments up to the maximum length.
    ///
    /// Returns the length fed.
    async fn feed_to_sensor(&self, unit: &Unit, slot: usize, sensor: SensorKind) -> Result<u32> {
        let m = &*self.machine;
        let cfg = unit.config();

        if unit.feed_assist() == Some(slot) {
            unit.disable_feed_assist(slot).await?;
        }

        let length = cfg.toolchange_load_length;
        unit.feed(slot, length, cfg.feed_speed).await?;
        let timeout = cfg.motion_timeout(length, cfg.feed_speed);
        let reached = wait_for(&*m.scheduler, timeout, SENSOR_POLL, || m.sensors.present(sensor)).await;
        unit.stop_feed(slot).await?;

        let mut fed = length;
        if let Some(took) = reached {
            debug!(unit = unit.index(), slot, %sensor, ?took, "sensor reached");
            return Ok(fed);
        }

        let step = cfg.incremental_feeding_length;
        let dwell = Duration::from_secs_f64(step as f64 / cfg.incremental_feeding_speed.max(1) as f64)
            + Duration::from_millis(100);
        while fed < cfg.total_max_feeding_length {
            info!(unit = unit.index(), slot, %sensor, fed, "incremental feed");
            unit.feed(slot, step, cfg.incremental_feeding_speed).await?;
            fed += step;
            if wait_for(&*m.scheduler, dwell, SENSOR_POLL, || m.sensors.present(sensor))
                .await
                .is_some()
            {
                unit.stop_feed(slot).await?;
                return Ok(fed);
            }
        }

        if m.sensors.present(sensor) {
            return Ok(fed);
        }
        Err(ToolChangeError::SensorTimeout {
            sensor: sensor.as_str(),
            fed_mm: fed,
        })
    }

    /// Second phase: splitter to toolhead, with extruder pulls if the feed alone stalls.
    async fn feed_splitter_to_toolhead(&self, unit: &Unit, slot: usize) -> Result<()> {
        let m = &*self.machine;
        let cfg = unit.config();
        let at_nozzle = || m.sensors.present(SensorKind::Nozzle);

        let length = cfg.parkposition_to_toolhead_length;
        unit.feed(slot, length, cfg.feed_speed).await?;
        let timeout = cfg.motion_timeout(length, cfg.feed_speed);
        let reached = wait_for(&*m.scheduler, timeout, SENSOR_POLL, at_nozzle).await;
        unit.stop_feed(slot).await?;
        if reached.is_some() {
            return Ok(());
        }

        let step = cfg.incremental_feeding_length;
        let dwell = Duration::from_secs_f64(step as f64 / cfg.incremental_feeding_speed.max(1) as f64)
            + Duration::from_millis(100);
        let mut fed = length;
        while fed < cfg.total_max_feeding_length && !at_nozzle() {
            unit.feed(slot, step, cfg.incremental_feeding_speed).await?;
            m.host.extrude(cfg.extruder_feeding_length, cfg.extruder_feeding_speed)?;
            fed += step;
            if wait_for(&*m.scheduler, dwell, SENSOR_POLL, at_nozzle).await.is_some() {
                unit.stop_feed(slot).await?;
                break;
            }
        }

        if at_nozzle() {
            Ok(())
        } else {
            Err(ToolChangeError::SensorTimeout {
                sensor: SensorKind::Nozzle.as_str(),
                fed_mm: fed,
            })
        }
    }

    /// Clear the filament path.
    ///
    /// With a known tool its slot is pulled back; with `None` the loaded slot
    /// is identified by test retractions first.
    pub async fn smart_unload(&self, tool: Option<usize>) -> Result<()> {
        let m = &*self.machine;
        let _scope = m.coordination.toolchange_scope();

        match tool {
            Some(tool) => self.unload_tool(tool).await?,
            None => {
                if m.sensors.path_free() {
                    info!("path already clear");
                } else {
                    let stored = m.current_tool();
                    self.identify_and_unload(stored).await?;
                    if stored.is_some() && m.sensors.path_free() {
                        m.set_current_tool(None)?;
                    }
                }
            }
        }
        m.set_filament_position(FilamentPosition::Bowden)?;
        Ok(())
    }

    async fn unload_tool(&self, tool: usize) -> Result<()> {
        let m = &*self.machine;
        let tc = &m.config.toolchange;
        let (unit, slot) = self.locate(tool)?;

        if unit.slot(slot).is_some_and(|s| s.status.is_empty()) && unit.device_slot_status(slot).is_empty() {
            return Err(ToolChangeError::UnloadFailed(format!(
                "slot {slot} of unit {} is empty, cannot pull tool {tool} back",
                unit.index()
            )));
        }

        let park = unit.config().parkposition_to_toolhead_length;
        let length = if m.sensors.instant_present(SensorKind::Nozzle) {
            info!(tool, length = tc.toolhead_retraction_length, "retracting out of the nozzle");
            m.host.extrude(-tc.toolhead_retraction_length, tc.toolhead_retraction_speed)?;
            park + tc.toolhead_retraction_length.round() as u32
        } else {
            park
        };

        self.unload_slot(&unit, slot, length).await?;
        if !m.sensors.path_free_instant() {
            return Err(ToolChangeError::UnloadFailed(format!(
                "tool {tool} retracted but the path is still blocked"
            )));
        }
        info!(tool, "unloaded");
        Ok(())
    }

    async fn identify_and_unload(&self, hint: Option<usize>) -> Result<usize> {
        let m = &*self.machine;
        let tc = &m.config.toolchange;

        let mut candidates: Vec<usize> = hint.into_iter().collect();
        for unit in m.registry.iter() {
            for slot in 0..SLOTS_PER_UNIT {
                let tool = UnitRegistry::tool_index(unit.index(), slot);
                if !candidates.contains(&tool) && unit.slot(slot).is_some_and(|s| !s.status.is_empty()) {
                    candidates.push(tool);
                }
            }
        }

        let watched = if m.sensors.present(SensorKind::Nozzle) {
            SensorKind::Nozzle
        } else {
            SensorKind::Splitter
        };
        info!(?candidates, sensor = %watched, "identifying loaded slot");

        for tool in candidates {
            let (unit, slot) = self.locate(tool)?;
            let cfg = unit.config();
            if m.sensors.instant_present(SensorKind::Nozzle) {
                m.host.extrude(-tc.toolhead_retraction_length, tc.toolhead_retraction_speed)?;
            }
            unit.retract(slot, cfg.parkposition_to_rdm_length, cfg.retract_speed).await?;
            m.scheduler.sleep(IDENTIFY_SETTLE).await;

            if !m.sensors.present(watched) {
                info!(tool, "loaded slot identified");
                self.unload_slot(&unit, slot, cfg.parkposition_to_toolhead_length).await?;
                return Ok(tool);
            }
            debug!(tool, "sensor unchanged, trying next slot");
        }

        Err(ToolChangeError::UnloadFailed(
            "could not identify which slot is loaded".to_string(),
        ))
    }

    /// Pull a slot back until the path is clear.
    pub async fn unload_slot(&self, unit: &Unit, slot: usize, length: u32) -> Result<()> {
        let m = &*self.machine;
        let cfg = unit.config();

        if unit.feed_assist() == Some(slot) {
            unit.disable_feed_assist(slot).await?;
        }

        let outcome = unit.retract(slot, length, cfg.retract_speed).await?;
        m.scheduler.sleep(UNLOAD_SETTLE).await;

        let mut pulled = length;
        if outcome != RetractOutcome::SlotEmpty {
            while !m.sensors.path_free() && pulled < cfg.total_max_feeding_length {
                let step = cfg.incremental_feeding_length;
                debug!(unit = unit.index(), slot, pulled, "incremental retract");
                match unit.retract(slot, step, cfg.incremental_feeding_speed).await? {
                    RetractOutcome::SlotEmpty => break,
                    _ => pulled += step,
                }
            }
        }

        if m.sensors.path_free() {
            Ok(())
        } else {
            let sensor = if m.sensors.present(SensorKind::Nozzle) {
                SensorKind::Nozzle
            } else {
                SensorKind::Splitter
            };
            Err(ToolChangeError::SensorTimeout {
                sensor: sensor.as_str(),
                fed_mm: pulled,
            })
        }
    }

    /// Load every ready slot to the verification sensor and park it again.
    pub async fn smart_load(&self) -> Result<SmartLoadReport> {
        let m = &*self.machine;
        let _scope = m.coordination.toolchange_scope();

        if !m.sensors.path_free() {
            return Err(ToolChangeError::Implausible(
                "filament path must be clear before smart load".to_string(),
            ));
        }

        let sensor = m.sensors.verification_sensor();
        let mut report = SmartLoadReport::default();
        for unit in m.registry.iter() {
            let cfg = unit.config();
            let park = if m.sensors.has_splitter() {
                cfg.parkposition_to_rdm_length
            } else {
                cfg.parkposition_to_toolhead_length
            };

            for slot in 0..SLOTS_PER_UNIT {
                if !unit.slot(slot).is_some_and(|s| s.status.is_ready()) {
                    continue;
                }
                report.total += 1;

                match self.feed_to_sensor(unit, slot, sensor).await {
                    Ok(fed) => {
                        unit.retract(slot, park, cfg.retract_speed).await?;
                        info!(unit = unit.index(), slot, fed, "slot loaded and parked");
                        report.loaded += 1;
                    }
                    Err(err) => {
                        warn!(unit = unit.index(), slot, %err, "smart load failed for slot, parking");
                        if let Err(stop_err) = unit.stop_feed(slot).await {
                            debug!(%stop_err, "stop_feed failed");
                        }
                        if let Err(retract_err) = unit.retract(slot, park, cfg.retract_speed).await {
                            warn!(%retract_err, "parking retract failed");
                        }
                    }
                }
            }
        }

        if report.loaded > 0 {
            m.set_filament_position(FilamentPosition::Bowden)?;
            m.set_current_tool(None)?;
        }
        info!(loaded = report.loaded, total = report.total, "smart load finished");
        Ok(report)
    }
}
