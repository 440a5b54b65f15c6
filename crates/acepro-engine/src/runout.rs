//! Runout and tangle monitoring.
//!
//! [`RunoutMonitor::poll_once`] runs one cycle and says when the next one
//! is due; [`RunoutMonitor::run`] drives it on the scheduler until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endless::{EndlessSpool, SwapOutcome};
use crate::error::HostError;
use crate::host::{ButtonStyle, PrintState, Prompt};
use crate::machine::Machine;
use crate::sensor::SensorKind;

/// When the next cycle should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    After(Duration),
    /// The host reported a fatal condition. Monitoring is over.
    Stop,
}

/// Extruder travel allowed without encoder movement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TangleWindow {
    limit: Option<f64>,
    encoder: Option<u64>,
}

impl TangleWindow {
    pub fn open(&mut self, limit: f64, encoder: u64) {
        self.limit = Some(limit);
        self.encoder = Some(encoder);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_open(&self) -> bool {
        self.limit.is_some()
    }

    /// Extruder position at which a still encoder means a tangle.
    pub fn limit(&self) -> Option<f64> {
        self.limit
    }

    pub fn encoder(&self) -> Option<u64> {
        self.encoder
    }
}

pub struct RunoutMonitor {
    machine: Arc<Machine>,
    endless: EndlessSpool,
    baseline: Option<bool>,
    absent_count: u32,
    last_printing: bool,
    last_state: Option<PrintState>,
    tangle: TangleWindow,
    last_self_check: Instant,
}

impl RunoutMonitor {
    pub fn new(machine: Arc<Machine>) -> Self {
        let endless = EndlessSpool::new(Arc::clone(&machine));
        let last_self_check = machine.scheduler.now();
        Self {
            machine,
            endless,
            baseline: None,
            absent_count: 0,
            last_printing: false,
            last_state: None,
            tangle: TangleWindow::default(),
            last_self_check,
        }
    }

    /// Last nozzle-sensor reading runouts are measured against.
    pub fn baseline(&self) -> Option<bool> {
        self.baseline
    }

    pub fn tangle(&self) -> &TangleWindow {
        &self.tangle
    }

    fn reset(&mut self) {
        self.baseline = None;
        self.absent_count = 0;
        self.tangle.reset();
    }

    fn mirror(&self, tool: Option<usize>) {
        if let Err(err) = self.machine.host.set_active_tool_variable(tool) {
            warn!(%err, "could not sync macro state");
        }
    }

    /// Run one monitoring cycle.
    pub async fn poll_once(&mut self) -> Next {
        match self.check().await {
            Ok(next) => next,
            Err(err) if err.fatal => {
                error!(%err, "host fatal, runout monitor stopped");
                self.machine.coordination.set_detection_active(false);
                Next::Stop
            }
            Err(err) => {
                warn!(%err, "runout monitor error, backing off");
                Next::After(self.machine.config.runout.error_backoff)
            }
        }
    }

    async fn check(&mut self) -> Result<Next, HostError> {
        let m = Arc::clone(&self.machine);
        let cfg = &m.config.runout;
        let coord = &m.coordination;
        let now = m.scheduler.now();

        if coord.take_rebaseline() {
            self.baseline = Some(m.sensors.present(SensorKind::Nozzle));
            self.absent_count = 0;
            self.tangle.reset();
            debug!(baseline = ?self.baseline, "runout baseline reset");
        }

        let state = m.host.print_state()?;
        let printing = state.is_printing();
        let tool = m.current_tool();
        let sensor = m.sensors.present(SensorKind::Nozzle);

        let was_printing = self.last_printing;
        self.last_printing = printing;
        if self.last_state.as_ref() != Some(&state) {
            info!(
                from = self.last_state.as_ref().map_or("", |s| s.as_str()),
                to = %state,
                "print state changed"
            );
            self.last_state = Some(state.clone());
        }

        if printing && !was_printing && tool.is_some() {
            info!(tool = ?tool, sensor, "print started, initializing runout detection");
            self.baseline = Some(sensor);
            self.absent_count = 0;
            self.last_self_check = now;
            if sensor {
                coord.set_detection_active(true);
            }
            self.mirror(tool);
            return Ok(Next::After(cfg.printing_interval));
        }

        if printing && now.saturating_duration_since(self.last_self_check) >= cfg.self_check_interval {
            self.last_self_check = now;
            if sensor
                && tool.is_some()
                && !coord.detection_active()
                && !coord.toolchange_in_progress()
                && !coord.handling_in_progress()
            {
                warn!(tool = ?tool, "auto-recovery: runout detection was off while printing, re-enabling");
                m.console.info("ACE: auto-recovery: runout detection re-enabled");
                self.baseline = Some(sensor);
                coord.set_detection_active(true);
            }
        }

        if !coord.detection_active() || coord.toolchange_in_progress() {
            self.tangle.reset();
            return Ok(Next::After(cfg.idle_interval));
        }

        let Some(tool) = tool else {
            self.baseline = None;
            self.absent_count = 0;
            return Ok(Next::After(cfg.idle_interval));
        };

        if was_printing && !printing && state != PrintState::Paused {
            info!(%state, "print stopped, resetting runout baseline");
            self.reset();
            self.mirror(None);
            return Ok(Next::After(cfg.idle_interval));
        }

        if !printing {
            self.reset();
            return Ok(Next::After(cfg.idle_interval));
        }

        let Some(previous) = self.baseline else {
            info!(tool, sensor, position = %m.filament_position(), "runout baseline established");
            self.baseline = Some(sensor);
            self.absent_count = 0;
            self.mirror(Some(tool));
            return Ok(Next::After(cfg.printing_interval));
        };

        if previous && !sensor {
            self.absent_count += 1;
            if self.absent_count < cfg.debounce_count.max(1) {
                return Ok(Next::After(cfg.printing_interval));
            }
            self.absent_count = 0;

            if coord.handling_in_progress() {
                debug!(tool, "runout suppressed, already handling one");
            } else {
                warn!(tool, readings = cfg.debounce_count, "runout detected");
                self.handle_runout(tool).await?;
            }
            self.baseline = Some(sensor);
            return Ok(Next::After(cfg.idle_interval));
        }
        self.absent_count = 0;

        if cfg.tangle_detection && !coord.handling_in_progress() {
            self.check_tangle(tool)?;
        }

        self.baseline = Some(sensor);
        Ok(Next::After(cfg.printing_interval))
    }

    async fn handle_runout(&mut self, tool: usize) -> Result<(), HostError> {
        let m = Arc::clone(&self.machine);
        let Some(_handling) = m.coordination.try_handling_scope() else {
            return Ok(());
        };
        self.baseline = None;
        self.absent_count = 0;

        m.console.info(&format!("ACE: runout detected on T{tool}, pausing"));
        if let Err(err) = m.host.pause() {
            if err.fatal {
                return Err(err);
            }
            warn!(%err, "pause failed");
        }

        let (unit, slot) = m
            .registry
            .locate(tool)
            .map_or((None, None), |(u, s)| (Some(u.index()), Some(s)));
        let (material, color) = m
            .registry
            .locate(tool)
            .and_then(|(u, s)| u.slot(s))
            .map(|s| (s.material, s.color))
            .unwrap_or_default();
        info!(tool, material = %material, ?color, "runout spool");

        m.console.show_prompt(
            &Prompt::new(
                "Filament Runout",
                format!(
                    "Filament runout on T{tool} (ACE {}, slot {}) - Material: {material}, Color: RGB({},{},{}). \
                     Refill the spool, then retry or resume.",
                    unit.map_or(-1, |u| u as i64),
                    slot.map_or(-1, |s| s as i64),
                    color[0],
                    color[1],
                    color[2]
                ),
            )
            .button(format!("Retry T{tool}"), format!("T{tool}"), ButtonStyle::Primary)
            .button("Extrude 100mm", "_EXTRUDE LENGTH=100 SPEED=300", ButtonStyle::Secondary)
            .button("Retract 100mm", "_RETRACT LENGTH=100 SPEED=300", ButtonStyle::Secondary)
            .footer_button("Resume", "RESUME", ButtonStyle::Primary)
            .footer_button("Cancel Print", "CANCEL_PRINT", ButtonStyle::Error),
        );

        if !self.endless.enabled() {
            m.console.info("ACE: endless spool disabled, staying paused; refill the spool and resume");
            return Ok(());
        }

        let Some(next) = self.endless.find_match(tool) else {
            m.console.info(&format!(
                "ACE: no endless spool match for T{tool}, staying paused; refill or load matching material"
            ));
            return Ok(());
        };

        m.console.close_prompt();
        match self.endless.execute_swap(tool, next).await {
            SwapOutcome::Swapped { tool: to, attempts } => {
                info!(from = tool, to, attempts, "runout handled by endless spool");
            }
            SwapOutcome::Failed { attempts, reason } => {
                warn!(from = tool, attempts, %reason, "endless spool could not continue the print");
            }
        }
        Ok(())
    }

    fn check_tangle(&mut self, tool: usize) -> Result<(), HostError> {
        let m = Arc::clone(&self.machine);
        if !m.registry.feed_assist_active()
            || !m.sensors.present(SensorKind::Splitter)
            || !m.sensors.present(SensorKind::Nozzle)
        {
            self.tangle.reset();
            return Ok(());
        }
        let Some(encoder) = m.sensors.encoder_pulses() else {
            return Ok(());
        };

        let position = m.host.extruder_position()?;
        let length = m.config.runout.tangle_detection_length;
        let limit = match self.tangle.limit() {
            Some(limit) if self.tangle.encoder() == Some(encoder) => limit,
            _ => {
                self.tangle.open(position + length, encoder);
                return Ok(());
            }
        };
        if position < limit {
            return Ok(());
        }

        warn!(
            tool,
            extruder = position,
            window_start = limit - length,
            encoder,
            "spool tangle detected"
        );
        self.handle_tangle(tool)
    }

    fn handle_tangle(&mut self, tool: usize) -> Result<(), HostError> {
        let m = Arc::clone(&self.machine);
        let _handling = m.coordination.try_handling_scope();
        self.tangle.reset();

        m.console.info(&format!(
            "ACE: spool tangle detected on T{tool}, filament stuck between spool and splitter; pausing"
        ));
        if let Err(err) = m.host.pause() {
            if err.fatal {
                return Err(err);
            }
            warn!(%err, "pause failed");
        }
        m.console.show_prompt(
            &Prompt::new(
                "Spool Tangle Detected",
                format!(
                    "The extruder kept moving but no filament was pulled from the spool for T{tool}. \
                     Untangle the spool, then resume."
                ),
            )
            .footer_button("Resume", "RESUME", ButtonStyle::Primary)
            .footer_button("Cancel Print", "CANCEL_PRINT", ButtonStyle::Error),
        );
        Ok(())
    }

    /// Poll until cancelled or a fatal host error.
    pub async fn run(mut self, cancel: CancellationToken) {
        let m = Arc::clone(&self.machine);
        m.coordination.set_detection_active(true);
        info!("runout monitor started");

        loop {
            let delay = match self.poll_once().await {
                Next::After(delay) => delay,
                Next::Stop => break,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = m.scheduler.sleep(delay) => {}
            }
        }

        m.coordination.set_detection_active(false);
        info!("runout monitor stopped");
    }
}

impl std::fmt::Debug for RunoutMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunoutMonitor")
            .field("baseline", &self.baseline)
            .field("tangle", &self.tangle)
            .finish()
    }
}
