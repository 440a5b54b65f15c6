//! Shared context for the orchestration layers.

use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::guard::Coordination;
use crate::host::{tool_value, Console, PrintHost};
use crate::position::FilamentPosition;
use crate::registry::UnitRegistry;
use crate::scheduler::Scheduler;
use crate::sensor::{SensorHub, SensorKind};
use crate::store::{Store, StoreExt, CURRENT_INDEX, FILAMENT_POS};

/// Everything the tool changer, runout monitor and endless spool share.
pub struct Machine {
    pub registry: UnitRegistry,
    pub sensors: SensorHub,
    pub host: Arc<dyn PrintHost>,
    pub console: Arc<dyn Console>,
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<dyn Scheduler>,
    pub coordination: Coordination,
    pub config: EngineConfig,
}

impl Machine {
    /// Loaded tool, `None` when the path is empty.
    pub fn current_tool(&self) -> Option<usize> {
        let raw: i64 = self.store.get_or(CURRENT_INDEX, -1);
        usize::try_from(raw).ok()
    }

    pub fn set_current_tool(&self, tool: Option<usize>) -> Result<(), StoreError> {
        debug!(tool = tool_value(tool), "current tool");
        self.store.save(CURRENT_INDEX, &tool_value(tool))
    }

    pub fn filament_position(&self) -> FilamentPosition {
        self.store.get_or(FILAMENT_POS, FilamentPosition::Bowden)
    }

    pub fn set_filament_position(&self, position: FilamentPosition) -> Result<(), StoreError> {
        debug!(%position, "filament position");
        self.store.save(FILAMENT_POS, &position)
    }

    /// Position implied by the sensors alone.
    pub fn sensed_position(&self) -> FilamentPosition {
        FilamentPosition::from_sensors(
            self.sensors.present(SensorKind::Nozzle),
            self.sensors.present(SensorKind::Splitter),
        )
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("units", &self.registry.len())
            .field("current_tool", &self.current_tool())
            .field("position", &self.filament_position())
            .finish()
    }
}
