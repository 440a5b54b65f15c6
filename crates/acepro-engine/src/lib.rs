//! Orchestration for ACE Pro filament feeders.
//!
//! Each physical unit is a [`Unit`] driven through its dispatcher handle.
//! The [`UnitRegistry`] owns every unit and maps global tool indices onto
//! them. Tool changes, runout monitoring and endless spool all work against
//! one shared [`Machine`], which also carries the collaborator seams: the
//! [`PrintHost`], the operator [`Console`], the persisted [`Store`], the
//! filament sensors and the [`Scheduler`]. The [`ConnectionMonitor`] pauses
//! a print when a unit's serial link keeps dropping.

pub mod config;
pub mod connection;
pub mod endless;
pub mod error;
pub mod guard;
pub mod host;
pub mod machine;
pub mod position;
pub mod registry;
pub mod runout;
pub mod scheduler;
pub mod sensor;
pub mod slot;
pub mod store;
pub mod toolchange;
pub mod unit;

pub use config::{
    parse_instance_value, ConnectionConfig, EndlessSpoolConfig, EngineConfig, InstanceValue,
    RetryPolicy, RunoutConfig, ToolChangeConfig, UnitConfig,
};
pub use connection::{ConnectionMonitor, CONNECTION_PROMPT_TITLE};
pub use endless::{EndlessSpool, MatchMode, SwapOutcome};
pub use error::{ConfigError, HostError, StoreError, ToolChangeError, UnitError};
pub use guard::{Coordination, ScopedFlag};
pub use host::{ButtonStyle, Console, HostConsole, PrintHost, PrintState, Prompt};
pub use machine::Machine;
pub use position::FilamentPosition;
pub use registry::UnitRegistry;
pub use runout::{Next, RunoutMonitor, TangleWindow};
pub use scheduler::{wait_for, Scheduler, SchedulerFuture, TokioScheduler};
pub use sensor::{FilamentSensor, SensorHub, SensorKind};
pub use slot::{DeviceSlot, FilamentInfo, RfidTempMode, Rgb, Slot, SlotStatus, TempRange, UnitStatus};
pub use store::{JsonFileStore, MemoryStore, SaveMode, Store, StoreExt};
pub use toolchange::{ChangeMode, ChangeOutcome, SmartLoadReport, ToolChanger};
pub use unit::{RetractOutcome, StatusEffects, Unit, SLOTS_PER_UNIT};
