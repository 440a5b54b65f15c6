use std::path::PathBuf;

use acepro_dispatch::DispatchError;

/// Failure reported by a host collaborator (print host, console, macros).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
    /// The host is shutting down or lost its MCU; nothing should retry.
    pub fatal: bool,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Errors from one unit's device operations.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// The device answered with a non-zero code.
    #[error("unit {unit}: {method} failed (code {code}): {msg}")]
    Device {
        unit: usize,
        method: String,
        code: i64,
        msg: String,
    },

    /// The device stayed busy through every retry.
    #[error("unit {unit}: {method} still FORBIDDEN after {attempts} attempts")]
    Forbidden {
        unit: usize,
        method: String,
        attempts: u32,
    },

    /// No reply within the response timeout, for every attempt.
    #[error("unit {unit}: no response to {method} after {attempts} attempts")]
    NoResponse {
        unit: usize,
        method: String,
        attempts: u32,
    },

    /// The unit did not report `ready` in time.
    #[error("unit {unit}: not ready after {waited_secs:.0}s")]
    NotReady { unit: usize, waited_secs: f64 },

    /// Slot index outside `0..SLOTS_PER_UNIT`.
    #[error("unit {unit}: slot {slot} out of range")]
    SlotOutOfRange { unit: usize, slot: usize },

    /// Dryer temperature above the configured maximum.
    #[error("dryer temperature {requested} C exceeds maximum {max} C")]
    DryerTemperature { requested: u32, max: u32 },

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("host error: {0}")]
    Host(#[from] HostError),
}

/// Errors that abort a tool change.
#[derive(Debug, thiserror::Error)]
pub enum ToolChangeError {
    /// No unit owns this tool index.
    #[error("tool {0} is not managed by any unit")]
    UnknownTool(usize),

    /// Stored filament position and sensors disagree and could not be reconciled.
    #[error("implausible filament state: {0}")]
    Implausible(String),

    /// The target spool never became stably ready.
    #[error("spool for tool {tool} is not ready")]
    SpoolNotReady { tool: usize },

    #[error("unload failed: {0}")]
    UnloadFailed(String),

    #[error("load of tool {tool} failed: {reason}")]
    LoadFailed { tool: usize, reason: String },

    /// A feed or retract never reached the expected sensor state.
    #[error("{sensor} sensor not reached after {fed_mm} mm")]
    SensorTimeout { sensor: &'static str, fed_mm: u32 },

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("failed to persist state: {0}")]
    Store(#[from] StoreError),
}

impl ToolChangeError {
    /// The host reported a condition nothing should retry.
    pub fn is_fatal(&self) -> bool {
        match self {
            ToolChangeError::Host(err) => err.fatal,
            ToolChangeError::Unit(UnitError::Host(err)) => err.fatal,
            _ => false,
        }
    }
}

/// Persisted key-value store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store contents: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A `"default,unit:value"` string did not parse.
    #[error("invalid per-unit value for {field}: {value:?}")]
    InstanceValue { field: String, value: String },

    /// An override names a field that has no per-unit form.
    #[error("unknown per-unit field: {0}")]
    UnknownField(String),

    /// A value parsed but is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UnitError>;
