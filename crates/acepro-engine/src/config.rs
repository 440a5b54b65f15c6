//! Engine configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a partial JSON
//! document only overrides what it names. Durations are given in seconds.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::slot::RfidTempMode;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unit: UnitConfig,
    /// Per-unit overrides, e.g. `"feed_speed": "60,1:80"`.
    pub unit_overrides: BTreeMap<String, String>,
    pub toolchange: ToolChangeConfig,
    pub retry: RetryPolicy,
    pub runout: RunoutConfig,
    pub endless_spool: EndlessSpoolConfig,
    pub connection: ConnectionConfig,
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.unit.validate()?;
        config.toolchange.validate()?;
        if config.connection.check_interval.is_zero() {
            return Err(invalid("connection.check_interval", "must be greater than zero"));
        }
        Ok(config)
    }

    /// Unit configuration with per-unit overrides applied.
    pub fn unit_config(&self, unit: usize) -> Result<UnitConfig, ConfigError> {
        let mut config = self.unit.clone();
        for (field, raw) in &self.unit_overrides {
            let value = parse_instance_value::<u32>(field, raw)?.get(unit);
            match field.as_str() {
                "feed_speed" => config.feed_speed = value,
                "retract_speed" => config.retract_speed = value,
                "toolchange_load_length" => config.toolchange_load_length = value,
                "parkposition_to_toolhead_length" => config.parkposition_to_toolhead_length = value,
                "parkposition_to_rdm_length" => config.parkposition_to_rdm_length = value,
                "incremental_feeding_length" => config.incremental_feeding_length = value,
                "incremental_feeding_speed" => config.incremental_feeding_speed = value,
                "total_max_feeding_length" => config.total_max_feeding_length = value,
                "max_dryer_temperature" => config.max_dryer_temperature = value,
                other => return Err(ConfigError::UnknownField(other.to_string())),
            }
        }
        config.validate()?;
        Ok(config)
    }
}

/// A value with optional per-unit overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceValue<T> {
    pub default: T,
    pub per_unit: BTreeMap<usize, T>,
}

impl<T: Copy> InstanceValue<T> {
    pub fn get(&self, unit: usize) -> T {
        self.per_unit.get(&unit).copied().unwrap_or(self.default)
    }
}

/// Parse `"default"` or `"default,unit:value,unit:value"`.
pub fn parse_instance_value<T: FromStr>(
    field: &str,
    raw: &str,
) -> Result<InstanceValue<T>, ConfigError> {
    let invalid = || ConfigError::InstanceValue {
        field: field.to_string(),
        value: raw.to_string(),
    };

    let mut parts = raw.split(',').map(str::trim);
    let default = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(invalid)?
        .parse::<T>()
        .map_err(|_| invalid())?;

    let mut per_unit = BTreeMap::new();
    for part in parts {
        let (unit, value) = part.split_once(':').ok_or_else(invalid)?;
        let unit = unit.trim().parse::<usize>().map_err(|_| invalid())?;
        let value = value.trim().parse::<T>().map_err(|_| invalid())?;
        per_unit.insert(unit, value);
    }

    Ok(InstanceValue { default, per_unit })
}

/// Per-unit motion and housekeeping settings. Lengths in mm, speeds in mm/s.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub feed_speed: u32,
    pub retract_speed: u32,
    pub toolchange_load_length: u32,
    pub parkposition_to_toolhead_length: u32,
    pub parkposition_to_rdm_length: u32,
    pub incremental_feeding_length: u32,
    pub incremental_feeding_speed: u32,
    pub total_max_feeding_length: u32,
    pub extruder_feeding_length: f64,
    pub extruder_feeding_speed: f64,
    pub toolhead_slow_loading_speed: f64,
    pub toolhead_full_purge_length: f64,
    /// Expected motion time is multiplied by this to get a timeout.
    pub timeout_multiplier: f64,
    #[serde(with = "secs")]
    pub heartbeat_interval: Duration,
    pub max_dryer_temperature: u32,
    pub rfid_temp_mode: RfidTempMode,
    pub rfid_inventory_sync: bool,
    #[serde(with = "secs")]
    pub ready_timeout: Duration,
    #[serde(with = "secs")]
    pub ready_poll_interval: Duration,
    #[serde(with = "secs")]
    pub ready_refresh_interval: Duration,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            feed_speed: 60,
            retract_speed: 50,
            toolchange_load_length: 3000,
            parkposition_to_toolhead_length: 1000,
            parkposition_to_rdm_length: 150,
            incremental_feeding_length: 50,
            incremental_feeding_speed: 30,
            total_max_feeding_length: 2500,
            extruder_feeding_length: 1.0,
            extruder_feeding_speed: 5.0,
            toolhead_slow_loading_speed: 5.0,
            toolhead_full_purge_length: 22.0,
            timeout_multiplier: 2.0,
            heartbeat_interval: Duration::from_secs(1),
            max_dryer_temperature: 60,
            rfid_temp_mode: RfidTempMode::Average,
            rfid_inventory_sync: true,
            ready_timeout: Duration::from_secs(60),
            ready_poll_interval: Duration::from_millis(500),
            ready_refresh_interval: Duration::from_secs(25),
        }
    }
}

impl UnitConfig {
    /// Reject values that would stall or panic a motion sequence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        nonzero("feed_speed", self.feed_speed)?;
        nonzero("retract_speed", self.retract_speed)?;
        nonzero("incremental_feeding_length", self.incremental_feeding_length)?;
        nonzero("incremental_feeding_speed", self.incremental_feeding_speed)?;
        positive("timeout_multiplier", self.timeout_multiplier)?;
        positive("extruder_feeding_speed", self.extruder_feeding_speed)?;
        positive("toolhead_slow_loading_speed", self.toolhead_slow_loading_speed)?;
        non_negative("extruder_feeding_length", self.extruder_feeding_length)?;
        non_negative("toolhead_full_purge_length", self.toolhead_full_purge_length)?;
        if self.ready_poll_interval.is_zero() {
            return Err(invalid("ready_poll_interval", "must be greater than zero"));
        }
        Ok(())
    }

    /// Time a move of `length` at `speed` should take, scaled by the timeout multiplier.
    pub fn motion_timeout(&self, length: u32, speed: u32) -> Duration {
        let speed = speed.max(1) as f64;
        Duration::try_from_secs_f64(length as f64 / speed * self.timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Tool-change sequencing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolChangeConfig {
    /// Extruder pull used when unloading from the nozzle.
    pub toolhead_retraction_length: f64,
    pub toolhead_retraction_speed: f64,
    pub purge_length: f64,
    pub purge_speed: f64,
    pub purge_multiplier: f64,
    pub purge_max_chunk_length: f64,
    /// Purged when the already-loaded tool is selected again.
    pub reselect_purge_length: f64,
    pub reselect_purge_speed: f64,
    /// Retracted after a failed load.
    pub load_failure_retract_length: u32,
    #[serde(with = "secs")]
    pub spool_ready_timeout: Duration,
    #[serde(with = "secs")]
    pub spool_ready_interval: Duration,
    #[serde(with = "secs")]
    pub spool_ready_stable: Duration,
    pub pre_toolchange_macro: String,
    pub post_toolchange_macro: String,
}

impl ToolChangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("toolchange.toolhead_retraction_speed", self.toolhead_retraction_speed)?;
        positive("toolchange.reselect_purge_speed", self.reselect_purge_speed)?;
        non_negative("toolchange.toolhead_retraction_length", self.toolhead_retraction_length)?;
        non_negative("toolchange.purge_length", self.purge_length)?;
        non_negative("toolchange.purge_multiplier", self.purge_multiplier)?;
        if self.spool_ready_interval.is_zero() {
            return Err(invalid("toolchange.spool_ready_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ToolChangeConfig {
    fn default() -> Self {
        Self {
            toolhead_retraction_length: 40.0,
            toolhead_retraction_speed: 10.0,
            purge_length: 50.0,
            purge_speed: 400.0,
            purge_multiplier: 1.0,
            purge_max_chunk_length: 300.0,
            reselect_purge_length: 10.0,
            reselect_purge_speed: 5.0,
            load_failure_retract_length: 100,
            spool_ready_timeout: Duration::from_secs(300),
            spool_ready_interval: Duration::from_secs(1),
            spool_ready_stable: Duration::from_secs(3),
            pre_toolchange_macro: "_ACE_PRE_TOOLCHANGE".to_string(),
            post_toolchange_macro: "_ACE_POST_TOOLCHANGE".to_string(),
        }
    }
}

/// Retry policy for individual device requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after a FORBIDDEN reply.
    pub forbidden_retries: u32,
    #[serde(with = "secs")]
    pub forbidden_backoff: Duration,
    /// Total attempts when the device does not answer.
    pub no_response_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            forbidden_retries: 2,
            forbidden_backoff: Duration::from_secs(1),
            no_response_attempts: 3,
        }
    }
}

/// Runout and tangle monitoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunoutConfig {
    /// Consecutive absent readings needed to confirm a runout.
    pub debounce_count: u32,
    pub tangle_detection: bool,
    pub tangle_detection_length: f64,
    #[serde(with = "secs")]
    pub printing_interval: Duration,
    #[serde(with = "secs")]
    pub idle_interval: Duration,
    #[serde(with = "secs")]
    pub error_backoff: Duration,
    #[serde(with = "secs")]
    pub self_check_interval: Duration,
}

impl Default for RunoutConfig {
    fn default() -> Self {
        Self {
            debounce_count: 1,
            tangle_detection: false,
            tangle_detection_length: 15.0,
            printing_interval: Duration::from_millis(50),
            idle_interval: Duration::from_millis(200),
            error_backoff: Duration::from_secs(5),
            self_check_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Endless-spool swap.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndlessSpoolConfig {
    /// Load attempts per swap, the first candidate included.
    pub max_attempts: u32,
    /// Purge length factor applied after a swap.
    pub purge_multiplier: f64,
}

impl Default for EndlessSpoolConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            purge_multiplier: 1.5,
        }
    }
}

/// Link supervision.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Pause and prompt when a unit's link keeps reconnecting.
    pub supervision: bool,
    #[serde(with = "secs")]
    pub check_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            supervision: true,
            check_interval: Duration::from_secs(2),
        }
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn nonzero(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, "must be a finite number greater than zero"));
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be a finite number, zero or more"));
    }
    Ok(())
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
