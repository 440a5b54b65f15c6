use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How far filament has progressed from a slot toward the nozzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilamentPosition {
    /// Parked in the unit; the shared path is clear.
    #[default]
    Bowden,
    /// At or past the splitter sensor.
    Splitter,
    /// At the toolhead sensor.
    Toolhead,
    /// In the nozzle, ready to print.
    Nozzle,
}

impl FilamentPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilamentPosition::Bowden => "bowden",
            FilamentPosition::Splitter => "splitter",
            FilamentPosition::Toolhead => "toolhead",
            FilamentPosition::Nozzle => "nozzle",
        }
    }

    /// Lowest position consistent with the two sensors.
    pub fn from_sensors(nozzle_present: bool, splitter_present: bool) -> Self {
        if nozzle_present {
            FilamentPosition::Nozzle
        } else if splitter_present {
            FilamentPosition::Splitter
        } else {
            FilamentPosition::Bowden
        }
    }

    /// Filament occupies the shared path and must be unloaded before another slot feeds.
    pub fn occupies_path(&self) -> bool {
        *self != FilamentPosition::Bowden
    }
}

impl fmt::Display for FilamentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized position name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filament position: {0}")]
pub struct ParsePositionError(pub String);

impl FromStr for FilamentPosition {
    type Err = ParsePositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bowden" => Ok(FilamentPosition::Bowden),
            "splitter" => Ok(FilamentPosition::Splitter),
            "toolhead" => Ok(FilamentPosition::Toolhead),
            "nozzle" => Ok(FilamentPosition::Nozzle),
            other => Err(ParsePositionError(other.to_string())),
        }
    }
}
