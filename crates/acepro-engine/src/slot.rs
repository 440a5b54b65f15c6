//! Slot inventory and device status payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RGB colour as reported by the unit.
pub type Rgb = [u8; 3];

pub const DEFAULT_MATERIAL: &str = "Unknown";
pub const DEFAULT_COLOR: Rgb = [128, 128, 128];
pub const DEFAULT_TEMP: u32 = 225;

/// Nozzle temperature for a material name, falling back to [`DEFAULT_TEMP`].
pub fn material_temperature(material: &str) -> u32 {
    match material {
        "PLA" => 200,
        "PLA+" => 210,
        "PLA Glow" => 210,
        "PLA High Speed" => 215,
        "PLA Marble" => 205,
        "PLA Matte" => 205,
        "PLA SE" => 210,
        "PLA Silk" => 215,
        "ABS" => 240,
        "ASA" => 245,
        "PETG" => 235,
        "TPU" => 210,
        "PVA" => 185,
        "HIPS" => 230,
        "PC" => 260,
        _ => DEFAULT_TEMP,
    }
}

/// Slot state. Anything other than `empty`/`ready` is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotStatus {
    #[default]
    Empty,
    Ready,
    Other(String),
}

impl SlotStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SlotStatus::Empty => "empty",
            SlotStatus::Ready => "ready",
            SlotStatus::Other(s) => s,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SlotStatus::Ready)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SlotStatus::Empty)
    }
}

impl From<&str> for SlotStatus {
    fn from(s: &str) -> Self {
        match s {
            "empty" => SlotStatus::Empty,
            "ready" => SlotStatus::Ready,
            other => SlotStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SlotStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SlotStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SlotStatus::from(s.as_str()))
    }
}

/// Temperature range from an RFID tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempRange {
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: u32,
}

/// How a tag's extruder temperature range becomes one slot temperature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfidTempMode {
    #[default]
    Average,
    Min,
    Max,
}

/// Pick a slot temperature from a tag range, or from the material table.
pub fn rfid_temperature(range: TempRange, mode: RfidTempMode, material: &str) -> u32 {
    let TempRange { min, max } = range;
    if min == 0 && max == 0 {
        return material_temperature(material);
    }
    match mode {
        RfidTempMode::Min if min > 0 => min,
        RfidTempMode::Max if max > 0 => max,
        _ if min > 0 && max > 0 => (min + max) / 2,
        _ if max > 0 => max,
        _ => min,
    }
}

/// One slot of local inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub status: SlotStatus,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub color: Rgb,
    /// Nozzle temperature, 0 when unknown.
    #[serde(default)]
    pub temp: u32,
    /// Metadata came from an RFID tag.
    #[serde(default)]
    pub rfid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgba: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extruder_temp: Option<TempRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotbed_temp: Option<TempRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diameter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            status: SlotStatus::Empty,
            material: String::new(),
            color: [0, 0, 0],
            temp: 0,
            rfid: false,
            sku: None,
            brand: None,
            icon_type: None,
            rgba: None,
            extruder_temp: None,
            hotbed_temp: None,
            diameter: None,
            total: None,
            current: None,
        }
    }
}

impl Slot {
    /// A ready slot with known material.
    pub fn ready(material: impl Into<String>, color: Rgb, temp: u32) -> Self {
        Self {
            status: SlotStatus::Ready,
            material: material.into(),
            color,
            temp,
            ..Self::default()
        }
    }

    /// Drop everything learned from a tag. The spool is gone.
    pub fn clear_rfid_metadata(&mut self) {
        self.rfid = false;
        self.sku = None;
        self.brand = None;
        self.icon_type = None;
        self.rgba = None;
        self.extruder_temp = None;
        self.hotbed_temp = None;
        self.diameter = None;
        self.total = None;
        self.current = None;
    }

    /// Lowercased, trimmed material; empty and "unknown" both map to `None`.
    pub fn known_material(&self) -> Option<String> {
        let normalized = self.material.trim().to_lowercase();
        if normalized.is_empty() || normalized == "unknown" {
            None
        } else {
            Some(normalized)
        }
    }
}

/// `get_filament_info` result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilamentInfo {
    pub sku: String,
    pub brand: String,
    #[serde(rename = "type")]
    pub material: String,
    pub icon_type: Option<i64>,
    pub colors: Option<Value>,
    pub extruder_temp: Option<TempRange>,
    pub hotbed_temp: Option<TempRange>,
    pub diameter: Option<f64>,
    pub total: Option<f64>,
    pub current: Option<f64>,
}

/// One slot inside a `get_status` result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSlot {
    pub index: usize,
    pub status: String,
    /// 0 no tag, 1 reading, 2 identified.
    pub rfid: Option<u8>,
    #[serde(rename = "type")]
    pub material: String,
    pub color: Option<Vec<u8>>,
    pub sku: String,
    pub brand: String,
}

/// `get_status` result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitStatus {
    pub status: String,
    pub action: Option<String>,
    pub temp: Option<f64>,
    pub dryer: Option<Value>,
    pub feed_assist_count: Option<i64>,
    pub cont_assist_time: Option<f64>,
    pub slots: Vec<DeviceSlot>,
}

impl UnitStatus {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }

    pub fn slot(&self, index: usize) -> Option<&DeviceSlot> {
        self.slots.iter().find(|s| s.index == index)
    }

    /// Device-reported slot status, `"empty"` when the slot is not listed.
    pub fn slot_status(&self, index: usize) -> SlotStatus {
        self.slot(index)
            .map(|s| SlotStatus::from(s.status.as_str()))
            .unwrap_or(SlotStatus::Empty)
    }

    /// Names of top-level fields that differ enough to be worth logging.
    pub fn changed_fields(&self, previous: &UnitStatus) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.status != previous.status {
            changed.push("status");
        }
        if self.action != previous.action {
            changed.push("action");
        }
        let slot_states = |s: &UnitStatus| s.slots.iter().map(|x| x.status.clone()).collect::<Vec<_>>();
        if slot_states(self) != slot_states(previous) {
            changed.push("slots");
        }
        if self.dryer != previous.dryer {
            changed.push("dryer");
        }
        let temp_delta = (self.temp.unwrap_or(0.0) - previous.temp.unwrap_or(0.0)).abs();
        if temp_delta >= 5.0 {
            changed.push("temp");
        }
        if self.feed_assist_count != previous.feed_assist_count {
            changed.push("feed_assist_count");
        }
        if self.cont_assist_time != previous.cont_assist_time {
            changed.push("cont_assist_time");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_material_table() {
        assert_eq!(material_temperature("PLA"), 200);
        assert_eq!(material_temperature("PETG"), 235);
        assert_eq!(material_temperature("PC"), 260);
        assert_eq!(material_temperature("Nylon"), DEFAULT_TEMP);
    }

    #[test]
    fn test_rfid_temperature_modes() {
        let range = TempRange { min: 190, max: 230 };
        assert_eq!(rfid_temperature(range, RfidTempMode::Average, "PLA"), 210);
        assert_eq!(rfid_temperature(range, RfidTempMode::Min, "PLA"), 190);
        assert_eq!(rfid_temperature(range, RfidTempMode::Max, "PLA"), 230);

        let only_max = TempRange { min: 0, max: 220 };
        assert_eq!(rfid_temperature(only_max, RfidTempMode::Min, "PLA"), 220);
        let only_min = TempRange { min: 195, max: 0 };
        assert_eq!(rfid_temperature(only_min, RfidTempMode::Max, "PLA"), 195);

        assert_eq!(rfid_temperature(TempRange::default(), RfidTempMode::Average, "ABS"), 240);
    }

    #[test]
    fn test_slot_status_roundtrip_keeps_unknown_states() {
        let slot: Slot = serde_json::from_value(json!({"status": "preload", "material": "PLA"})).unwrap();
        assert_eq!(slot.status, SlotStatus::Other("preload".into()));
        assert_eq!(serde_json::to_value(&slot).unwrap()["status"], "preload");
    }

    #[test]
    fn test_known_material_normalization() {
        assert_eq!(Slot::ready(" PLA ", [0, 0, 0], 200).known_material().as_deref(), Some("pla"));
        assert_eq!(Slot::ready("Unknown", [0, 0, 0], 200).known_material(), None);
        assert_eq!(Slot::ready("", [0, 0, 0], 200).known_material(), None);
    }

    #[test]
    fn test_clear_rfid_metadata() {
        let mut slot = Slot::ready("PLA", [1, 2, 3], 200);
        slot.rfid = true;
        slot.sku = Some("AHPLBK-101".into());
        slot.extruder_temp = Some(TempRange { min: 190, max: 230 });
        slot.clear_rfid_metadata();
        assert!(!slot.rfid);
        assert!(slot.sku.is_none());
        assert!(slot.extruder_temp.is_none());
        assert_eq!(slot.material, "PLA");
    }

    #[test]
    fn test_unit_status_parse_and_diff() {
        let before: UnitStatus = serde_json::from_value(json!({
            "status": "ready",
            "temp": 25.0,
            "slots": [{"index": 0, "status": "ready", "rfid": 2, "type": "PLA", "color": [255, 0, 0]}]
        }))
        .unwrap();
        assert_eq!(before.slot_status(0), SlotStatus::Ready);
        assert_eq!(before.slot_status(3), SlotStatus::Empty);
        assert_eq!(before.slot(0).unwrap().material, "PLA");

        let mut after = before.clone();
        after.temp = Some(27.0);
        assert!(after.changed_fields(&before).is_empty());
        after.temp = Some(31.0);
        after.status = "busy".into();
        assert_eq!(after.changed_fields(&before), vec!["status", "temp"]);
    }
}
