use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method: firmware model and version.
pub const GET_INFO: &str = "get_info";
/// Method: unit state, slots, dryer.
pub const GET_STATUS: &str = "get_status";
/// Method: push filament out of a slot.
pub const FEED_FILAMENT: &str = "feed_filament";
/// Method: abort a feed.
pub const STOP_FEED_FILAMENT: &str = "stop_feed_filament";
/// Method: pull filament back into a slot.
pub const UNWIND_FILAMENT: &str = "unwind_filament";
/// Method: abort an unwind.
pub const STOP_UNWIND_FILAMENT: &str = "stop_unwind_filament";
/// Method: change speed of a running feed.
pub const UPDATE_FEEDING_SPEED: &str = "update_feeding_speed";
/// Method: change speed of a running unwind.
pub const UPDATE_UNWINDING_SPEED: &str = "update_unwinding_speed";
/// Method: keep tension on a slot while printing.
pub const START_FEED_ASSIST: &str = "start_feed_assist";
/// Method: release feed assist.
pub const STOP_FEED_ASSIST: &str = "stop_feed_assist";
/// Method: start the dryer.
pub const DRYING: &str = "drying";
/// Method: stop the dryer.
pub const DRYING_STOP: &str = "drying_stop";
/// Method: full RFID tag contents for a slot.
pub const GET_FILAMENT_INFO: &str = "get_filament_info";

/// `msg` value the unit returns while busy.
pub const FORBIDDEN: &str = "FORBIDDEN";

/// Outgoing request. `id` is filled in by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Request without parameters.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Request with a parameter object.
    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn get_info() -> Self {
        Self::new(GET_INFO)
    }

    pub fn get_status() -> Self {
        Self::new(GET_STATUS)
    }

    pub fn feed_filament(index: usize, length: u32, speed: u32) -> Self {
        Self::with_params(
            FEED_FILAMENT,
            json!({ "index": index, "length": length, "speed": speed }),
        )
    }

    pub fn stop_feed_filament(index: usize) -> Self {
        Self::with_params(STOP_FEED_FILAMENT, json!({ "index": index }))
    }

    pub fn unwind_filament(index: usize, length: u32, speed: u32) -> Self {
        Self::with_params(
            UNWIND_FILAMENT,
            json!({ "index": index, "length": length, "speed": speed }),
        )
    }

    pub fn stop_unwind_filament(index: usize) -> Self {
        Self::with_params(STOP_UNWIND_FILAMENT, json!({ "index": index }))
    }

    pub fn update_feeding_speed(index: usize, speed: u32) -> Self {
        Self::with_params(
            UPDATE_FEEDING_SPEED,
            json!({ "index": index, "speed": speed }),
        )
    }

    pub fn update_unwinding_speed(index: usize, speed: u32) -> Self {
        Self::with_params(
            UPDATE_UNWINDING_SPEED,
            json!({ "index": index, "speed": speed }),
        )
    }

    pub fn start_feed_assist(index: usize) -> Self {
        Self::with_params(START_FEED_ASSIST, json!({ "index": index }))
    }

    pub fn stop_feed_assist(index: usize) -> Self {
        Self::with_params(STOP_FEED_ASSIST, json!({ "index": index }))
    }

    /// Start drying at `temp` degrees C for `duration` minutes.
    pub fn drying(temp: u32, duration: u32) -> Self {
        Self::with_params(DRYING, json!({ "temp": temp, "duration": duration }))
    }

    pub fn drying_stop() -> Self {
        Self::new(DRYING_STOP)
    }

    pub fn get_filament_info(index: usize) -> Self {
        Self::with_params(GET_FILAMENT_INFO, json!({ "index": index }))
    }

    /// Slot index parameter, if this request carries one.
    pub fn index(&self) -> Option<usize> {
        self.params
            .as_ref()
            .and_then(|p| p.get("index"))
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }
}

/// Response to a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Response {
    /// The unit reported itself busy.
    pub fn is_forbidden(&self) -> bool {
        self.msg
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(FORBIDDEN))
    }

    /// Zero (or absent) code and not busy.
    pub fn is_success(&self) -> bool {
        self.code.unwrap_or(0) == 0 && !self.is_forbidden()
    }

    /// Device message, or a placeholder.
    pub fn message(&self) -> &str {
        self.msg.as_deref().unwrap_or("unknown error")
    }
}

/// Extract a correlation id from a raw inbound object.
pub fn response_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64)
}
