//! Readings emitted toward the host automation runtime.
//! A poll produces one atomic batch of named values; partial polls never
//! leave a half-updated reading set.

use crate::error::KasaError;
use crate::profile::{self, Section};
use crate::protocol::DeviceResponse;
use serde_json::{Map, Value};
use std::time::SystemTime;

/// Literal recorded when `next_action` carries no schedule.
const NO_ACTION: &str = "-None-";

/// A single named value recorded for a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: Value,
}

/// One atomic update transaction of readings.
///
/// Names are unique within a batch; pushing an existing name overwrites it
/// (last write wins).
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingBatch {
    pub timestamp: SystemTime,
    pub readings: Vec<Reading>,
}

impl ReadingBatch {
    pub fn new() -> Self {
        Self {
            timestamp: SystemTime::now(),
            readings: Vec::new(),
        }
    }

    pub fn push<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.readings.iter_mut().find(|r| r.name == name) {
            existing.value = value;
        } else {
            self.readings.push(Reading { name, value });
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.readings.iter().find(|r| r.name == name).map(|r| &r.value)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl Default for ReadingBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a full status response into one reading batch.
///
/// Every `get_sysinfo` key becomes a reading, remapped through the hardware
/// profile for the reported `hw_ver`; `next_action` is rendered as a
/// schedule string; a synthetic `state` reading is derived from
/// `relay_state`; the device clock becomes a `time` reading.
pub(crate) fn status_readings(resp: &DeviceResponse) -> ReadingBatch {
    let mut batch = ReadingBatch::new();

    if let Some(sysinfo) = resp.sysinfo() {
        let hw_ver = sysinfo
            .get("hw_ver")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        for (raw, value) in sysinfo {
            let (name, factor) = profile::lookup(Section::SysInfo, &hw_ver, raw);
            let value = if raw == "next_action" {
                Value::String(render_next_action(value))
            } else {
                scale(value, factor)
            };
            batch.push(name, value);
        }

        // Only the two defined relay states produce a reading.
        match sysinfo.get("relay_state").and_then(Value::as_i64) {
            Some(1) => batch.push("state", "on"),
            Some(0) => batch.push("state", "off"),
            _ => {}
        }
    }

    if let Some(clock) = resp.device_time() {
        batch.push("time", clock.to_string());
    }

    batch
}

/// Convert an `emeter.get_realtime` counter map into one reading batch.
pub(crate) fn energy_readings(realtime: &Map<String, Value>, hw_ver: &str) -> ReadingBatch {
    let mut batch = ReadingBatch::new();
    for (raw, value) in realtime {
        let (name, factor) = profile::lookup(Section::EmeterRealtime, hw_ver, raw);
        batch.push(name, scale(value, factor));
    }
    batch
}

/// A decode failure is itself recorded as a reading so the host can surface
/// protocol health per device.
pub(crate) fn decode_failure(error: &KasaError) -> ReadingBatch {
    let mut batch = ReadingBatch::new();
    batch.push("decode_json", error.to_string());
    batch
}

/// Render the `next_action` schedule field.
///
/// `type == 1` is a timed relay action: "HH:MM on|off" computed from
/// `schd_sec` (seconds since midnight) and `action`. Anything else, or a
/// malformed schedule, renders the literal `-None-`.
fn render_next_action(value: &Value) -> String {
    let Some(obj) = value.as_object() else {
        return NO_ACTION.into();
    };
    if obj.get("type").and_then(Value::as_i64) != Some(1) {
        return NO_ACTION.into();
    }
    let Some(schd_sec) = obj.get("schd_sec").and_then(Value::as_i64) else {
        return NO_ACTION.into();
    };

    let action = match obj.get("action") {
        Some(Value::String(s)) if s == "1" => "on",
        Some(v) if v.as_i64() == Some(1) => "on",
        _ => "off",
    };
    format!("{:02}:{:02} {}", schd_sec / 3600, (schd_sec % 3600) / 60, action)
}

/// Apply a profile scale factor. Factor 1 passes the value through untouched
/// so integers stay integers.
fn scale(value: &Value, factor: f64) -> Value {
    if factor == 1.0 {
        return value.clone();
    }
    match value.as_f64() {
        Some(n) => Value::from(n * factor),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(sysinfo: Value) -> DeviceResponse {
        DeviceResponse::parse(
            json!({
                "system": {"get_sysinfo": sysinfo},
                "time": {"get_time": {"year": 2016, "month": 3, "mday": 7, "hour": 9, "min": 5, "sec": 2}}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn state_derivation() {
        let batch = status_readings(&status(json!({"relay_state": 1})));
        assert_eq!(batch.get("state"), Some(&json!("on")));

        let batch = status_readings(&status(json!({"relay_state": 0})));
        assert_eq!(batch.get("state"), Some(&json!("off")));

        let batch = status_readings(&status(json!({"relay_state": 2})));
        assert_eq!(batch.get("state"), None);

        let batch = status_readings(&status(json!({"relay_state": "1"})));
        assert_eq!(batch.get("state"), None);
    }

    #[test]
    fn time_reading_has_no_zero_padding() {
        let batch = status_readings(&status(json!({})));
        assert_eq!(batch.get("time"), Some(&json!("2016-3-7 9:5:2")));
    }

    #[test]
    fn sysinfo_fields_remap_by_hw_ver() {
        let batch = status_readings(&status(json!({
            "hw_ver": "2.0",
            "longitude_i": 1234567,
            "alias": "desk plug"
        })));
        let longitude = batch.get("longitude").and_then(Value::as_f64).unwrap();
        assert!((longitude - 123.4567).abs() < 1e-9);
        assert_eq!(batch.get("longitude_i"), None);
        assert_eq!(batch.get("alias"), Some(&json!("desk plug")));
        assert_eq!(batch.get("hw_ver"), Some(&json!("2.0")));
    }

    #[test]
    fn next_action_scheduled_on() {
        let batch = status_readings(&status(json!({
            "next_action": {"type": 1, "schd_sec": 45240, "action": "1"}
        })));
        assert_eq!(batch.get("next_action"), Some(&json!("12:34 on")));
    }

    #[test]
    fn next_action_scheduled_off_numeric_action() {
        let batch = status_readings(&status(json!({
            "next_action": {"type": 1, "schd_sec": 3600, "action": 0}
        })));
        assert_eq!(batch.get("next_action"), Some(&json!("01:00 off")));
    }

    #[test]
    fn next_action_none() {
        let batch = status_readings(&status(json!({"next_action": {"type": 0}})));
        assert_eq!(batch.get("next_action"), Some(&json!("-None-")));

        let batch = status_readings(&status(json!({"next_action": {"type": 1}})));
        assert_eq!(batch.get("next_action"), Some(&json!("-None-")));

        let batch = status_readings(&status(json!({"next_action": -1})));
        assert_eq!(batch.get("next_action"), Some(&json!("-None-")));
    }

    #[test]
    fn energy_scaling_by_hw_ver() {
        let realtime = json!({"power_mw": 1500, "voltage_mv": 230120});
        let batch = energy_readings(realtime.as_object().unwrap(), "2.0");
        assert_eq!(batch.get("power"), Some(&json!(1.5)));
        let voltage = batch.get("voltage").and_then(Value::as_f64).unwrap();
        assert!((voltage - 230.12).abs() < 1e-9);

        let realtime = json!({"power": 1500});
        let batch = energy_readings(realtime.as_object().unwrap(), "1.0");
        assert_eq!(batch.get("power"), Some(&json!(1500)));
    }

    #[test]
    fn batch_last_write_wins() {
        let mut batch = ReadingBatch::new();
        batch.push("state", "off");
        batch.push("state", "on");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get("state"), Some(&json!("on")));
    }

    #[test]
    fn decode_failure_reading() {
        let err = KasaError::Json("expected value at line 1".into());
        let batch = decode_failure(&err);
        assert_eq!(batch.len(), 1);
        assert!(
            batch
                .get("decode_json")
                .and_then(Value::as_str)
                .unwrap()
                .contains("expected value")
        );
    }
}
