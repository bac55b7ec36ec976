//! Kasa wire protocol implementation.
//! Handles frame packing and unpacking, command serialization, and typed
//! response decoding.
//!
//! One message on the wire is a 4-byte big-endian length prefix carrying the
//! *plaintext* byte count, followed by that many bytes of ciphered payload.
//! The payload plaintext is UTF-8 JSON.

use crate::crypto;
use crate::error::{KasaError, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Default TCP port for the Smart Home Protocol.
pub const DEFAULT_PORT: u16 = 9999;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Frame a plaintext payload: length prefix plus ciphered body.
///
/// The prefix is always the full 4-byte big-endian plaintext byte count.
/// Payloads of 256 bytes and above must frame correctly; a single-byte
/// count silently corrupts them.
pub fn pack_frame(plaintext: &[u8]) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    BigEndian::write_u32(&mut header, plaintext.len() as u32);

    let mut data = Vec::with_capacity(HEADER_LEN + plaintext.len());
    data.extend_from_slice(&header);
    data.extend_from_slice(&crypto::encode(plaintext));
    data
}

/// Parse the length prefix into the expected body byte count.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> usize {
    BigEndian::read_u32(header) as usize
}

/// Unwrap a frame body read off the wire.
///
/// `body` must be exactly the length announced by `header`; the transport
/// layer is responsible for accumulating it.
pub fn unpack_frame(header: &[u8; HEADER_LEN], body: &[u8]) -> Result<Vec<u8>> {
    let expected = parse_header(header);
    if body.len() != expected {
        return Err(KasaError::ShortBody {
            expected,
            received: body.len(),
        });
    }
    Ok(crypto::decode(body))
}

/// A command for the device, serialized to a fixed JSON shape before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Full status poll: sysinfo plus the device clock.
    GetStatus,
    /// Switch the relay on or off.
    SetRelay { on: bool },
    /// Toggle the status LED ("night mode"); `off = true` darkens it.
    SetNightLed { off: bool },
    /// Realtime energy counters from the built-in meter.
    GetEnergy,
}

impl Command {
    /// The request's JSON shape.
    pub fn to_json(&self) -> Value {
        match self {
            Command::GetStatus => json!({"system":{"get_sysinfo":{}},"time":{"get_time":{}}}),
            Command::SetRelay { on } => json!({"system":{"on_off":{"state": *on as u8}}}),
            Command::SetNightLed { off } => json!({"system":{"set_led_off":{"off": *off as u8}}}),
            Command::GetEnergy => json!({"emeter":{"get_realtime":{}}}),
        }
    }

    /// Serialized request payload, ready for framing.
    pub fn payload(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// Parsed device response, decoded once per exchange.
///
/// Responses mirror the request's command namespace; every section is
/// optional so that one decode covers all commands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceResponse {
    #[serde(default)]
    pub system: Option<SystemSection>,
    #[serde(default)]
    pub time: Option<TimeSection>,
    #[serde(default)]
    pub emeter: Option<EmeterSection>,
}

impl DeviceResponse {
    /// Decode a plaintext JSON response.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// The `system.get_sysinfo` status map, if present.
    pub fn sysinfo(&self) -> Option<&Map<String, Value>> {
        self.system.as_ref()?.get_sysinfo.as_ref()
    }

    /// The `time.get_time` device clock, if present.
    pub fn device_time(&self) -> Option<&DeviceTime> {
        self.time.as_ref()?.get_time.as_ref()
    }

    /// Acknowledgement for a relay command.
    pub fn relay_ack(&self) -> Option<&CommandAck> {
        self.system.as_ref()?.set_relay_state.as_ref()
    }

    /// Acknowledgement for a night-mode LED command.
    pub fn led_ack(&self) -> Option<&CommandAck> {
        self.system.as_ref()?.set_led_off.as_ref()
    }

    /// The `emeter.get_realtime` counter map, if present.
    pub fn emeter_realtime(&self) -> Option<&Map<String, Value>> {
        self.emeter.as_ref()?.get_realtime.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemSection {
    #[serde(default)]
    pub get_sysinfo: Option<Map<String, Value>>,
    #[serde(default)]
    pub set_relay_state: Option<CommandAck>,
    #[serde(default)]
    pub set_led_off: Option<CommandAck>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSection {
    #[serde(default)]
    pub get_time: Option<DeviceTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmeterSection {
    #[serde(default)]
    pub get_realtime: Option<Map<String, Value>>,
}

/// Command acknowledgement carrying the device's error code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub err_code: Option<Value>,
}

impl CommandAck {
    /// The error code rendered as a string. Devices report numbers; older
    /// firmware reports strings.
    pub fn code(&self) -> String {
        match &self.err_code {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::from("absent"),
        }
    }

    /// True when the device acknowledged the command.
    pub fn acknowledged(&self) -> bool {
        self.code() == "0"
    }
}

/// Device wall clock as reported, field for field.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeviceTime {
    #[serde(default)]
    pub year: i64,
    #[serde(default)]
    pub month: i64,
    #[serde(default)]
    pub mday: i64,
    #[serde(default)]
    pub hour: i64,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub sec: i64,
}

impl std::fmt::Display for DeviceTime {
    /// "YYYY-M-D H:MI:S", integers verbatim with no zero padding.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{} {}:{}:{}",
            self.year, self.month, self.mday, self.hour, self.min, self.sec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        for len in [0usize, 1, 255, 256, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let framed = pack_frame(&payload);

            let header: [u8; HEADER_LEN] = framed[..HEADER_LEN].try_into().unwrap();
            assert_eq!(parse_header(&header), len, "header must carry {len}");
            assert_eq!(unpack_frame(&header, &framed[HEADER_LEN..]).unwrap(), payload);
        }
    }

    #[test]
    fn frame_header_is_big_endian() {
        let payload = vec![0u8; 0x0102];
        let framed = pack_frame(&payload);
        assert_eq!(&framed[..HEADER_LEN], &[0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn unpack_rejects_truncated_body() {
        let framed = pack_frame(b"0123456789");
        let header: [u8; HEADER_LEN] = framed[..HEADER_LEN].try_into().unwrap();
        let err = unpack_frame(&header, &framed[HEADER_LEN..HEADER_LEN + 3]).unwrap_err();
        assert_eq!(
            err,
            KasaError::ShortBody {
                expected: 10,
                received: 3
            }
        );
    }

    #[test]
    fn command_shapes() {
        assert_eq!(
            Command::GetStatus.to_json(),
            json!({"system":{"get_sysinfo":{}},"time":{"get_time":{}}})
        );
        assert_eq!(
            Command::SetRelay { on: true }.to_json(),
            json!({"system":{"on_off":{"state":1}}})
        );
        assert_eq!(
            Command::SetRelay { on: false }.to_json(),
            json!({"system":{"on_off":{"state":0}}})
        );
        assert_eq!(
            Command::SetNightLed { off: true }.to_json(),
            json!({"system":{"set_led_off":{"off":1}}})
        );
        assert_eq!(
            Command::GetEnergy.to_json(),
            json!({"emeter":{"get_realtime":{}}})
        );
    }

    #[test]
    fn response_sections_decode() {
        let raw = br#"{
            "system": {"get_sysinfo": {"relay_state": 1, "hw_ver": "2.0"}},
            "time": {"get_time": {"year": 2016, "month": 3, "mday": 7, "hour": 9, "min": 5, "sec": 2}}
        }"#;
        let resp = DeviceResponse::parse(raw).unwrap();

        let sysinfo = resp.sysinfo().unwrap();
        assert_eq!(sysinfo.get("relay_state"), Some(&json!(1)));
        assert_eq!(resp.device_time().unwrap().to_string(), "2016-3-7 9:5:2");
        assert!(resp.relay_ack().is_none());
    }

    #[test]
    fn ack_code_accepts_string_and_number() {
        let resp =
            DeviceResponse::parse(br#"{"system":{"set_relay_state":{"err_code":0}}}"#).unwrap();
        assert!(resp.relay_ack().unwrap().acknowledged());

        let resp =
            DeviceResponse::parse(br#"{"system":{"set_relay_state":{"err_code":"0"}}}"#).unwrap();
        assert!(resp.relay_ack().unwrap().acknowledged());

        let resp =
            DeviceResponse::parse(br#"{"system":{"set_relay_state":{"err_code":-3}}}"#).unwrap();
        let ack = resp.relay_ack().unwrap();
        assert!(!ack.acknowledged());
        assert_eq!(ack.code(), "-3");
    }

    #[test]
    fn parse_failure_is_json_error() {
        assert!(matches!(
            DeviceResponse::parse(b"not json").unwrap_err(),
            KasaError::Json(_)
        ));
    }
}
