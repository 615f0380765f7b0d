//! LAN control protocol codec
//!
//! Devices speak newline-delimited JSON over UDP, shaped
//! `{"msg":{"cmd":<string>,"data":<object>}}`. Encoding clamps every value to
//! its wire range; decoding is total and returns `None` for anything that does
//! not match the expected shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;

use crate::device::{
    clamp_brightness, clamp_kelvin, Command, Device, DeviceCapabilities, DeviceState, RgbColor,
};

/// Discovery scan request
pub const CMD_SCAN: &str = "scan";
/// Power control
pub const CMD_TURN: &str = "turn";
/// Brightness control
pub const CMD_BRIGHTNESS: &str = "brightness";
/// Combined color / color-temperature control
pub const CMD_COLORWC: &str = "colorwc";
/// Device status tag, used both as query and response
pub const CMD_DEV_STATUS: &str = "devStatus";

/// Envelope of every wire message
#[derive(Debug, Serialize, Deserialize)]
pub struct LanMessage {
    pub msg: MessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageContent {
    pub cmd: String,
    pub data: Value,
}

fn encode(message: &LanMessage) -> Vec<u8> {
    // serde_json cannot fail on these value-only payloads
    let mut bytes = serde_json::to_vec(message).unwrap_or_default();
    bytes.push(b'\n');
    bytes
}

/// Encode the multicast discovery scan request
pub fn encode_scan_request() -> Vec<u8> {
    encode(&LanMessage {
        msg: MessageContent {
            cmd: CMD_SCAN.to_string(),
            data: json!({ "account_topic": "reserve" }),
        },
    })
}

/// Encode a control command as a wire datagram
///
/// All values are clamped here so no out-of-range value is ever placed on the
/// wire. Returns `None` for a `ColorAndTemp` carrying neither field.
pub fn encode_command(command: &Command) -> Option<Vec<u8>> {
    let (cmd, data) = match command {
        Command::Turn(on) => (CMD_TURN, json!({ "value": if *on { 1 } else { 0 } })),
        Command::Brightness(level) => (
            CMD_BRIGHTNESS,
            json!({ "value": clamp_brightness(*level as u32) }),
        ),
        Command::ColorAndTemp { color: None, kelvin: None } => return None,
        Command::ColorAndTemp { color, kelvin } => {
            let mut data = json!({});
            if let Some(c) = color {
                data["color"] = json!({ "r": c.r, "g": c.g, "b": c.b });
            }
            if let Some(k) = kelvin {
                data["colorTemInKelvin"] = json!(clamp_kelvin(*k as u32));
            }
            (CMD_COLORWC, data)
        }
        Command::StatusQuery => (CMD_DEV_STATUS, json!({})),
    };

    Some(encode(&LanMessage {
        msg: MessageContent { cmd: cmd.to_string(), data },
    }))
}

/// Decode a raw datagram into a wire message
///
/// Total: malformed input yields `None`, never an error. Trailing newlines and
/// whitespace are tolerated.
pub fn decode(payload: &[u8]) -> Option<LanMessage> {
    let text = std::str::from_utf8(payload).ok()?;
    serde_json::from_str(text.trim()).ok()
}

/// Parse a discovery or status response datagram into a device
///
/// Handles both `scan` responses (identity only, engineering-default state)
/// and `devStatus` responses (full state with inferred capabilities). Returns
/// `None` for anything else; the caller logs and discards.
pub fn parse_device_response(payload: &[u8], from: SocketAddr) -> Option<Device> {
    let message = decode(payload)?;
    let data = &message.msg.data;

    match message.msg.cmd.as_str() {
        CMD_SCAN => {
            // Scan responses may carry the device IP; fall back to the sender
            let ip = data
                .get("ip")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| from.ip());

            let model = data
                .get("sku")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string();
            let name = data
                .get("deviceName")
                .and_then(|v| v.as_str())
                .unwrap_or(&model)
                .to_string();

            Some(Device {
                id: data.get("device")?.as_str()?.to_string(),
                name,
                model,
                ip,
                lan_enabled: true,
                online: true,
                state: DeviceState::default(),
                capabilities: DeviceCapabilities::default(),
                last_seen: 0,
            })
        }
        CMD_DEV_STATUS => {
            let state = DeviceState {
                on: data.get("onOff").and_then(|v| v.as_i64()).unwrap_or(0) == 1,
                brightness: data
                    .get("brightness")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    .min(100) as u8,
                color: parse_color(data.get("color")),
                color_temperature: data
                    .get("colorTemInKelvin")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(5000) as u16,
                mode: data
                    .get("mode")
                    .and_then(|v| v.as_str())
                    .unwrap_or("normal")
                    .to_string(),
            };

            let capabilities = DeviceCapabilities {
                color_temperature_control: data.get("colorTemInKelvin").is_some(),
                music_mode: data
                    .get("musicMode")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                ..DeviceCapabilities::default()
            };

            Some(Device {
                id: data.get("device")?.as_str()?.to_string(),
                name: data
                    .get("deviceName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown Device")
                    .to_string(),
                model: data
                    .get("sku")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                ip: from.ip(),
                lan_enabled: true,
                online: true,
                state,
                capabilities,
                last_seen: 0,
            })
        }
        _ => None,
    }
}

/// Parse a `{r,g,b}` object, defaulting missing channels to white
fn parse_color(value: Option<&Value>) -> RgbColor {
    match value {
        Some(color) => RgbColor {
            r: color.get("r").and_then(|v| v.as_u64()).unwrap_or(255) as u8,
            g: color.get("g").and_then(|v| v.as_u64()).unwrap_or(255) as u8,
            b: color.get("b").and_then(|v| v.as_u64()).unwrap_or(255) as u8,
        },
        None => RgbColor::WHITE,
    }
}
