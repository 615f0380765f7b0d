//! Device model and command types
//!
//! Defines the fixtures known to the gateway: identity, capabilities, cached
//! state, and the semantic commands the dispatcher places on the wire.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Upper bound for brightness values accepted by fixtures
pub const BRIGHTNESS_MAX: u8 = 100;
/// Coldest color temperature accepted on the wire (Kelvin)
pub const KELVIN_MIN: u16 = 2000;
/// Warmest color temperature accepted on the wire (Kelvin)
pub const KELVIN_MAX: u16 = 9000;

/// 8-bit RGB color triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const WHITE: RgbColor = RgbColor { r: 255, g: 255, b: 255 };
    pub const BLACK: RgbColor = RgbColor { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for RgbColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Clamp a brightness input to the range fixtures accept
pub fn clamp_brightness(value: u32) -> u8 {
    value.min(BRIGHTNESS_MAX as u32) as u8
}

/// Clamp an RGB channel input to one byte
pub fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Clamp a color temperature input to the supported Kelvin window
pub fn clamp_kelvin(value: u32) -> u16 {
    value.clamp(KELVIN_MIN as u32, KELVIN_MAX as u32) as u16
}

/// Supported color temperature window advertised by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KelvinRange {
    pub min: u16,
    pub max: u16,
}

impl Default for KelvinRange {
    fn default() -> Self {
        Self { min: KELVIN_MIN, max: KELVIN_MAX }
    }
}

/// Capability set advertised by (or inferred for) a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    #[serde(rename = "powerControl")]
    pub power_control: bool,
    #[serde(rename = "brightnessControl")]
    pub brightness_control: bool,
    #[serde(rename = "colorControl")]
    pub color_control: bool,
    #[serde(rename = "colorTemperatureControl")]
    pub color_temperature_control: bool,
    #[serde(rename = "temperatureRange", default)]
    pub temperature_range: KelvinRange,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(rename = "musicMode")]
    pub music_mode: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            power_control: true,
            brightness_control: true,
            color_control: true,
            color_temperature_control: true,
            temperature_range: KelvinRange::default(),
            modes: vec!["normal".to_string()],
            music_mode: false,
        }
    }
}

/// Last observed state of a device, cached in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub on: bool,
    pub brightness: u8,
    pub color: RgbColor,
    #[serde(rename = "colorTemperature")]
    pub color_temperature: u16,
    pub mode: String,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            on: false,
            brightness: 0,
            color: RgbColor::WHITE,
            color_temperature: 5000,
            mode: "normal".to_string(),
        }
    }
}

/// A lighting fixture known to the gateway
///
/// Created by the discovery engine on first sighting and updated in place on
/// later sightings or confirmed commands. Never deleted, only marked offline.
/// The `id` is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub model: String,
    pub ip: IpAddr,
    #[serde(rename = "lanEnabled")]
    pub lan_enabled: bool,
    pub online: bool,
    pub state: DeviceState,
    pub capabilities: DeviceCapabilities,
    /// Milliseconds since epoch of the last sighting; 0 when never seen
    #[serde(default)]
    pub last_seen: u64,
}

/// Semantic command dispatched to a device
///
/// Immutable once constructed; each command is independently retriable.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Power on/off
    Turn(bool),
    /// Brightness 0-100
    Brightness(u8),
    /// RGB color and/or color temperature; at least one must be present
    ColorAndTemp {
        color: Option<RgbColor>,
        kelvin: Option<u16>,
    },
    /// Query current device state; the dispatcher awaits one response
    StatusQuery,
}

impl Command {
    /// Short tag for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Turn(_) => "turn",
            Command::Brightness(_) => "brightness",
            Command::ColorAndTemp { .. } => "colorwc",
            Command::StatusQuery => "devStatus",
        }
    }

    /// Whether the target advertises the capability this command needs
    pub fn supported_by(&self, caps: &DeviceCapabilities) -> bool {
        match self {
            Command::Turn(_) => caps.power_control,
            Command::Brightness(_) => caps.brightness_control,
            Command::ColorAndTemp { color, kelvin } => {
                let color_ok = color.is_none() || caps.color_control;
                let temp_ok = kelvin.is_none() || caps.color_temperature_control;
                color_ok && temp_ok
            }
            Command::StatusQuery => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn brightness_always_in_range(value in any::<u32>()) {
            let clamped = clamp_brightness(value);
            prop_assert!(clamped <= BRIGHTNESS_MAX);
        }

        #[test]
        fn channel_always_in_range(value in any::<i32>()) {
            let clamped = clamp_channel(value);
            prop_assert!((0..=255).contains(&(clamped as i32)));
        }

        #[test]
        fn kelvin_always_in_range(value in any::<u32>()) {
            let clamped = clamp_kelvin(value);
            prop_assert!((KELVIN_MIN..=KELVIN_MAX).contains(&clamped));
        }
    }

    #[test]
    fn clamp_preserves_in_range_values() {
        assert_eq!(clamp_brightness(42), 42);
        assert_eq!(clamp_channel(128), 128);
        assert_eq!(clamp_kelvin(6500), 6500);
    }

    #[test]
    fn clamp_saturates_out_of_range_values() {
        assert_eq!(clamp_brightness(250), 100);
        assert_eq!(clamp_channel(-5), 0);
        assert_eq!(clamp_channel(300), 255);
        assert_eq!(clamp_kelvin(100), KELVIN_MIN);
        assert_eq!(clamp_kelvin(20_000), KELVIN_MAX);
    }

    #[test]
    fn command_capability_check() {
        let caps = DeviceCapabilities {
            color_temperature_control: false,
            ..DeviceCapabilities::default()
        };

        assert!(Command::Turn(true).supported_by(&caps));
        assert!(Command::ColorAndTemp { color: Some(RgbColor::WHITE), kelvin: None }
            .supported_by(&caps));
        assert!(!Command::ColorAndTemp { color: None, kelvin: Some(4000) }.supported_by(&caps));
    }
}
