//! Radio parameters and the TOML file the demos load them from.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigFileError};
use crate::loradev::LoRaChannels;

/// Carrier frequency used when nothing else is configured (EU ISM band).
pub const DEFAULT_FREQUENCY_HZ: f64 = 868e6;
pub const DEFAULT_BANDWIDTH_HZ: f64 = 125e3;
pub const DEFAULT_SPREADING_FACTOR: u8 = 7;
pub const DEFAULT_CODING_RATE: u8 = 5;

/// Payload sent when the user asks for a transmission.
pub const DEFAULT_PAYLOAD: &str = "Test Message";
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Tuning range of the SX127x family.
const MIN_FREQUENCY_HZ: f64 = 137e6;
const MAX_FREQUENCY_HZ: f64 = 1020e6;

/// Signal bandwidths a LoRa modem can be set to.
pub const LORA_BANDWIDTHS_HZ: [f64; 10] = [
    7.8e3, 10.4e3, 15.6e3, 20.8e3, 31.25e3, 41.7e3, 62.5e3, 125e3, 250e3, 500e3,
];

/// LoRa modulation parameters.
///
/// Applied once per session; a session never changes them afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RadioConfiguration {
    /// Carrier frequency in Hz
    pub frequency_hz: f64,
    /// Signal bandwidth in Hz
    pub bandwidth_hz: f64,
    /// Spreading factor, 6 to 12
    pub spreading_factor: u8,
    /// Coding rate denominator, the `x` in 4/x
    pub coding_rate: u8,
}

impl Default for RadioConfiguration {
    fn default() -> Self {
        RadioConfiguration {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            bandwidth_hz: DEFAULT_BANDWIDTH_HZ,
            spreading_factor: DEFAULT_SPREADING_FACTOR,
            coding_rate: DEFAULT_CODING_RATE,
        }
    }
}

impl RadioConfiguration {
    pub fn new(frequency_hz: f64, bandwidth_hz: f64, spreading_factor: u8, coding_rate: u8) -> Self {
        RadioConfiguration {
            frequency_hz,
            bandwidth_hz,
            spreading_factor,
            coding_rate,
        }
    }

    /// Default modulation on one of the predefined channels.
    pub fn on_channel(channel: LoRaChannels) -> Self {
        RadioConfiguration {
            frequency_hz: channel.frequency_hz(),
            ..Default::default()
        }
    }

    /// Check every field, in the order they are applied to the radio.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_frequency(self.frequency_hz)?;
        check_bandwidth(self.bandwidth_hz)?;
        check_spreading_factor(self.spreading_factor)?;
        check_coding_rate(self.coding_rate)
    }

    /// One-line human readable description, e.g. `868.000 MHz BW125 SF7 CR4/5`.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RadioConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} MHz BW{} SF{} CR4/{}",
            self.frequency_hz / 1e6,
            self.bandwidth_hz / 1e3,
            self.spreading_factor,
            self.coding_rate
        )
    }
}

pub(crate) fn check_frequency(hz: f64) -> Result<(), ConfigError> {
    if !hz.is_finite() || hz < MIN_FREQUENCY_HZ || hz > MAX_FREQUENCY_HZ {
        return Err(ConfigError::InvalidFrequency {
            hz,
            reason: format!(
                "outside {} - {} MHz",
                MIN_FREQUENCY_HZ / 1e6,
                MAX_FREQUENCY_HZ / 1e6
            ),
        });
    }
    Ok(())
}

pub(crate) fn check_bandwidth(hz: f64) -> Result<(), ConfigError> {
    // 41.7 kHz and friends are rounded in datasheets
    if LORA_BANDWIDTHS_HZ.iter().any(|bw| (bw - hz).abs() < 100.0) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBandwidth {
            hz,
            reason: "not a LoRa bandwidth".to_string(),
        })
    }
}

pub(crate) fn check_spreading_factor(sf: u8) -> Result<(), ConfigError> {
    if (6..=12).contains(&sf) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSpreadingFactor {
            sf,
            reason: "must be between 6 and 12".to_string(),
        })
    }
}

pub(crate) fn check_coding_rate(cr: u8) -> Result<(), ConfigError> {
    if (5..=8).contains(&cr) {
        Ok(())
    } else {
        Err(ConfigError::InvalidCodingRate {
            cr,
            reason: "denominator must be between 5 and 8".to_string(),
        })
    }
}

/// Top-level configuration loaded from a TOML file.
///
/// ```toml
/// [radio]
/// frequency_hz = 868e6
/// spreading_factor = 7
///
/// [session]
/// tick_ms = 100
/// payload = "Test Message"
///
/// [serial]
/// device = "/dev/ttyUSB0"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub radio: RadioConfiguration,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub serial: SerialSection,
}

/// The `[session]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Poll loop period in milliseconds.
    pub tick_ms: u64,
    /// Text sent on every user send request.
    pub payload: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        SessionSection {
            tick_ms: DEFAULT_TICK_MS,
            payload: DEFAULT_PAYLOAD.to_string(),
        }
    }
}

impl SessionSection {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// The `[serial]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    /// Serial device path; the platform default USB serial device if unset.
    pub device: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialSection {
    fn default() -> Self {
        SerialSection {
            device: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl SerialSection {
    pub fn device_or_default(&self) -> String {
        self.device
            .clone()
            .unwrap_or_else(crate::get_default_usb_serial)
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string and validate the radio section.
    pub fn parse(s: &str) -> Result<Self, ConfigFileError> {
        let config: LinkConfig = toml::from_str(s)?;
        config.radio.validate()?;
        Ok(config)
    }
}
